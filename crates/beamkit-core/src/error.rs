//! Error handling for BeamKit
//!
//! Provides error types for all layers of the controller engine:
//! - Connection errors (transport unusable, including the refused class)
//! - Frame errors (contract violations by a command producer)
//! - Controller errors (send-loop lifecycle misuse)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents transport-level failures while talking to a controller board.
/// Most variants are transient and are retried with backoff by the send
/// loop; the refused class (see [`ConnectionError::is_refusal`]) is counted
/// and escalated to operator intervention instead of being retried forever.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Operation attempted on a connection that is not open
    #[error("Connection is not open")]
    NotOpen,

    /// Opening the transport failed for a transient reason
    #[error("Failed to open device {index}: {reason}")]
    OpenFailed {
        /// The device index that was requested.
        index: i32,
        /// The reason the open failed.
        reason: String,
    },

    /// No device is present at the requested index
    #[error("Device not found at index {index}")]
    DeviceNotFound {
        /// The device index that was requested.
        index: i32,
    },

    /// A device answered but is not the expected hardware
    #[error("Device at index {index} is not the expected hardware: {reason}")]
    WrongDevice {
        /// The device index that was probed.
        index: i32,
        /// What did not match (bus, address, chip revision).
        reason: String,
    },

    /// The platform refused access to the device node
    #[error("Access to device denied: {reason}")]
    AccessDenied {
        /// The reason access was denied.
        reason: String,
    },

    /// The device's identity challenge could not be satisfied
    #[error("Device challenge failed: {reason}")]
    ChallengeFailed {
        /// The reason the challenge failed.
        reason: String,
    },

    /// Writing a frame to the transport failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// A status read did not complete within the transport timeout
    #[error("Status read timed out")]
    ReadTimeout,

    /// A status reply arrived but was shorter than the protocol requires
    #[error("Status reply too short: expected {expected} bytes, got {got}")]
    ShortStatusReply {
        /// The reply length the protocol requires.
        expected: usize,
        /// The length actually received.
        got: usize,
    },

    /// The device stopped answering status polls entirely
    #[error("Device stopped responding (no status reply after {attempts} polls)")]
    NoReply {
        /// How many polls went unanswered before giving up.
        attempts: usize,
    },

    /// The transport does not implement this capability
    #[error("Operation not supported by this transport")]
    Unsupported,
}

impl ConnectionError {
    /// Whether this error belongs to the refused class: the transport
    /// categorically rejected the attempt and retrying without operator
    /// action (different index, driver fix, replug) will not help.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            ConnectionError::DeviceNotFound { .. }
                | ConnectionError::WrongDevice { .. }
                | ConnectionError::AccessDenied { .. }
                | ConnectionError::ChallengeFailed { .. }
        )
    }
}

/// Frame error type
///
/// Contract violations by a command producer. These indicate a caller bug
/// and surface synchronously to whichever thread made the bad call; they
/// are never absorbed by the send loop's retry machinery.
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    /// Payload longer than the fixed frame allows
    #[error("Payload of {len} bytes exceeds the {max}-byte frame limit")]
    OversizedPayload {
        /// The payload length submitted.
        len: usize,
        /// The maximum payload the frame carries.
        max: usize,
    },

    /// A binary op was not the exact wire width
    #[error("Binary op must be exactly {expected} bytes, got {got}")]
    MalformedOp {
        /// The op width the protocol requires.
        expected: usize,
        /// The width actually supplied.
        got: usize,
    },

    /// More ops supplied than fit in one bulk chunk
    #[error("Chunk of {ops} ops exceeds the {max}-op limit")]
    OversizedChunk {
        /// The number of ops supplied.
        ops: usize,
        /// The maximum ops one chunk carries.
        max: usize,
    },
}

/// Controller error type
///
/// Lifecycle misuse of the send loop itself.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// The send loop is already running
    #[error("Send loop already running")]
    AlreadyRunning,

    /// The send loop has reached its terminal state and cannot restart
    #[error("Send loop has terminated and cannot be restarted")]
    Terminated,

    /// The OS refused to spawn the send-loop thread
    #[error("Failed to spawn send loop thread: {reason}")]
    SpawnFailed {
        /// The OS-level reason.
        reason: String,
    },

    /// The send-loop thread panicked
    #[error("Send loop thread panicked")]
    ThreadPanicked,
}

/// Main error type for BeamKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Frame error
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a refused-class connection error
    pub fn is_refusal(&self) -> bool {
        matches!(self, Error::Connection(e) if e.is_refusal())
    }

    /// Check if this is a frame contract error
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::Frame(_))
    }

    /// Check if this is a controller lifecycle error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
