//! Transport abstraction for controller boards.
//!
//! The send loop drives exactly one [`Connection`]: a capability wrapping a
//! physical (or mock) link to the hardware. The engine never touches USB or
//! serial details directly; it only opens, closes, writes frames, and reads
//! status replies. Platform device binding lives outside this crate.

pub mod serial;

use serde::{Deserialize, Serialize};

use beamkit_core::ConnectionError;

/// Abstract transport capability consumed by the send loop.
///
/// The connection object is exclusively owned and mutated by the send-loop
/// thread; no other thread calls these methods.
pub trait Connection: Send {
    /// Open the transport to the device at `index`.
    ///
    /// Refused-class errors (see [`ConnectionError::is_refusal`]) mean the
    /// attempt was categorically rejected and retrying without operator
    /// action will not help.
    fn open(&mut self, index: i32) -> Result<(), ConnectionError>;

    /// Close the transport. Idempotent.
    fn close(&mut self);

    /// Whether the transport is currently usable.
    fn is_connected(&self) -> bool;

    /// Transmit one complete wire frame in a single call.
    fn write(&mut self, frame: &[u8]) -> Result<(), ConnectionError>;

    /// Transmit one bulk list chunk. Only list-protocol transports
    /// implement this.
    fn write_list_chunk(&mut self, _chunk: &[u8]) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported)
    }

    /// Read the device's fixed-size status reply.
    fn read_status(&mut self) -> Result<Vec<u8>, ConnectionError>;

    /// Report the bridge chip revision, where the transport knows it.
    /// Optional capability negotiation; defaults to unsupported.
    fn chip_version(&mut self) -> Result<i32, ConnectionError> {
        Err(ConnectionError::Unsupported)
    }
}

/// Serial link parameters for the legacy board family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialParams {
    /// Port path ("/dev/ttyUSB0", "COM3"); empty selects by device index
    /// from the enumerated candidate list.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Stop bits (1-2).
    pub stop_bits: u8,
    /// Parity setting.
    pub parity: SerialParity,
    /// Hardware flow control.
    pub flow_control: bool,
    /// Per-read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Length of one status reply on this link.
    pub status_reply_len: usize,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 100,
            status_reply_len: 6,
        }
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Placeholder transport that swallows everything and reports an OK status.
///
/// Used as the default wiring before a real transport is selected, and in
/// smoke tests. The canned reply is legacy-shaped by default.
#[derive(Debug, Clone)]
pub struct NoOpConnection {
    connected: bool,
    reply: Vec<u8>,
}

impl NoOpConnection {
    /// Create a no-op connection answering with a legacy OK status.
    pub fn new() -> Self {
        Self {
            connected: false,
            reply: vec![0xFF, 0xCE, 0x00, 0x00, 0x00, 0x00],
        }
    }

    /// Create a no-op connection with a custom canned status reply.
    pub fn with_reply(reply: Vec<u8>) -> Self {
        Self {
            connected: false,
            reply,
        }
    }
}

impl Default for NoOpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for NoOpConnection {
    fn open(&mut self, index: i32) -> Result<(), ConnectionError> {
        tracing::debug!(index, "no-op connection opened");
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::NotOpen);
        }
        tracing::trace!(len = frame.len(), "no-op write");
        Ok(())
    }

    fn write_list_chunk(&mut self, chunk: &[u8]) -> Result<(), ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::NotOpen);
        }
        tracing::trace!(len = chunk.len(), "no-op list write");
        Ok(())
    }

    fn read_status(&mut self) -> Result<Vec<u8>, ConnectionError> {
        if !self.connected {
            return Err(ConnectionError::NotOpen);
        }
        Ok(self.reply.clone())
    }
}
