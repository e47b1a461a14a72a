//! Protocol family strategy.
//!
//! One generic send loop drives every supported board family. Everything
//! family-specific — how queue bytes become wire frames, how status is
//! solicited and classified, what an abort looks like on the wire — lives
//! behind the [`Protocol`] trait. The loop stays byte-agnostic: it sees
//! opaque frames, directives, and classified status codes.

use std::collections::VecDeque;

use beamkit_core::{ConnectionError, DeviceStatus};

use crate::connection::Connection;

/// Which queue lane an extraction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSource {
    /// Interrupt-style lane, always drained first.
    Realtime,
    /// Ordinary job lane.
    Normal,
}

/// Engine action requested by in-band control bytes.
///
/// Directives are applied in extraction order after the frame (if any) is
/// confirmed on the wire, so a command line carrying a trailing directive
/// still delivers its payload first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Hold normal traffic (pause, or escalate an existing pause to busy).
    Pause,
    /// Release a hold (de-escalate busy to paused, or resume from pause).
    Resume,
    /// Poll until the device reports idle before taking more work.
    WaitFinished,
    /// Drop all queued work, send the family's abort frames, terminate.
    Abort,
    /// Terminate the send loop; everything queued ahead of this directive
    /// has already been sent.
    Quit,
}

/// One complete wire-level transmission unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Transmitted with [`Connection::write`].
    Single(Vec<u8>),
    /// Transmitted with [`Connection::write_list_chunk`].
    Bulk(Vec<u8>),
}

impl WireFrame {
    /// The raw bytes of this frame.
    pub fn bytes(&self) -> &[u8] {
        match self {
            WireFrame::Single(bytes) | WireFrame::Bulk(bytes) => bytes,
        }
    }

    /// Consume the frame, yielding its raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            WireFrame::Single(bytes) | WireFrame::Bulk(bytes) => bytes,
        }
    }
}

/// Result of scanning the queues for the next actionable unit.
///
/// Extraction is a pure peek: nothing is removed from the queues until the
/// send loop commits `consumed` units after the frame is confirmed.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Frame to put on the wire, if the scan produced one.
    pub frame: Option<WireFrame>,
    /// Engine actions to apply after the frame is confirmed, in order.
    pub directives: Vec<Directive>,
    /// The device is expected to reject this frame; a device error reply
    /// confirms delivery instead of counting as a rejection.
    pub expect_rejection: bool,
    /// Queue units to commit away once the cycle completes.
    pub consumed: usize,
    /// Lane the scan consumed from.
    pub source: QueueSource,
}

impl Extraction {
    /// An extraction that consumes `consumed` units without a frame.
    pub fn directive_only(source: QueueSource, consumed: usize) -> Self {
        Self {
            frame: None,
            directives: Vec::new(),
            expect_rejection: false,
            consumed,
            source,
        }
    }

    /// An extraction transmitting `frame` and consuming `consumed` units.
    pub fn frame(source: QueueSource, frame: WireFrame, consumed: usize) -> Self {
        Self {
            frame: Some(frame),
            directives: Vec::new(),
            expect_rejection: false,
            consumed,
            source,
        }
    }
}

/// One solicited (or pushed) status reply, already classified
#[derive(Debug, Clone)]
pub struct StatusRead {
    /// Raw reply bytes as read from the transport.
    pub raw: Vec<u8>,
    /// Classified meaning.
    pub code: DeviceStatus,
}

/// Board-family strategy plugged into the generic send loop.
pub trait Protocol: Send {
    /// Queue unit for this family: raw bytes for stream protocols,
    /// whole operations for list protocols.
    type Unit: Send + Clone + 'static;

    /// Peek the queues and produce the next actionable unit, if any.
    ///
    /// `allow_normal` is false while the controller holds normal traffic;
    /// only the realtime lane may produce work then. Implementations must
    /// not assume the extraction will complete: the same peek may be
    /// re-run after an error.
    fn extract(
        &mut self,
        realtime: &VecDeque<Self::Unit>,
        normal: &VecDeque<Self::Unit>,
        allow_normal: bool,
    ) -> Option<Extraction>;

    /// Perform one status exchange with the device.
    fn poll(&mut self, conn: &mut dyn Connection) -> Result<StatusRead, ConnectionError>;

    /// Frames to transmit when an abort directive fires, in order.
    fn abort_frames(&self) -> Vec<WireFrame> {
        Vec::new()
    }

    /// Observe a confirmed frame. Families that track stream state (open
    /// lists, trailing markers) update it here.
    fn record_sent(&mut self, _frame: &WireFrame) {}
}
