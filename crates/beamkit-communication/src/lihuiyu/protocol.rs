//! Frame extraction and stream routing for the Lihuiyu board family.
//!
//! The job stream is raw bytes with in-band control characters. Extraction
//! scans a queue lane for the next frame-sized window (up to 30 bytes, or
//! up to the next newline, whichever is shorter), recognizes control
//! characters at the line boundary, and hands the engine an encoded frame
//! plus classified directives. The rest of the engine never sees a raw
//! directive byte.
//!
//! Control characters and where they are recognized:
//! - line-trailing (before the newline): `-` wait-finished, `*` abort,
//!   `!` pause, `&` resume, `%` fail-checksum for this frame, `\x18` quit.
//!   Stacked trailers apply left to right.
//! - a short window made entirely of control characters (the bare `"!"`,
//!   `"&"`, `"*"` realtime interrupts): applied in order, no frame.
//! - `~` toggles realtime routing inside [`write`](Controller::write) and
//!   never reaches a queue.
//!
//! Control characters elsewhere in a line are payload. The board's own
//! command alphabet does not use them, so this only matters for malformed
//! producers.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use tracing::{error, trace};

use beamkit_core::ConnectionError;

use super::codec::{self, ChecksumMode, PAYLOAD_LEN};
use super::status;
use crate::connection::Connection;
use crate::controller::{
    Controller, Directive, Extraction, Protocol, QueueSource, StatusRead, WireFrame,
};

const WAIT_BYTE: u8 = b'-';
const ABORT_BYTE: u8 = b'*';
const PAUSE_BYTE: u8 = b'!';
const RESUME_BYTE: u8 = b'&';
const FAIL_CHECKSUM_BYTE: u8 = b'%';
const QUIT_BYTE: u8 = 0x18;
const REALTIME_TOGGLE: u8 = b'~';

/// Reset and discard the in-flight plot: the wire abort sequence.
const ABORT_PAYLOAD: &[u8] = b"IPP";

fn is_directive_byte(byte: u8) -> bool {
    matches!(
        byte,
        WAIT_BYTE | ABORT_BYTE | PAUSE_BYTE | RESUME_BYTE | FAIL_CHECKSUM_BYTE | QUIT_BYTE
    )
}

/// Protocol strategy for Lihuiyu boards. Stateless: every extraction is a
/// pure function of the queue contents.
#[derive(Debug, Default)]
pub struct LihuiyuProtocol;

impl LihuiyuProtocol {
    pub fn new() -> Self {
        Self
    }

    fn extract_lane(lane: &VecDeque<u8>, source: QueueSource) -> Option<Extraction> {
        if lane.is_empty() {
            return None;
        }
        let window = lane.len().min(PAYLOAD_LEN);
        if let Some(pos) = lane.iter().take(window).position(|&b| b == b'\n') {
            let line: Vec<u8> = lane.iter().take(pos).copied().collect();
            return Some(Self::line_extraction(&line, pos + 1, source));
        }
        if window == PAYLOAD_LEN {
            let last = lane.get(PAYLOAD_LEN - 1).copied().unwrap_or(0);
            if is_directive_byte(last) {
                return match lane.get(PAYLOAD_LEN).copied() {
                    // The window ends on a control character that belongs
                    // to the following newline; pull the line in whole.
                    Some(b'\n') => {
                        let line: Vec<u8> = lane.iter().take(PAYLOAD_LEN).copied().collect();
                        Some(Self::line_extraction(&line, PAYLOAD_LEN + 1, source))
                    }
                    // More payload follows: the character was data.
                    Some(_) => Self::raw_extraction(lane, source),
                    // Cannot tell yet; wait for the next byte.
                    None => None,
                };
            }
            return Self::raw_extraction(lane, source);
        }
        if lane.iter().take(window).all(|&b| is_directive_byte(b)) {
            return Some(Self::directive_extraction(lane, window, source));
        }
        // Partial line; wait for the newline or for the window to fill.
        None
    }

    /// A newline-terminated line: strip trailing control characters, encode
    /// the remainder. An empty remainder still produces an all-pad frame.
    fn line_extraction(line: &[u8], consumed: usize, source: QueueSource) -> Extraction {
        let mut end = line.len();
        let mut stacked = Vec::new();
        let mut mode = ChecksumMode::Valid;
        while end > 0 {
            match line[end - 1] {
                WAIT_BYTE => stacked.push(Directive::WaitFinished),
                ABORT_BYTE => stacked.push(Directive::Abort),
                PAUSE_BYTE => stacked.push(Directive::Pause),
                RESUME_BYTE => stacked.push(Directive::Resume),
                QUIT_BYTE => stacked.push(Directive::Quit),
                FAIL_CHECKSUM_BYTE => mode = ChecksumMode::Complemented,
                _ => break,
            }
            end -= 1;
        }
        stacked.reverse();

        let frame = match codec::encode(&line[..end], mode) {
            Ok(frame) => Some(WireFrame::Single(frame.to_vec())),
            Err(err) => {
                // Window sizing keeps payloads in bounds; reaching this
                // means extraction itself is broken.
                error!(error = %err, "dropping unencodable line");
                None
            }
        };
        Extraction {
            frame,
            directives: stacked,
            expect_rejection: mode == ChecksumMode::Complemented,
            consumed,
            source,
        }
    }

    /// A full window with no newline: ship it as-is.
    fn raw_extraction(lane: &VecDeque<u8>, source: QueueSource) -> Option<Extraction> {
        let payload: Vec<u8> = lane.iter().take(PAYLOAD_LEN).copied().collect();
        match codec::encode(&payload, ChecksumMode::Valid) {
            Ok(frame) => Some(Extraction::frame(
                source,
                WireFrame::Single(frame.to_vec()),
                PAYLOAD_LEN,
            )),
            Err(err) => {
                error!(error = %err, "dropping unencodable window");
                Some(Extraction::directive_only(source, PAYLOAD_LEN))
            }
        }
    }

    /// A window of nothing but control characters: the realtime interrupt
    /// path. Applied in order, no frame.
    fn directive_extraction(lane: &VecDeque<u8>, window: usize, source: QueueSource) -> Extraction {
        let mut extraction = Extraction::directive_only(source, window);
        for &byte in lane.iter().take(window) {
            match byte {
                WAIT_BYTE => extraction.directives.push(Directive::WaitFinished),
                ABORT_BYTE => extraction.directives.push(Directive::Abort),
                PAUSE_BYTE => extraction.directives.push(Directive::Pause),
                RESUME_BYTE => extraction.directives.push(Directive::Resume),
                QUIT_BYTE => extraction.directives.push(Directive::Quit),
                // Fail-checksum binds to a line; alone it has nothing to
                // corrupt.
                FAIL_CHECKSUM_BYTE => trace!("ignoring detached fail-checksum directive"),
                _ => {}
            }
        }
        extraction
    }
}

impl Protocol for LihuiyuProtocol {
    type Unit = u8;

    fn extract(
        &mut self,
        realtime: &VecDeque<u8>,
        normal: &VecDeque<u8>,
        allow_normal: bool,
    ) -> Option<Extraction> {
        if let Some(extraction) = Self::extract_lane(realtime, QueueSource::Realtime) {
            return Some(extraction);
        }
        if allow_normal {
            return Self::extract_lane(normal, QueueSource::Normal);
        }
        None
    }

    fn poll(&mut self, conn: &mut dyn Connection) -> Result<StatusRead, ConnectionError> {
        let raw = conn.read_status()?;
        let code = status::classify(&raw)?;
        Ok(StatusRead { raw, code })
    }

    fn abort_frames(&self) -> Vec<WireFrame> {
        match codec::encode(ABORT_PAYLOAD, ChecksumMode::Valid) {
            Ok(frame) => vec![WireFrame::Single(frame.to_vec())],
            Err(_) => Vec::new(),
        }
    }
}

/// Controller driving a Lihuiyu board.
pub type LihuiyuController = Controller<LihuiyuProtocol>;

impl Controller<LihuiyuProtocol> {
    /// Submit job bytes to the normal queue. Never blocks.
    ///
    /// A `~` toggles realtime-exception routing: bytes between a `~` pair
    /// go to the realtime queue instead. The toggle survives across calls,
    /// so an unclosed `~` keeps routing subsequent writes to realtime.
    /// Starts the send loop if it is not running yet.
    pub fn write(&self, data: &[u8]) {
        let mut rest = data;
        let mut realtime = self.inner.realtime_mode.load(Ordering::Relaxed);
        while let Some(idx) = rest.iter().position(|&b| b == REALTIME_TOGGLE) {
            let (span, tail) = rest.split_at(idx);
            self.enqueue_span(span, realtime);
            realtime = !realtime;
            rest = &tail[1..];
        }
        self.enqueue_span(rest, realtime);
        self.inner.realtime_mode.store(realtime, Ordering::Relaxed);
        self.autostart();
    }

    /// Submit bytes straight to the realtime queue, bypassing the toggle.
    /// This is the interrupt path for pause/resume/abort directives.
    pub fn realtime_write(&self, data: &[u8]) {
        self.enqueue_span(data, true);
        self.autostart();
    }

    fn enqueue_span(&self, span: &[u8], realtime: bool) {
        if span.is_empty() {
            return;
        }
        if realtime {
            if span.contains(&ABORT_BYTE) {
                // Let an abort break out of an in-progress wait-finished
                // hold before it is even dequeued.
                self.inner.abort_waiting.store(true, Ordering::Relaxed);
            }
            self.inner.enqueue_realtime(span.iter().copied());
        } else {
            self.inner.enqueue_normal(span.iter().copied());
        }
    }
}
