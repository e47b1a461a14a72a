//! Extraction and chunk assembly for the Galvo board family.
//!
//! The job stream is whole 12-byte operations, not raw bytes. Extraction
//! dispatches each unit by its opcode: list-stream ops (high bit set)
//! accumulate into 3072-byte bulk chunks, control ops go out as single
//! writes. The board gives no checksums; the one wire invariant the
//! protocol enforces here is that at least a pair of end-of-list markers
//! reaches the device before an execute command does, so the list
//! processor has a defined stopping point.
//!
//! A run of list ops is chunked as soon as it fills a chunk or a control
//! op closes it; an unterminated trailing run stays queued until more ops
//! arrive. Realtime-lane runs flush immediately instead of waiting.

use std::collections::VecDeque;

use tracing::error;

use beamkit_core::ConnectionError;

use super::codec::{self, CHUNK_OPS, OP_LEN};
use super::command::{self, GalvoOp};
use super::status;
use crate::connection::Connection;
use crate::controller::{Controller, Extraction, Protocol, QueueSource, StatusRead, WireFrame};

/// End-of-list markers the device must hold before an execute is sent.
const MARKER_PAIR: usize = 2;

/// Protocol strategy for Galvo boards.
///
/// Tracks just enough stream state to uphold the marker-pair invariant:
/// whether unexecuted list data sits on the device, and how many
/// consecutive end-of-list markers closed the last chunk.
#[derive(Debug, Default)]
pub struct GalvoProtocol {
    list_open: bool,
    trailing_end_markers: usize,
}

impl GalvoProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn extract_lane(&self, lane: &VecDeque<GalvoOp>, source: QueueSource) -> Option<Extraction> {
        let front = lane.front()?;
        if front.is_list_op() {
            let run = lane
                .iter()
                .take(CHUNK_OPS)
                .take_while(|op| op.is_list_op())
                .count();
            // A short run at the tail of the normal lane is still growing;
            // chunk it once it fills or a control op closes it. Realtime
            // runs never wait.
            if run < lane.len() || run == CHUNK_OPS || source == QueueSource::Realtime {
                return Some(Self::chunk_extraction(lane, run, source));
            }
            return None;
        }
        if front.opcode == command::EXECUTE_LIST
            && self.list_open
            && self.trailing_end_markers < MARKER_PAIR
        {
            // The open list is not safely terminated yet; flush a chunk of
            // markers first and leave the execute queued for the next
            // cycle.
            if let Ok(chunk) = codec::build_chunk(&[]) {
                return Some(Extraction::frame(source, WireFrame::Bulk(chunk), 0));
            }
        }
        Some(Extraction::frame(
            source,
            WireFrame::Single(codec::marshal(front).to_vec()),
            1,
        ))
    }

    fn chunk_extraction(lane: &VecDeque<GalvoOp>, run: usize, source: QueueSource) -> Extraction {
        let ops: Vec<GalvoOp> = lane.iter().take(run).copied().collect();
        match codec::build_chunk(&ops) {
            Ok(chunk) => Extraction::frame(source, WireFrame::Bulk(chunk), run),
            Err(err) => {
                // The run is capped at one chunk; reaching this means
                // extraction itself is broken.
                error!(error = %err, run, "dropping unchunkable run");
                Extraction::directive_only(source, run)
            }
        }
    }

    fn single_opcode(bytes: &[u8]) -> Option<u16> {
        let head = bytes.get(..2)?;
        Some(u16::from_le_bytes([head[0], head[1]]))
    }
}

impl Protocol for GalvoProtocol {
    type Unit = GalvoOp;

    fn extract(
        &mut self,
        realtime: &VecDeque<GalvoOp>,
        normal: &VecDeque<GalvoOp>,
        allow_normal: bool,
    ) -> Option<Extraction> {
        if let Some(extraction) = self.extract_lane(realtime, QueueSource::Realtime) {
            return Some(extraction);
        }
        if allow_normal {
            return self.extract_lane(normal, QueueSource::Normal);
        }
        None
    }

    fn poll(&mut self, conn: &mut dyn Connection) -> Result<StatusRead, ConnectionError> {
        let query = codec::marshal(&GalvoOp::simple(command::GET_LIST_STATUS));
        conn.write(&query)?;
        let raw = conn.read_status()?;
        let code = status::classify_register(status::condition_register(&raw)?);
        Ok(StatusRead { raw, code })
    }

    fn abort_frames(&self) -> Vec<WireFrame> {
        // Halt motion first, then drop whatever list data the board holds.
        vec![
            WireFrame::Single(codec::marshal(&GalvoOp::simple(command::STOP_EXECUTE)).to_vec()),
            WireFrame::Single(codec::marshal(&GalvoOp::simple(command::RESET_LIST)).to_vec()),
        ]
    }

    fn record_sent(&mut self, frame: &WireFrame) {
        match frame {
            WireFrame::Bulk(bytes) => {
                self.list_open = true;
                let trailing = bytes
                    .rchunks_exact(OP_LEN)
                    .take_while(|op| {
                        Self::single_opcode(op) == Some(command::LIST_END_OF_LIST)
                    })
                    .count();
                if trailing * OP_LEN == bytes.len() {
                    // An all-marker chunk extends the streak from the
                    // previous chunk instead of restarting it.
                    self.trailing_end_markers = self.trailing_end_markers.saturating_add(trailing);
                } else {
                    self.trailing_end_markers = trailing;
                }
            }
            WireFrame::Single(bytes) => {
                if let Some(opcode) = Self::single_opcode(bytes) {
                    if matches!(
                        opcode,
                        command::EXECUTE_LIST | command::RESET_LIST | command::STOP_LIST
                    ) {
                        self.list_open = false;
                        self.trailing_end_markers = 0;
                    }
                }
            }
        }
    }
}

/// Controller driving a Galvo board.
pub type GalvoController = Controller<GalvoProtocol>;

impl Controller<GalvoProtocol> {
    /// Queue one operation on the normal lane. Never blocks. Starts the
    /// send loop if it is not running yet.
    pub fn push(&self, op: GalvoOp) {
        self.inner.enqueue_normal([op]);
        self.autostart();
    }

    /// Queue a batch of operations on the normal lane.
    pub fn push_ops(&self, ops: impl IntoIterator<Item = GalvoOp>) {
        self.inner.enqueue_normal(ops);
        self.autostart();
    }

    /// Queue an operation on the realtime lane, ahead of all normal
    /// traffic. This is the interrupt path for stop commands.
    pub fn push_realtime(&self, op: GalvoOp) {
        self.inner.enqueue_realtime([op]);
        self.autostart();
    }
}
