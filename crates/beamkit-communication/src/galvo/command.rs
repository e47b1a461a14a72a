//! Binary operation model for the Galvo board family.
//!
//! Every operation is six little-endian `u16` values on the wire: an
//! opcode and five parameters. Opcodes split into two ranges: control
//! commands (`< 0x8000`) act immediately and are sent as single writes;
//! list-stream commands (`>= 0x8000`) describe the mark program and travel
//! in bulk chunks.

use serde::{Deserialize, Serialize};

/// First opcode of the list-stream range.
pub const LIST_OP_BASE: u16 = 0x8000;

// Control commands (immediate).
pub const DISABLE_LASER: u16 = 0x0002;
pub const ENABLE_LASER: u16 = 0x0004;
pub const EXECUTE_LIST: u16 = 0x0005;
pub const SET_PWM_PULSE_WIDTH: u16 = 0x0006;
pub const GET_VERSION: u16 = 0x0007;
pub const GET_SERIAL_NUMBER: u16 = 0x0009;
pub const GET_LIST_STATUS: u16 = 0x000A;
pub const GET_POSITION_XY: u16 = 0x000C;
pub const GOTO_XY: u16 = 0x000D;
pub const RESET_LIST: u16 = 0x0012;
pub const RESTART_LIST: u16 = 0x0013;
pub const STOP_EXECUTE: u16 = 0x001F;
pub const STOP_LIST: u16 = 0x0020;
pub const WRITE_PORT: u16 = 0x0021;
pub const READ_PORT: u16 = 0x0025;

// List-stream commands (buffered into the mark program).
pub const LIST_JUMP_TO: u16 = 0x8001;
pub const LIST_END_OF_LIST: u16 = 0x8002;
pub const LIST_LASER_ON_POINT: u16 = 0x8003;
pub const LIST_DELAY_TIME: u16 = 0x8004;
pub const LIST_MARK_TO: u16 = 0x8005;
pub const LIST_JUMP_SPEED: u16 = 0x8006;
pub const LIST_LASER_ON_DELAY: u16 = 0x8007;
pub const LIST_LASER_OFF_DELAY: u16 = 0x8008;
pub const LIST_MARK_FREQ: u16 = 0x800A;
pub const LIST_MARK_POWER_RATIO: u16 = 0x800B;
pub const LIST_MARK_SPEED: u16 = 0x800C;

/// One operation: opcode plus five parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalvoOp {
    /// Operation code; the high bit selects list-stream vs. control.
    pub opcode: u16,
    /// Parameter words, meaning defined per opcode.
    pub params: [u16; 5],
}

impl GalvoOp {
    /// An operation with explicit parameters.
    pub fn new(opcode: u16, params: [u16; 5]) -> Self {
        Self { opcode, params }
    }

    /// An operation with zeroed parameters.
    pub fn simple(opcode: u16) -> Self {
        Self {
            opcode,
            params: [0; 5],
        }
    }

    /// The end-of-list marker terminating a mark program.
    pub fn end_of_list() -> Self {
        Self::simple(LIST_END_OF_LIST)
    }

    /// Whether this op belongs to the buffered list stream.
    pub fn is_list_op(&self) -> bool {
        self.opcode >= LIST_OP_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_range_split() {
        assert!(!GalvoOp::simple(EXECUTE_LIST).is_list_op());
        assert!(!GalvoOp::simple(STOP_LIST).is_list_op());
        assert!(GalvoOp::simple(LIST_MARK_TO).is_list_op());
        assert!(GalvoOp::end_of_list().is_list_op());
        assert!(GalvoOp::simple(LIST_OP_BASE).is_list_op());
        assert!(!GalvoOp::simple(LIST_OP_BASE - 1).is_list_op());
    }

    #[test]
    fn end_of_list_shape() {
        let op = GalvoOp::end_of_list();
        assert_eq!(op.opcode, LIST_END_OF_LIST);
        assert_eq!(op.params, [0; 5]);
    }

    #[test]
    fn ops_serialize_for_job_files() {
        let op = GalvoOp::new(LIST_MARK_TO, [100, 200, 0, 0, 1]);
        let json = serde_json::to_string(&op).expect("serialize");
        let back: GalvoOp = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, op);
    }
}
