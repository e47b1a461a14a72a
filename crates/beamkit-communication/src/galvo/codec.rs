//! Wire marshaling for the Galvo board family.
//!
//! No checksums here; the link is reliable USB bulk transfer and the board
//! confirms progress through list-status polling. Correctness is purely a
//! matter of exact widths: 12 bytes per op, 3072 bytes per chunk, always.

use beamkit_core::FrameError;

use super::command::GalvoOp;

/// Wire width of one op.
pub const OP_LEN: usize = 12;
/// Ops per bulk chunk.
pub const CHUNK_OPS: usize = 256;
/// Wire width of one bulk chunk.
pub const CHUNK_LEN: usize = OP_LEN * CHUNK_OPS;

/// Marshal one op to its 12-byte wire form.
pub fn marshal(op: &GalvoOp) -> [u8; OP_LEN] {
    let mut bytes = [0u8; OP_LEN];
    bytes[0..2].copy_from_slice(&op.opcode.to_le_bytes());
    for (i, param) in op.params.iter().enumerate() {
        let at = 2 + i * 2;
        bytes[at..at + 2].copy_from_slice(&param.to_le_bytes());
    }
    bytes
}

/// Unmarshal one 12-byte record back into an op.
pub fn unmarshal(bytes: &[u8]) -> Result<GalvoOp, FrameError> {
    if bytes.len() != OP_LEN {
        return Err(FrameError::MalformedOp {
            expected: OP_LEN,
            got: bytes.len(),
        });
    }
    let word = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    Ok(GalvoOp {
        opcode: word(0),
        params: [word(1), word(2), word(3), word(4), word(5)],
    })
}

/// Concatenate up to 256 ops into one full-size bulk chunk, padding the
/// remainder with end-of-list markers. The board requires every bulk write
/// to be exactly one chunk long.
pub fn build_chunk(ops: &[GalvoOp]) -> Result<Vec<u8>, FrameError> {
    if ops.len() > CHUNK_OPS {
        return Err(FrameError::OversizedChunk {
            ops: ops.len(),
            max: CHUNK_OPS,
        });
    }
    let mut chunk = Vec::with_capacity(CHUNK_LEN);
    for op in ops {
        chunk.extend_from_slice(&marshal(op));
    }
    let pad = marshal(&GalvoOp::end_of_list());
    for _ in ops.len()..CHUNK_OPS {
        chunk.extend_from_slice(&pad);
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galvo::command::{LIST_END_OF_LIST, LIST_JUMP_TO, LIST_MARK_TO};
    use proptest::prelude::*;

    #[test]
    fn marshal_is_little_endian() {
        let op = GalvoOp::new(LIST_MARK_TO, [0x0001, 0x0002, 0x1234, 0, 0xFFFF]);
        let bytes = marshal(&op);
        assert_eq!(
            bytes,
            [0x05, 0x80, 0x01, 0x00, 0x02, 0x00, 0x34, 0x12, 0x00, 0x00, 0xFF, 0xFF]
        );
    }

    #[test]
    fn unmarshal_rejects_wrong_widths() {
        assert!(matches!(
            unmarshal(&[0u8; 11]),
            Err(FrameError::MalformedOp {
                expected: 12,
                got: 11
            })
        ));
        assert!(matches!(
            unmarshal(&[0u8; 13]),
            Err(FrameError::MalformedOp { got: 13, .. })
        ));
    }

    #[test]
    fn chunk_is_padded_with_end_markers() {
        let ops = [
            GalvoOp::new(LIST_JUMP_TO, [10, 20, 0, 0, 0]),
            GalvoOp::new(LIST_MARK_TO, [30, 40, 0, 0, 0]),
        ];
        let chunk = build_chunk(&ops).expect("chunk");
        assert_eq!(chunk.len(), CHUNK_LEN);
        assert_eq!(unmarshal(&chunk[0..12]).unwrap(), ops[0]);
        assert_eq!(unmarshal(&chunk[12..24]).unwrap(), ops[1]);
        for record in chunk[24..].chunks_exact(OP_LEN) {
            assert_eq!(unmarshal(record).unwrap().opcode, LIST_END_OF_LIST);
        }
    }

    #[test]
    fn empty_chunk_is_all_end_markers() {
        let chunk = build_chunk(&[]).expect("chunk");
        assert_eq!(chunk.len(), CHUNK_LEN);
        for record in chunk.chunks_exact(OP_LEN) {
            assert_eq!(unmarshal(record).unwrap().opcode, LIST_END_OF_LIST);
        }
    }

    #[test]
    fn full_chunk_is_untouched() {
        let ops = vec![GalvoOp::new(LIST_MARK_TO, [1, 2, 3, 4, 5]); CHUNK_OPS];
        let chunk = build_chunk(&ops).expect("chunk");
        assert_eq!(chunk.len(), CHUNK_LEN);
        assert_eq!(
            unmarshal(&chunk[CHUNK_LEN - OP_LEN..]).unwrap().opcode,
            LIST_MARK_TO
        );
    }

    #[test]
    fn oversized_chunk_is_a_contract_error() {
        let ops = vec![GalvoOp::end_of_list(); CHUNK_OPS + 1];
        assert!(matches!(
            build_chunk(&ops),
            Err(FrameError::OversizedChunk { ops: 257, max: 256 })
        ));
    }

    proptest! {
        #[test]
        fn marshal_roundtrip(
            opcode in any::<u16>(),
            p0 in any::<u16>(),
            p1 in any::<u16>(),
            p2 in any::<u16>(),
            p3 in any::<u16>(),
            p4 in any::<u16>(),
        ) {
            let op = GalvoOp::new(opcode, [p0, p1, p2, p3, p4]);
            prop_assert_eq!(unmarshal(&marshal(&op)).unwrap(), op);
        }
    }
}
