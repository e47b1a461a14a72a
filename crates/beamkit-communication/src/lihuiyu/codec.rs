//! Fixed-frame wire codec for the Lihuiyu board family.
//!
//! Every frame is exactly 32 bytes: a `0x00` leader, 30 payload bytes
//! (right-padded), and one checksum byte. The checksum is the board's own
//! table-fold scheme, reproduced bit-for-bit; the board silently drops any
//! frame whose checksum does not match, so these bytes are load-bearing.

use beamkit_core::FrameError;

/// Maximum payload bytes one frame carries.
pub const PAYLOAD_LEN: usize = 30;
/// Total wire frame length: leader + payload + checksum.
pub const FRAME_LEN: usize = 32;

/// Every frame starts with this leader byte.
const FRAME_LEADER: u8 = 0x00;

/// Trailing marker selecting alternate padding: strip it and repeat the
/// preceding payload byte instead of the default fill.
const PAD_MARKER: u8 = b'#';

/// Default pad byte. Harmless to the board when repeated.
const PAD_DEFAULT: u8 = b'F';

/// Nibble-fold table used by the board firmware. Entries 0-15 fold the low
/// nibble, entries 16-31 the high nibble.
const CRC_TABLE: [u8; 32] = [
    0x00, 0x5E, 0xBC, 0xE2, 0x61, 0x3F, 0xDD, 0x83, 0xC2, 0x9C, 0x7E, 0x20, 0xA3, 0xFD, 0x1F,
    0x41, 0x00, 0x9D, 0x23, 0xBE, 0x46, 0xDB, 0x65, 0xF8, 0x8C, 0x11, 0xAF, 0x32, 0xCA, 0x57,
    0xE9, 0x74,
];

/// Which checksum variant a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Correct checksum; the board accepts the frame.
    #[default]
    Valid,
    /// Checksum complemented with `0xFF`; the board rejects the frame
    /// without retrying. Used to deliberately provoke an error reply.
    Complemented,
}

/// Fold `data` through the board's checksum table.
pub fn checksum(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        crc = CRC_TABLE[(crc & 0x0F) as usize] ^ CRC_TABLE[16 + ((crc >> 4) & 0x0F) as usize];
    }
    crc
}

/// Right-pad `payload` to the full 30 bytes per the board's padding rules.
///
/// A trailing `'#'` selects repeat-previous-byte padding; an `"AT"` prefix
/// (board subsystem commands) selects NUL padding; everything else pads
/// with `'F'`.
pub fn pad(payload: &[u8]) -> Result<[u8; PAYLOAD_LEN], FrameError> {
    if payload.len() > PAYLOAD_LEN {
        return Err(FrameError::OversizedPayload {
            len: payload.len(),
            max: PAYLOAD_LEN,
        });
    }
    let (data, fill) = match payload.split_last() {
        Some((&PAD_MARKER, head)) => (head, head.last().copied().unwrap_or(PAD_DEFAULT)),
        _ if payload.starts_with(b"AT") => (payload, 0x00),
        _ => (payload, PAD_DEFAULT),
    };
    let mut padded = [0u8; PAYLOAD_LEN];
    padded[..data.len()].copy_from_slice(data);
    padded[data.len()..].fill(fill);
    Ok(padded)
}

/// Build one complete 32-byte wire frame from `payload`.
pub fn encode(payload: &[u8], mode: ChecksumMode) -> Result<[u8; FRAME_LEN], FrameError> {
    let padded = pad(payload)?;
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = FRAME_LEADER;
    frame[1..FRAME_LEN - 1].copy_from_slice(&padded);
    let crc = checksum(&padded);
    frame[FRAME_LEN - 1] = match mode {
        ChecksumMode::Valid => crc,
        ChecksumMode::Complemented => crc ^ 0xFF,
    };
    Ok(frame)
}

/// Whether `frame` is a well-formed wire frame with a matching checksum.
pub fn verify(frame: &[u8]) -> bool {
    frame.len() == FRAME_LEN
        && frame[0] == FRAME_LEADER
        && checksum(&frame[1..FRAME_LEN - 1]) == frame[FRAME_LEN - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Bitwise reference: reflected polynomial 0x8C, which the fold table
    /// encodes as two nibble lookups.
    fn checksum_bitwise(data: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn single_byte_frame_pads_with_f() {
        let frame = encode(b"A", ChecksumMode::Valid).expect("encode");
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame[0], 0x00);
        assert_eq!(frame[1], b'A');
        assert!(frame[2..31].iter().all(|&b| b == b'F'));
        assert_eq!(frame[31], checksum(&frame[1..31]));
    }

    #[test]
    fn empty_payload_pads_to_all_f() {
        let frame = encode(b"", ChecksumMode::Valid).expect("encode");
        assert!(frame[1..31].iter().all(|&b| b == b'F'));
        assert!(frame[1..31].iter().all(|&b| b != 0x00));
    }

    #[test]
    fn pad_marker_repeats_preceding_byte() {
        let padded = pad(b"zz#").expect("pad");
        assert!(padded.iter().all(|&b| b == b'z'));

        let padded = pad(b"G0z#").expect("pad");
        assert_eq!(&padded[..3], b"G0z");
        assert!(padded[3..].iter().all(|&b| b == b'z'));
    }

    #[test]
    fn bare_pad_marker_falls_back_to_f() {
        let padded = pad(b"#").expect("pad");
        assert!(padded.iter().all(|&b| b == b'F'));
    }

    #[test]
    fn at_prefix_pads_with_nul() {
        let padded = pad(b"AT1234").expect("pad");
        assert_eq!(&padded[..6], b"AT1234");
        assert!(padded[6..].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn oversized_payload_is_a_contract_error() {
        let err = encode(&[b'X'; 31], ChecksumMode::Valid).expect_err("oversize");
        assert!(matches!(err, FrameError::OversizedPayload { len: 31, max: 30 }));
    }

    #[test]
    fn full_payload_is_untouched() {
        let payload = [b'M'; 30];
        let padded = pad(&payload).expect("pad");
        assert_eq!(padded, payload);
    }

    #[test]
    fn complemented_mode_flips_only_the_checksum() {
        let good = encode(b"G001", ChecksumMode::Valid).expect("encode");
        let bad = encode(b"G001", ChecksumMode::Complemented).expect("encode");
        assert_eq!(good[..31], bad[..31]);
        assert_eq!(good[31] ^ 0xFF, bad[31]);
        assert!(verify(&good));
        assert!(!verify(&bad));
    }

    #[test]
    fn checksum_pinned_values() {
        assert_eq!(checksum(&[]), 0x00);
        assert_eq!(checksum(&[0x01]), 0x5E);
        assert_eq!(checksum(&[0x10]), 0x9D);
        assert_eq!(checksum(&[0x01, 0x10]), 0x59);
    }

    #[test]
    fn verify_rejects_malformed_frames() {
        let frame = encode(b"G0", ChecksumMode::Valid).expect("encode");
        assert!(verify(&frame));
        assert!(!verify(&frame[..31]));

        let mut tampered = frame;
        tampered[5] ^= 0x01;
        assert!(!verify(&tampered));

        let mut bad_leader = frame;
        bad_leader[0] = 0x01;
        assert!(!verify(&bad_leader));
    }

    proptest! {
        #[test]
        fn table_fold_matches_bitwise_reference(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(checksum(&data), checksum_bitwise(&data));
        }

        #[test]
        fn encoded_frames_always_verify(payload in proptest::collection::vec(any::<u8>(), 0..=30)) {
            let frame = encode(&payload, ChecksumMode::Valid).unwrap();
            prop_assert!(verify(&frame));
            let failed = encode(&payload, ChecksumMode::Complemented).unwrap();
            prop_assert!(!verify(&failed));
        }
    }
}
