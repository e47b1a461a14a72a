//! List-status classification for the Galvo board family.
//!
//! The board answers a get-list-status request with an 8-byte reply whose
//! final two bytes form a little-endian condition register. The engine
//! asks the same three questions it asks every family — may I send, did
//! the last unit fail, is the device idle — so the bitfield collapses to
//! the shared status enum; raw bits stay available for diagnostics.

use beamkit_core::{ConnectionError, DeviceStatus};

/// Length of one status reply.
pub const REPLY_LEN: usize = 8;

/// Mark engine currently executing.
pub const COND_BUSY: u16 = 0x0004;
/// List buffer drained.
pub const COND_LIST_EMPTY: u16 = 0x0010;
/// Board ready to accept list data.
pub const COND_READY: u16 = 0x0020;
/// Board-side fault.
pub const COND_ERROR: u16 = 0x0040;

/// Extract the condition register from a raw status reply.
pub fn condition_register(reply: &[u8]) -> Result<u16, ConnectionError> {
    if reply.len() < REPLY_LEN {
        return Err(ConnectionError::ShortStatusReply {
            expected: REPLY_LEN,
            got: reply.len(),
        });
    }
    Ok(u16::from_le_bytes([
        reply[REPLY_LEN - 2],
        reply[REPLY_LEN - 1],
    ]))
}

/// Collapse the condition register into the shared status enum.
///
/// An all-zero register means the board did not actually answer (a live
/// board always raises at least ready or busy).
pub fn classify_register(register: u16) -> DeviceStatus {
    if register == 0 {
        return DeviceStatus::Unknown(0);
    }
    if register & COND_ERROR != 0 {
        return DeviceStatus::Error;
    }
    if register & COND_LIST_EMPTY != 0 && register & COND_BUSY == 0 {
        return DeviceStatus::Finished;
    }
    if register & COND_READY != 0 {
        return DeviceStatus::Ok;
    }
    DeviceStatus::Busy
}
