//! Status reply classification for the Lihuiyu board family.
//!
//! The board answers every status request with a fixed 6-byte record; the
//! byte at index 1 carries the machine state. Everything else in the
//! record is diagnostic and passed through raw for logging.

use beamkit_core::{ConnectionError, DeviceStatus};

/// Length of one status reply.
pub const REPLY_LEN: usize = 6;

/// Frame confirmed over the serial bridge (M3 boards).
pub const STATUS_SERIAL_CONFIRMED: u8 = 0xCC;
/// Ready for the next frame.
pub const STATUS_OK: u8 = 0xCE;
/// Last frame rejected (bad checksum or malformed).
pub const STATUS_ERROR: u8 = 0xCF;
/// Buffer drained, job finished.
pub const STATUS_FINISHED: u8 = 0xEC;
/// On-board buffer full; hold off.
pub const STATUS_BUSY: u8 = 0xEE;
/// Supply voltage too low to fire.
pub const STATUS_POWER_LOW: u8 = 0xEF;

/// Classify one raw status reply.
///
/// A reply shorter than two bytes cannot carry a state byte and is a
/// transport fault, not an unknown status.
pub fn classify(reply: &[u8]) -> Result<DeviceStatus, ConnectionError> {
    if reply.len() < 2 {
        return Err(ConnectionError::ShortStatusReply {
            expected: REPLY_LEN,
            got: reply.len(),
        });
    }
    Ok(match reply[1] {
        STATUS_SERIAL_CONFIRMED => DeviceStatus::SerialConfirmed,
        STATUS_OK => DeviceStatus::Ok,
        STATUS_ERROR => DeviceStatus::Error,
        STATUS_FINISHED => DeviceStatus::Finished,
        STATUS_BUSY => DeviceStatus::Busy,
        STATUS_POWER_LOW => DeviceStatus::PowerLow,
        other => DeviceStatus::Unknown(other),
    })
}
