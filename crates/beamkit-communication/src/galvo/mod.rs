//! Galvo board family: the binary list protocol.
//!
//! Galvo boards take whole 12-byte operations instead of a byte stream.
//! List-stream operations (opcode `>= 0x8000`) upload in 3072-byte bulk
//! chunks; control operations go out as single writes. There is no
//! checksum — reliability comes from polling the board's condition
//! register and terminating every uploaded list with a pair of
//! end-of-list markers before execution is triggered.
//!
//! [`GalvoController`] wires [`GalvoProtocol`] into the generic engine.

pub mod codec;
pub mod command;
pub mod protocol;
pub mod status;

pub use command::GalvoOp;
pub use protocol::{GalvoController, GalvoProtocol};
