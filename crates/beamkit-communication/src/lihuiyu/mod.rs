//! Lihuiyu board family: the fixed-32-byte checksummed packet protocol.
//!
//! These are the K40-style boards driven over USB or a UART bridge. The
//! job stream is raw bytes; framing is 30 payload bytes plus a table-fold
//! checksum, and flow control is a status poll before and after every
//! frame because the board buffers only a handful of bytes.

pub mod codec;
pub mod protocol;
pub mod status;

pub use codec::{checksum, encode, pad, verify, ChecksumMode, FRAME_LEN, PAYLOAD_LEN};
pub use protocol::{LihuiyuController, LihuiyuProtocol};
pub use status::{classify, REPLY_LEN};
