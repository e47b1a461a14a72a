//! Generic controller engine: queues, state machine, send loop.
//!
//! The engine is board-family agnostic. Family specifics (framing, status
//! classification, abort sequences) plug in through
//! [`Protocol`](protocol::Protocol); transports plug in through
//! [`Connection`](crate::connection::Connection).

pub mod config;
pub mod machine;
pub mod protocol;
pub(crate) mod queue;

pub use config::ControllerConfig;
pub use machine::Controller;
pub use protocol::{Directive, Extraction, Protocol, QueueSource, StatusRead, WireFrame};
