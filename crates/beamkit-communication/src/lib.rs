//! # BeamKit Communication
//!
//! Wire protocols and the send-loop engine for BeamKit laser controllers.
//! One generic controller drives two board families: the Lihuiyu legacy
//! protocol (32-byte checksummed frames over serial/USB) and the Galvo
//! list protocol (12-byte binary operations in bulk chunks).
//!
//! Producers talk to a [`Controller`] handle; a dedicated send-loop thread
//! owns the transport and feeds the device as fast as its tiny buffer
//! allows, surviving pauses, aborts, rejections, and transport drops
//! without corrupting the job stream.

pub mod connection;
pub mod controller;
pub mod galvo;
pub mod lihuiyu;

pub use connection::{
    serial::{list_ports, SerialConnection, SerialPortInfo},
    Connection, NoOpConnection, SerialParams, SerialParity,
};

pub use controller::{
    Controller, ControllerConfig, Directive, Extraction, Protocol, QueueSource, StatusRead,
    WireFrame,
};

pub use galvo::{GalvoController, GalvoOp, GalvoProtocol};
pub use lihuiyu::{LihuiyuController, LihuiyuProtocol};
