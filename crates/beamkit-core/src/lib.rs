//! # BeamKit Core
//!
//! Core types for the BeamKit laser-controller engine.
//! Provides the error taxonomy, the send-loop and connection state
//! machines, the classified device status, and the telemetry signal bus.

pub mod error;
pub mod signal;
pub mod state;

pub use error::{ConnectionError, ControllerError, Error, FrameError, Result};

pub use state::{ConnectionState, ControllerState, DeviceStatus};

// Re-export the signal bus for convenience
pub use signal::{
    ControllerSignal, SignalBus, SignalBusConfig, SignalBusError, SignalFilter, SubscriptionId,
};
