//! Telemetry signals emitted by the controller engine.
//!
//! The send loop reports every observable change — state transitions, queue
//! depth, transmitted frames, raw status reads, refusal escalation, and
//! connection lifecycle — as a [`ControllerSignal`] published on a
//! [`SignalBus`]. Consumers (a GUI, a logger, a test harness) subscribe
//! either with a synchronous handler or an async broadcast receiver.
//!
//! One bus exists per controller; multiple devices run side by side without
//! sharing telemetry streams.

pub mod bus;
pub mod signals;

pub use bus::{SignalBus, SignalBusConfig, SignalBusError, SignalFilter, SubscriptionId};
pub use signals::ControllerSignal;
