//! Signal type definitions for the telemetry bus.
//!
//! Signals are designed to be cloneable and serializable for logging and
//! replay. Each signal carries a stable topic string, which is the name
//! consumers key on.

use serde::{Deserialize, Serialize};

use crate::state::{ConnectionState, ControllerState};

/// Telemetry signal emitted by a controller's send loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerSignal {
    /// The send-loop state changed.
    State {
        /// The state just entered.
        state: ControllerState,
    },
    /// The total queued length changed (enqueue or cursor advance).
    BufferLength {
        /// Units pending across both queues.
        queued: usize,
    },
    /// A wire frame was transmitted and confirmed.
    PacketSent {
        /// The raw frame bytes, for logging and debug capture.
        frame: Vec<u8>,
    },
    /// A raw status reply was read from the device.
    Status {
        /// The raw reply bytes.
        raw: Vec<u8>,
        /// Human-readable classification of the reply.
        text: String,
    },
    /// The connection-refusal counter changed.
    Failing {
        /// Consecutive refusals so far; 0 clears the condition.
        refusals: u32,
    },
    /// The transport connection state changed.
    Connection {
        /// The connection state just entered.
        state: ConnectionState,
    },
}

impl ControllerSignal {
    /// Get the stable topic name of this signal
    pub fn topic(&self) -> &'static str {
        match self {
            ControllerSignal::State { .. } => "controller;state",
            ControllerSignal::BufferLength { .. } => "controller;buffer_length",
            ControllerSignal::PacketSent { .. } => "controller;packet_sent",
            ControllerSignal::Status { .. } => "controller;status",
            ControllerSignal::Failing { .. } => "controller;failing",
            ControllerSignal::Connection { .. } => "controller;connection",
        }
    }

    /// Get a short description of this signal for logging
    pub fn description(&self) -> String {
        match self {
            ControllerSignal::State { state } => format!("Controller state: {}", state),
            ControllerSignal::BufferLength { queued } => format!("Buffer length: {}", queued),
            ControllerSignal::PacketSent { frame } => {
                format!("Packet sent: {} bytes", frame.len())
            }
            ControllerSignal::Status { text, .. } => format!("Device status: {}", text),
            ControllerSignal::Failing { refusals } => {
                format!("Connection failing: {} refusals", refusals)
            }
            ControllerSignal::Connection { state } => format!("Connection: {}", state),
        }
    }
}
