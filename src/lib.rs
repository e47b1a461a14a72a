//! # BeamKit
//!
//! A laser-controller communication engine for hobby and industrial laser
//! cutters:
//! - Lihuiyu (K40-style M2/M3 Nano) boards over USB or a UART bridge
//! - Galvo marking boards driven by the binary list-command protocol
//!
//! ## Architecture
//!
//! BeamKit is organized as a workspace:
//!
//! 1. **beamkit-core** - Error taxonomy, state machines, classified device
//!    status, telemetry signal bus
//! 2. **beamkit-communication** - Transports, the generic send-loop engine,
//!    and the two board-family protocol strategies
//! 3. **beamkit** - Facade re-exporting the public surface
//!
//! ## Design
//!
//! Every controller owns a dedicated send-loop thread. Producers enqueue
//! job bytes or list operations from any thread without ever blocking on
//! the device; the send loop extracts wire frames, paces them against the
//! device's status replies, and reports progress through the signal bus.
//! A realtime queue lane carries interrupt traffic (pause, resume, abort)
//! past held normal traffic.

pub use beamkit_core::{
    ConnectionError, ConnectionState, ControllerError, ControllerSignal, ControllerState,
    DeviceStatus, Error, FrameError, Result, SignalBus, SignalBusConfig, SignalBusError,
    SignalFilter, SubscriptionId,
};

pub use beamkit_communication::{
    list_ports, Connection, Controller, ControllerConfig, Directive, Extraction, GalvoController,
    GalvoOp, GalvoProtocol, LihuiyuController, LihuiyuProtocol, NoOpConnection, Protocol,
    QueueSource, SerialConnection, SerialParams, SerialParity, SerialPortInfo, StatusRead,
    WireFrame,
};

pub use beamkit_communication::{galvo, lihuiyu};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
/// - Thread names, so send-loop activity is attributable per controller
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
