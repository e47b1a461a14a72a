//! Controller tuning knobs.

use serde::{Deserialize, Serialize};

/// Timing and retry configuration for the send loop.
///
/// Defaults match real hardware pacing; tests shrink the caps and backoffs
/// so failure paths resolve in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Device index handed to `Connection::open`.
    pub device_index: i32,
    /// Hard cap on confirmation polls after a frame is transmitted.
    pub confirm_attempts: usize,
    /// Confirmation polls before micro-delays start being inserted.
    pub confirm_delay_after: usize,
    /// Hard cap on accept-wait polls before transmitting.
    pub accept_attempts: usize,
    /// Sleep between accept-wait polls, in milliseconds.
    pub accept_poll_ms: u64,
    /// Sleep between wait-finished polls, in milliseconds.
    pub wait_poll_ms: u64,
    /// Backoff after a transport error before the next attempt, in
    /// milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Backoff after a refused connection attempt, in milliseconds.
    pub refusal_backoff_ms: u64,
    /// Consecutive refusals before the controller suspends itself and
    /// waits for operator direction.
    pub refusal_limit: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            confirm_attempts: 500,
            confirm_delay_after: 10,
            accept_attempts: 600,
            accept_poll_ms: 50,
            wait_poll_ms: 20,
            reconnect_backoff_ms: 500,
            refusal_backoff_ms: 3000,
            refusal_limit: 5,
        }
    }
}

impl ControllerConfig {
    /// Configuration with short caps and no backoffs, for tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            confirm_attempts: 20,
            confirm_delay_after: 20,
            accept_attempts: 20,
            accept_poll_ms: 0,
            wait_poll_ms: 0,
            reconnect_backoff_ms: 0,
            refusal_backoff_ms: 0,
            ..Default::default()
        }
    }
}
