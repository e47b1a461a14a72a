//! Signal bus implementation.
//!
//! Each controller owns one bus. Synchronous handlers run on the
//! publishing thread (the send loop), so they must return quickly; async
//! consumers take a broadcast receiver instead.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::signals::ControllerSignal;

/// Subscription handle for unsubscribing from signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific signal topics
#[derive(Debug, Clone, Default)]
pub enum SignalFilter {
    /// Receive all signals.
    #[default]
    All,
    /// Receive signals matching any of these topics.
    Topics(Vec<String>),
}

impl SignalFilter {
    /// Build a filter from topic names
    pub fn topics(topics: &[&str]) -> Self {
        SignalFilter::Topics(topics.iter().map(|t| t.to_string()).collect())
    }

    /// Check if a signal matches this filter
    pub fn matches(&self, signal: &ControllerSignal) -> bool {
        match self {
            SignalFilter::All => true,
            SignalFilter::Topics(topics) => topics.iter().any(|t| t == signal.topic()),
        }
    }
}

/// Type alias for signal handler functions
type SignalHandler = Box<dyn Fn(ControllerSignal) + Send + Sync>;

/// Configuration for the signal bus
#[derive(Debug, Clone)]
pub struct SignalBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Whether to keep signal history.
    pub enable_history: bool,
    /// Maximum number of signals to retain in history.
    pub max_history_size: usize,
    /// How long to retain signals in history.
    pub history_retention: Duration,
}

impl Default for SignalBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_history: false,
            max_history_size: 1000,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Signal with timestamp for history
#[derive(Debug, Clone)]
struct TimestampedSignal {
    signal: ControllerSignal,
    timestamp: Instant,
}

/// Error types for signal bus operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalBusError {
    /// No subscribers are listening
    #[error("No active subscribers")]
    NoSubscribers,
    /// Channel is closed
    #[error("Signal channel is closed")]
    ChannelClosed,
    /// Channel is full (lagging)
    #[error("Signal channel is full, {0} signals dropped")]
    ChannelFull(u64),
}

/// Per-controller bus distributing telemetry signals
pub struct SignalBus {
    /// Broadcast channel sender
    sender: broadcast::Sender<ControllerSignal>,
    /// Registered synchronous handlers
    handlers: Arc<RwLock<HashMap<SubscriptionId, (SignalFilter, SignalHandler)>>>,
    /// Signal history (optional)
    history: Arc<RwLock<VecDeque<TimestampedSignal>>>,
    /// Configuration
    config: SignalBusConfig,
}

impl SignalBus {
    /// Create a new signal bus with default configuration
    pub fn new() -> Self {
        Self::with_config(SignalBusConfig::default())
    }

    /// Create a new signal bus with custom configuration
    pub fn with_config(config: SignalBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            config,
        }
    }

    /// Publish a signal to all subscribers
    ///
    /// Returns the number of broadcast receivers that will see the signal,
    /// or an error if nobody is listening at all.
    pub fn publish(&self, signal: ControllerSignal) -> Result<usize, SignalBusError> {
        if self.config.enable_history {
            self.add_to_history(&signal);
        }

        // Call synchronous handlers
        let handlers = self.handlers.read();
        for (_, (filter, handler)) in handlers.iter() {
            if filter.matches(&signal) {
                handler(signal.clone());
            }
        }

        // Send via broadcast channel for async receivers
        match self.sender.send(signal) {
            Ok(count) => Ok(count),
            Err(_) => {
                // No receivers, but handlers may have been called
                if handlers.is_empty() {
                    Err(SignalBusError::NoSubscribers)
                } else {
                    Ok(0)
                }
            }
        }
    }

    /// Subscribe to signals with a synchronous handler
    ///
    /// The handler runs on the publishing thread (the send loop), so it
    /// should return quickly to avoid stalling the packet cycle.
    pub fn subscribe<F>(&self, filter: SignalFilter, handler: F) -> SubscriptionId
    where
        F: Fn(ControllerSignal) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let mut handlers = self.handlers.write();
        handlers.insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for manual signal polling
    ///
    /// Useful for async contexts where signals are consumed in a tokio
    /// task, and for tests that assert on emitted telemetry.
    pub fn receiver(&self) -> broadcast::Receiver<ControllerSignal> {
        self.sender.subscribe()
    }

    /// Unsubscribe from signals
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let removed = handlers.remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Get the number of active handler subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Get recent signal history (if enabled)
    ///
    /// Returns signals since the given instant, or all history if None.
    pub fn history(&self, since: Option<Instant>) -> Vec<ControllerSignal> {
        if !self.config.enable_history {
            return Vec::new();
        }

        let history = self.history.read();
        match since {
            Some(since) => history
                .iter()
                .filter(|e| e.timestamp >= since)
                .map(|e| e.signal.clone())
                .collect(),
            None => history.iter().map(|e| e.signal.clone()).collect(),
        }
    }

    /// Clear signal history
    pub fn clear_history(&self) {
        let mut history = self.history.write();
        history.clear();
    }

    /// Get the current configuration
    pub fn config(&self) -> &SignalBusConfig {
        &self.config
    }

    /// Add a signal to history, maintaining size and age limits
    fn add_to_history(&self, signal: &ControllerSignal) {
        let mut history = self.history.write();
        let now = Instant::now();

        history.push_back(TimestampedSignal {
            signal: signal.clone(),
            timestamp: now,
        });

        let retention = self.config.history_retention;
        while history
            .front()
            .is_some_and(|e| now.duration_since(e.timestamp) > retention)
        {
            history.pop_front();
        }

        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}
