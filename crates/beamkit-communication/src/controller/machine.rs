//! Generic controller engine.
//!
//! A [`Controller`] owns two queue lanes, a state machine, and a dedicated
//! send-loop thread that drives one [`Protocol`] over one [`Connection`].
//! Producers enqueue from any thread and never block on the device; the
//! send loop is the only thread that touches the transport.
//!
//! Locking model: queue content and controller state live under a single
//! mutex with one condvar for wakeups. Telemetry counters are atomics
//! written only by the send-loop thread (relaxed ordering is sufficient);
//! other threads read them for display. Signals are always emitted after
//! the lock is released.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use beamkit_core::{
    ConnectionError, ConnectionState, ControllerError, ControllerSignal, ControllerState,
    DeviceStatus, SignalBus, SignalBusConfig,
};

use super::config::ControllerConfig;
use super::protocol::{Directive, Protocol, QueueSource, StatusRead, WireFrame};
use super::queue::Queues;
use crate::connection::Connection;

/// State guarded by the controller mutex.
struct Shared<U> {
    queues: Queues<U>,
    state: ControllerState,
    /// Bumped on every guarded mutation; parked threads compare epochs to
    /// decide whether anything changed while they were deciding to sleep.
    epoch: u64,
}

/// Shared core of a controller, reachable from the API handle and the
/// send-loop thread.
pub(crate) struct Inner<U> {
    shared: Mutex<Shared<U>>,
    wakeup: Condvar,
    pub(crate) config: ControllerConfig,
    bus: SignalBus,
    // Telemetry counters. Single writer (the send loop); relaxed reads may
    // be momentarily stale, which is fine for display.
    packet_count: AtomicU64,
    rejected_count: AtomicU64,
    connection_errors: AtomicU64,
    refusals: AtomicU32,
    /// An abort has been requested and not yet consumed by the loop.
    abort_pending: AtomicBool,
    /// Interrupts an in-progress wait-finished hold.
    pub(crate) abort_waiting: AtomicBool,
    /// Byte-stream write routing: inside an unterminated realtime span.
    pub(crate) realtime_mode: AtomicBool,
}

impl<U: Send + Clone + 'static> Inner<U> {
    fn new(config: ControllerConfig, bus: SignalBus) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queues: Queues::new(),
                state: ControllerState::Init,
                epoch: 0,
            }),
            wakeup: Condvar::new(),
            config,
            bus,
            packet_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            refusals: AtomicU32::new(0),
            abort_pending: AtomicBool::new(false),
            abort_waiting: AtomicBool::new(false),
            realtime_mode: AtomicBool::new(false),
        }
    }

    pub(crate) fn signal(&self, signal: ControllerSignal) {
        self.bus.publish(signal).ok();
    }

    pub(crate) fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub(crate) fn current_state(&self) -> ControllerState {
        self.shared.lock().state
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.shared.lock().queues.len()
    }

    /// Atomically decide and apply a state transition under the lock.
    ///
    /// `decide` maps the current state to a target, or `None` to leave the
    /// state alone. Illegal targets are logged and dropped; the state
    /// signal fires only on an actual change, after the lock is released.
    pub(crate) fn transition_with(
        &self,
        decide: impl FnOnce(ControllerState) -> Option<ControllerState>,
    ) -> bool {
        let target = {
            let mut shared = self.shared.lock();
            let Some(target) = decide(shared.state) else {
                return false;
            };
            if target == shared.state {
                return false;
            }
            if !shared.state.can_transition_to(target) {
                warn!(from = %shared.state, to = %target, "ignoring invalid state transition");
                return false;
            }
            shared.state = target;
            shared.epoch += 1;
            self.wakeup.notify_all();
            target
        };
        debug!(state = %target, "controller state");
        self.signal(ControllerSignal::State { state: target });
        true
    }

    pub(crate) fn update_state(&self, target: ControllerState) -> bool {
        self.transition_with(|_| Some(target))
    }

    pub(crate) fn enqueue_normal(&self, units: impl IntoIterator<Item = U>) {
        let queued = {
            let mut shared = self.shared.lock();
            shared.queues.push_normal(units);
            shared.epoch += 1;
            self.wakeup.notify_all();
            shared.queues.len()
        };
        self.signal(ControllerSignal::BufferLength { queued });
    }

    pub(crate) fn enqueue_realtime(&self, units: impl IntoIterator<Item = U>) {
        let queued = {
            let mut shared = self.shared.lock();
            shared.queues.push_realtime(units);
            shared.epoch += 1;
            self.wakeup.notify_all();
            shared.queues.len()
        };
        self.signal(ControllerSignal::BufferLength { queued });
    }

    fn clear_queues(&self) -> usize {
        let dropped = {
            let mut shared = self.shared.lock();
            let dropped = shared.queues.clear();
            shared.epoch += 1;
            self.wakeup.notify_all();
            dropped
        };
        self.signal(ControllerSignal::BufferLength { queued: 0 });
        dropped
    }

    /// Request an abort. First caller wins; the queue clear and its signal
    /// happen exactly once no matter how many threads race here.
    pub(crate) fn request_abort(&self) {
        if self.abort_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        self.abort_waiting.store(true, Ordering::Relaxed);
        let dropped = self.clear_queues();
        info!(dropped, "abort requested; queues cleared");
    }

    fn clear_refusals(&self) {
        if self.refusals.swap(0, Ordering::Relaxed) != 0 {
            self.signal(ControllerSignal::Failing { refusals: 0 });
        }
    }
}

/// Outcome of one send-loop cycle.
#[derive(Debug)]
enum Cycle {
    /// The extraction completed: a frame was confirmed on the wire, or a
    /// directive-only unit was processed.
    Sent,
    /// Nothing actionable; carries the queue epoch observed at extraction.
    Empty(u64),
    /// The extraction did not complete: the frame is normal traffic held
    /// by a pause, or an abort landed before the transmit.
    Held,
}

/// The send loop proper. Owns the protocol strategy and the transport;
/// runs on its own thread until terminated.
struct SendLoop<P: Protocol> {
    inner: Arc<Inner<P::Unit>>,
    protocol: P,
    connection: Box<dyn Connection>,
    /// The last confirmation ended on an OK: the device is known ready and
    /// the accept-wait before the next transmit can be skipped. Starts true
    /// so the first frame goes straight out.
    pre_ok: bool,
    /// The family's abort frames already went out this run.
    abort_delivered: bool,
    link_state: ConnectionState,
}

impl<P: Protocol> SendLoop<P> {
    fn new(inner: Arc<Inner<P::Unit>>, protocol: P, connection: Box<dyn Connection>) -> Self {
        Self {
            inner,
            protocol,
            connection,
            pre_ok: true,
            abort_delivered: false,
            link_state: ConnectionState::Unopened,
        }
    }

    fn run(&mut self) {
        debug!("send loop started");
        self.inner.update_state(ControllerState::Active);
        loop {
            if self.inner.abort_pending.load(Ordering::Acquire) {
                self.inner.update_state(ControllerState::Terminate);
            }
            let (state, has_realtime, epoch) = {
                let shared = self.inner.shared.lock();
                (shared.state, shared.queues.has_realtime(), shared.epoch)
            };
            if state.is_shutting_down() {
                break;
            }
            if state == ControllerState::Suspended
                || (state.holds_normal_traffic() && !has_realtime)
            {
                self.park_if_unchanged(epoch);
                continue;
            }
            match self.cycle() {
                Ok(Cycle::Sent) => {
                    if self.inner.current_state() == ControllerState::Idle {
                        self.inner.update_state(ControllerState::Active);
                    }
                }
                Ok(Cycle::Empty(epoch)) => {
                    if self.inner.current_state() == ControllerState::Active {
                        self.inner.update_state(ControllerState::Idle);
                    }
                    self.park_if_unchanged(epoch);
                }
                Ok(Cycle::Held) => {}
                Err(err) if err.is_refusal() => self.handle_refusal(err),
                Err(err) => self.handle_transport_error(err),
            }
        }
        if self.inner.abort_pending.load(Ordering::Acquire) && !self.abort_delivered {
            self.deliver_abort_frames();
        }
        self.close_connection(false);
        self.inner.update_state(ControllerState::End);
        debug!("send loop finished");
    }

    /// One extraction-transmit-confirm cycle.
    fn cycle(&mut self) -> Result<Cycle, ConnectionError> {
        let (extraction, epoch) = {
            let shared = self.inner.shared.lock();
            let allow_normal = !shared.state.holds_normal_traffic();
            (
                self.protocol
                    .extract(shared.queues.realtime(), shared.queues.normal(), allow_normal),
                shared.epoch,
            )
        };
        let Some(extraction) = extraction else {
            return Ok(Cycle::Empty(epoch));
        };

        // An API pause may have landed after the extraction peeked; normal
        // frames stay parked in the queue until the hold lifts.
        if extraction.frame.is_some()
            && extraction.source == QueueSource::Normal
            && self.inner.current_state().holds_normal_traffic()
        {
            return Ok(Cycle::Held);
        }

        let mut directives = extraction.directives;
        if let Some(frame) = &extraction.frame {
            self.ensure_open()?;
            if !self.pre_ok {
                self.wait_until_accepting()?;
                if self.inner.abort_pending.load(Ordering::Acquire) {
                    // An abort came in during the accept wait; the frame
                    // stays queued and the loop tears down instead.
                    return Ok(Cycle::Held);
                }
            }
            self.transmit(frame)?;
            self.pre_ok = false;
            self.confirm(extraction.expect_rejection, &mut directives)?;
            self.inner.packet_count.fetch_add(1, Ordering::Relaxed);
        }

        if extraction.consumed > 0 {
            let queued = {
                let mut shared = self.inner.shared.lock();
                shared.queues.commit(extraction.source, extraction.consumed);
                shared.epoch += 1;
                shared.queues.len()
            };
            self.inner.signal(ControllerSignal::BufferLength { queued });
        }
        if let Some(frame) = extraction.frame {
            self.protocol.record_sent(&frame);
            trace!(len = frame.bytes().len(), "frame confirmed");
            self.inner.signal(ControllerSignal::PacketSent {
                frame: frame.into_bytes(),
            });
        }

        for directive in directives {
            match directive {
                Directive::Pause => {
                    self.inner.transition_with(|s| match s {
                        ControllerState::Paused => Some(ControllerState::Busy),
                        ControllerState::Active | ControllerState::Idle => {
                            Some(ControllerState::Paused)
                        }
                        _ => None,
                    });
                }
                Directive::Resume => {
                    self.inner.transition_with(|s| match s {
                        ControllerState::Busy => Some(ControllerState::Paused),
                        ControllerState::Paused => Some(ControllerState::Active),
                        _ => None,
                    });
                }
                Directive::WaitFinished => {
                    if let Err(err) = self.wait_finished() {
                        // The frame is already confirmed; a failed hold
                        // poll does not unwind the cycle.
                        debug!(error = %err, "wait-finished polling gave up");
                    }
                }
                Directive::Abort => {
                    self.abort_directive();
                    break;
                }
                Directive::Quit => {
                    debug!("quit directive");
                    self.inner.update_state(ControllerState::Terminate);
                    break;
                }
            }
        }
        Ok(Cycle::Sent)
    }

    /// Open the transport if it is not already open. Clears the refusal
    /// streak on success.
    fn ensure_open(&mut self) -> Result<(), ConnectionError> {
        if self.connection.is_connected() {
            return Ok(());
        }
        self.set_link(ConnectionState::Connecting);
        let index = self.inner.config.device_index;
        match self.connection.open(index) {
            Ok(()) => {
                match self.connection.chip_version() {
                    Ok(version) => debug!(index, version, "device opened"),
                    Err(_) => debug!(index, "device opened"),
                }
                self.set_link(ConnectionState::Open);
                self.inner.clear_refusals();
                Ok(())
            }
            Err(err) => {
                self.set_link(ConnectionState::Errored);
                Err(err)
            }
        }
    }

    /// Poll until the device will accept another frame.
    ///
    /// An error reply also releases the wait: the device is listening, and
    /// the confirmation loop accounts for the rejection. Dead silence is a
    /// transport failure.
    fn wait_until_accepting(&mut self) -> Result<(), ConnectionError> {
        let cap = self.inner.config.accept_attempts;
        for attempt in 0..cap {
            if self.inner.current_state().is_shutting_down()
                || self.inner.abort_waiting.load(Ordering::Relaxed)
            {
                return Ok(());
            }
            let status = self.poll_status()?;
            if status.code.is_no_reply() {
                return Err(ConnectionError::NoReply {
                    attempts: attempt + 1,
                });
            }
            if status.code.accepts_next() || status.code.rejected_last() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(self.inner.config.accept_poll_ms));
        }
        Err(ConnectionError::NoReply { attempts: cap })
    }

    fn transmit(&mut self, frame: &WireFrame) -> Result<(), ConnectionError> {
        match frame {
            WireFrame::Single(bytes) => self.connection.write(bytes),
            WireFrame::Bulk(bytes) => self.connection.write_list_chunk(bytes),
        }
    }

    /// Poll until the frame just transmitted is acknowledged.
    ///
    /// Rejections are final: the device discarded the frame, the rejection
    /// is counted, and the frame is NOT retransmitted (a resend would race
    /// the device's own recovery). A deliberately failed frame expects the
    /// rejection and does not count it. If the poll cap runs out while the
    /// device still answers (stuck busy), the frame is assumed delivered
    /// and `pre_ok` stays false so the next transmit re-checks readiness.
    fn confirm(
        &mut self,
        expect_rejection: bool,
        directives: &mut Vec<Directive>,
    ) -> Result<(), ConnectionError> {
        let cap = self.inner.config.confirm_attempts;
        let delay_after = self.inner.config.confirm_delay_after;
        let mut answered = false;
        for attempt in 0..cap {
            if self.inner.current_state().is_shutting_down() {
                return Ok(());
            }
            if attempt > delay_after {
                thread::sleep(Duration::from_millis((attempt as u64).min(50)));
            }
            let status = match self.poll_status() {
                Ok(status) => status,
                // The frame is in flight; keep trying to hear its fate.
                Err(_) => continue,
            };
            if status.code.is_no_reply() {
                continue;
            }
            answered = true;
            match status.code {
                DeviceStatus::Ok => {
                    self.pre_ok = true;
                    return Ok(());
                }
                DeviceStatus::Finished | DeviceStatus::SerialConfirmed => {
                    // Device already reports idle; a pending hold is moot.
                    directives.retain(|d| *d != Directive::WaitFinished);
                    self.pre_ok = true;
                    return Ok(());
                }
                DeviceStatus::Error => {
                    if expect_rejection {
                        debug!("expected rejection confirmed");
                    } else {
                        self.inner.rejected_count.fetch_add(1, Ordering::Relaxed);
                        debug!("device rejected frame");
                    }
                    return Ok(());
                }
                DeviceStatus::Busy | DeviceStatus::PowerLow | DeviceStatus::Unknown(_) => continue,
            }
        }
        if answered {
            // Stuck busy. Treat as delivered; readiness is re-checked
            // before the next frame.
            debug!(attempts = cap, "confirmation window closed while device busy");
            return Ok(());
        }
        Err(ConnectionError::NoReply { attempts: cap })
    }

    /// Hold the loop until the device reports idle, in the `Waiting` state.
    /// Interruptible by abort and shutdown.
    fn wait_finished(&mut self) -> Result<(), ConnectionError> {
        let resume_to = self.inner.current_state();
        self.inner.update_state(ControllerState::Waiting);
        let result = self.wait_finished_poll();
        self.inner.abort_waiting.store(false, Ordering::Relaxed);
        if !self.inner.current_state().is_shutting_down() {
            self.inner.update_state(resume_to);
        }
        result
    }

    fn wait_finished_poll(&mut self) -> Result<(), ConnectionError> {
        let mut attempts = 0usize;
        loop {
            if self.inner.current_state().is_shutting_down()
                || self.inner.abort_waiting.load(Ordering::Relaxed)
            {
                return Ok(());
            }
            attempts += 1;
            let status = self.poll_status()?;
            if status.code.is_no_reply() {
                return Err(ConnectionError::NoReply { attempts });
            }
            if status.code.rejected_last() {
                self.inner.rejected_count.fetch_add(1, Ordering::Relaxed);
            }
            if status.code.is_idle() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(self.inner.config.wait_poll_ms));
        }
    }

    /// Abort directive from the byte stream: drop queued work, tell the
    /// device to stop, terminate the loop.
    fn abort_directive(&mut self) {
        debug!("abort directive");
        self.inner.request_abort();
        self.deliver_abort_frames();
        self.inner.update_state(ControllerState::Terminate);
    }

    /// Tell the device to stop and discard its job. Best effort: an
    /// unreachable device is abandoned, not retried.
    fn deliver_abort_frames(&mut self) {
        self.abort_delivered = true;
        for frame in self.protocol.abort_frames() {
            if self.ensure_open().is_err() {
                break;
            }
            if let Err(err) = self.transmit(&frame) {
                debug!(error = %err, "abort frame not delivered");
                break;
            }
        }
    }

    fn poll_status(&mut self) -> Result<StatusRead, ConnectionError> {
        let status = self.protocol.poll(self.connection.as_mut())?;
        self.inner.signal(ControllerSignal::Status {
            raw: status.raw.clone(),
            text: status.code.to_string(),
        });
        Ok(status)
    }

    fn handle_refusal(&mut self, err: ConnectionError) {
        self.pre_ok = false;
        let refusals = self.inner.refusals.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(error = %err, refusals, "connection refused");
        self.inner.signal(ControllerSignal::Failing { refusals });
        if refusals >= self.inner.config.refusal_limit {
            warn!(refusals, "refusal limit reached; suspending");
            self.inner.update_state(ControllerState::Suspended);
        } else {
            self.sleep_interruptible(Duration::from_millis(self.inner.config.refusal_backoff_ms));
        }
    }

    fn handle_transport_error(&mut self, err: ConnectionError) {
        self.pre_ok = false;
        self.inner.connection_errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "transport error; reconnecting");
        self.close_connection(true);
        self.sleep_interruptible(Duration::from_millis(self.inner.config.reconnect_backoff_ms));
    }

    fn close_connection(&mut self, errored: bool) {
        if self.connection.is_connected() {
            self.connection.close();
        }
        if errored {
            self.set_link(ConnectionState::Errored);
        } else if matches!(
            self.link_state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Errored
        ) {
            self.set_link(ConnectionState::Closed);
        }
    }

    fn set_link(&mut self, state: ConnectionState) {
        if self.link_state == state {
            return;
        }
        if !self.link_state.can_transition_to(state) {
            warn!(from = %self.link_state, to = %state, "unexpected link transition");
        }
        self.link_state = state;
        self.inner.signal(ControllerSignal::Connection { state });
    }

    /// Park until something changes, unless it already has since `epoch`
    /// was read. Re-checking the epoch under the lock closes the window
    /// between deciding to sleep and sleeping.
    fn park_if_unchanged(&self, epoch: u64) {
        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state.is_shutting_down() {
            return;
        }
        self.inner.wakeup.wait(&mut shared);
    }

    /// Backoff sleep that wakes early on any controller mutation.
    fn sleep_interruptible(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let mut shared = self.inner.shared.lock();
        if shared.state.is_shutting_down() {
            return;
        }
        let _ = self.inner.wakeup.wait_for(&mut shared, duration);
    }
}

/// Pieces the send loop takes ownership of when it starts.
struct Engine<P: Protocol> {
    protocol: P,
    connection: Box<dyn Connection>,
}

/// Thread-safe controller handle.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. The send
/// loop starts lazily on the first enqueue, or explicitly via [`start`].
///
/// [`start`]: Controller::start
pub struct Controller<P: Protocol> {
    pub(crate) inner: Arc<Inner<P::Unit>>,
    engine: Mutex<Option<Engine<P>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Protocol + 'static> Controller<P> {
    /// Create a controller with default signal bus settings.
    pub fn new(protocol: P, connection: Box<dyn Connection>, config: ControllerConfig) -> Self {
        Self::with_signal_config(protocol, connection, config, SignalBusConfig::default())
    }

    /// Create a controller with explicit signal bus settings.
    pub fn with_signal_config(
        protocol: P,
        connection: Box<dyn Connection>,
        config: ControllerConfig,
        bus_config: SignalBusConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner::new(config, SignalBus::with_config(bus_config))),
            engine: Mutex::new(Some(Engine {
                protocol,
                connection,
            })),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the send-loop thread.
    ///
    /// Errors if the loop is already running, or has terminated (a
    /// terminated controller can never be restarted).
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut thread = self.thread.lock();
        if let Some(handle) = thread.as_ref() {
            if !handle.is_finished() {
                return Err(ControllerError::AlreadyRunning);
            }
        }
        let Some(engine) = self.engine.lock().take() else {
            return Err(ControllerError::Terminated);
        };
        let mut send_loop = SendLoop::new(
            Arc::clone(&self.inner),
            engine.protocol,
            engine.connection,
        );
        let handle = thread::Builder::new()
            .name("beamkit-send".into())
            .spawn(move || send_loop.run())
            .map_err(|e| ControllerError::SpawnFailed {
                reason: e.to_string(),
            })?;
        *thread = Some(handle);
        Ok(())
    }

    /// Hold normal traffic. Applies from `Active` or `Idle`; otherwise a
    /// no-op.
    pub fn pause(&self) {
        self.inner.transition_with(|s| {
            matches!(s, ControllerState::Active | ControllerState::Idle)
                .then_some(ControllerState::Paused)
        });
    }

    /// Release a hold raised by [`pause`](Controller::pause).
    pub fn resume(&self) {
        self.inner
            .transition_with(|s| (s == ControllerState::Paused).then_some(ControllerState::Active));
    }

    /// Drop all queued work and terminate the send loop. The send loop
    /// transmits the family's stop sequence before closing the transport.
    /// Safe to call from any thread, any number of times; the teardown
    /// happens once.
    pub fn abort(&self) {
        self.inner.request_abort();
    }

    /// Operator decision after suspension: clear the refusal streak and
    /// resume connection attempts.
    pub fn continue_retry(&self) {
        self.inner.clear_refusals();
        self.inner.transition_with(|s| {
            (s == ControllerState::Suspended).then_some(ControllerState::Active)
        });
    }

    /// Operator decision after suspension: give up. Drops queued work and
    /// terminates the send loop.
    pub fn abort_retry(&self) {
        if self.inner.current_state() != ControllerState::Suspended {
            return;
        }
        self.inner.clear_queues();
        self.inner.transition_with(|s| {
            (s == ControllerState::Suspended).then_some(ControllerState::Terminate)
        });
    }

    /// Request an abort and join the send-loop thread.
    pub fn shutdown(&self) -> Result<(), ControllerError> {
        self.abort();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Called from a signal handler running on the send loop
                // itself; joining would deadlock.
                return Ok(());
            }
            handle
                .join()
                .map_err(|_| ControllerError::ThreadPanicked)?;
        }
        Ok(())
    }

    /// Current controller state.
    pub fn state(&self) -> ControllerState {
        self.inner.current_state()
    }

    /// Total units queued across both lanes.
    pub fn queued_len(&self) -> usize {
        self.inner.queued_len()
    }

    /// Frames confirmed on the wire since startup.
    pub fn packet_count(&self) -> u64 {
        self.inner.packet_count.load(Ordering::Relaxed)
    }

    /// Frames the device rejected since startup.
    pub fn rejected_count(&self) -> u64 {
        self.inner.rejected_count.load(Ordering::Relaxed)
    }

    /// Transport errors absorbed by reconnection since startup.
    pub fn connection_errors(&self) -> u64 {
        self.inner.connection_errors.load(Ordering::Relaxed)
    }

    /// Consecutive refused connection attempts in the current streak.
    pub fn refusal_count(&self) -> u32 {
        self.inner.refusals.load(Ordering::Relaxed)
    }

    /// Telemetry bus for this controller.
    pub fn signals(&self) -> &SignalBus {
        self.inner.bus()
    }

    /// Tuning configuration this controller runs with.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub(crate) fn autostart(&self) {
        // AlreadyRunning is the common case and Terminated means writes are
        // being dropped on purpose; neither is worth surfacing here.
        let _ = self.start();
    }
}

impl<P: Protocol> std::fmt::Debug for Controller<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.inner.current_state())
            .field("queued", &self.inner.queued_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::protocol::{Extraction, StatusRead};
    use std::collections::VecDeque;

    /// Transport with scripted open results and status replies.
    struct ScriptedConnection {
        opened: bool,
        open_results: VecDeque<Result<(), ConnectionError>>,
        replies: VecDeque<Vec<u8>>,
        default_reply: Vec<u8>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        polls: Arc<AtomicU64>,
    }

    impl ScriptedConnection {
        fn new() -> Self {
            Self {
                opened: false,
                open_results: VecDeque::new(),
                replies: VecDeque::new(),
                default_reply: vec![0xFF, 0xCE, 0, 0, 0, 0],
                writes: Arc::new(Mutex::new(Vec::new())),
                polls: Arc::new(AtomicU64::new(0)),
            }
        }

        fn script_replies(mut self, replies: &[u8]) -> Self {
            // One status byte per scripted poll, wrapped in a 6-byte reply.
            self.replies = replies
                .iter()
                .map(|&code| vec![0xFF, code, 0, 0, 0, 0])
                .collect();
            self
        }

        fn default_reply(mut self, code: u8) -> Self {
            self.default_reply = vec![0xFF, code, 0, 0, 0, 0];
            self
        }

        fn refuse_opens(mut self, count: usize) -> Self {
            for _ in 0..count {
                self.open_results
                    .push_back(Err(ConnectionError::DeviceNotFound { index: 0 }));
            }
            self
        }

        fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.writes)
        }

        fn polls(&self) -> Arc<AtomicU64> {
            Arc::clone(&self.polls)
        }
    }

    impl Connection for ScriptedConnection {
        fn open(&mut self, _index: i32) -> Result<(), ConnectionError> {
            match self.open_results.pop_front() {
                Some(Ok(())) | None => {
                    self.opened = true;
                    Ok(())
                }
                Some(Err(e)) => Err(e),
            }
        }

        fn close(&mut self) {
            self.opened = false;
        }

        fn is_connected(&self) -> bool {
            self.opened
        }

        fn write(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
            if !self.opened {
                return Err(ConnectionError::NotOpen);
            }
            self.writes.lock().push(frame.to_vec());
            Ok(())
        }

        fn read_status(&mut self) -> Result<Vec<u8>, ConnectionError> {
            if !self.opened {
                return Err(ConnectionError::NotOpen);
            }
            self.polls.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .replies
                .pop_front()
                .unwrap_or_else(|| self.default_reply.clone()))
        }
    }

    /// Minimal newline-framed protocol for exercising the engine alone.
    struct LineProtocol;

    impl LineProtocol {
        fn extract_line(lane: &VecDeque<u8>, source: QueueSource) -> Option<Extraction> {
            let end = lane.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = lane.iter().take(end).copied().collect();
            Some(Extraction::frame(source, WireFrame::Single(line), end + 1))
        }
    }

    impl Protocol for LineProtocol {
        type Unit = u8;

        fn extract(
            &mut self,
            realtime: &VecDeque<u8>,
            normal: &VecDeque<u8>,
            allow_normal: bool,
        ) -> Option<Extraction> {
            Self::extract_line(realtime, QueueSource::Realtime).or_else(|| {
                allow_normal
                    .then(|| Self::extract_line(normal, QueueSource::Normal))
                    .flatten()
            })
        }

        fn poll(&mut self, conn: &mut dyn Connection) -> Result<StatusRead, ConnectionError> {
            let raw = conn.read_status()?;
            let code = match raw.get(1).copied().unwrap_or(0) {
                0xCE => DeviceStatus::Ok,
                0xCF => DeviceStatus::Error,
                0xEE => DeviceStatus::Busy,
                0xEC => DeviceStatus::Finished,
                other => DeviceStatus::Unknown(other),
            };
            Ok(StatusRead { raw, code })
        }
    }

    fn engine(
        config: ControllerConfig,
        conn: ScriptedConnection,
    ) -> (Arc<Inner<u8>>, SendLoop<LineProtocol>) {
        let inner = Arc::new(Inner::new(config, SignalBus::new()));
        let send_loop = SendLoop::new(Arc::clone(&inner), LineProtocol, Box::new(conn));
        (inner, send_loop)
    }

    fn collect_signals(inner: &Inner<u8>) -> Arc<Mutex<Vec<ControllerSignal>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        inner
            .bus()
            .subscribe(beamkit_core::SignalFilter::All, move |signal| {
                sink.lock().push(signal)
            });
        seen
    }

    #[test]
    fn cycle_drains_one_line() {
        let conn = ScriptedConnection::new();
        let writes = conn.writes();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"G0 X1\n");
        inner.update_state(ControllerState::Active);

        let outcome = send_loop.cycle().expect("cycle");
        assert!(matches!(outcome, Cycle::Sent));
        assert_eq!(writes.lock().as_slice(), &[b"G0 X1".to_vec()]);
        assert_eq!(inner.packet_count.load(Ordering::Relaxed), 1);
        assert_eq!(inner.queued_len(), 0);
    }

    #[test]
    fn busy_replies_extend_confirmation() {
        // Six busy polls then an OK: one frame, seven polls total. The
        // first frame skips the accept wait entirely.
        let conn = ScriptedConnection::new()
            .script_replies(&[0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xCE]);
        let polls = conn.polls();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"X\n");
        inner.update_state(ControllerState::Active);

        send_loop.cycle().expect("cycle");
        assert_eq!(polls.load(Ordering::Relaxed), 7);
        assert_eq!(inner.packet_count.load(Ordering::Relaxed), 1);
        assert!(send_loop.pre_ok);
    }

    #[test]
    fn accept_wait_runs_when_last_confirm_was_not_ok() {
        let conn = ScriptedConnection::new().script_replies(&[0xCE, 0xCE]);
        let polls = conn.polls();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"X\n");
        inner.update_state(ControllerState::Active);
        send_loop.pre_ok = false;

        send_loop.cycle().expect("cycle");
        // One accept poll plus one confirmation poll.
        assert_eq!(polls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn rejection_is_counted_and_frame_not_resent() {
        let conn = ScriptedConnection::new().script_replies(&[0xCF]);
        let writes = conn.writes();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"BAD\n");
        inner.update_state(ControllerState::Active);

        send_loop.cycle().expect("cycle");
        assert_eq!(inner.rejected_count.load(Ordering::Relaxed), 1);
        assert_eq!(inner.queued_len(), 0, "rejected frame is still consumed");
        assert_eq!(writes.lock().len(), 1);
        assert!(!send_loop.pre_ok);
    }

    #[test]
    fn silence_surfaces_as_no_reply_and_keeps_the_frame() {
        let conn = ScriptedConnection::new().default_reply(0x00);
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"X\n");
        inner.update_state(ControllerState::Active);

        let err = send_loop.cycle().expect_err("dead device");
        assert!(matches!(err, ConnectionError::NoReply { .. }));
        assert_eq!(inner.queued_len(), 2, "unconfirmed frame stays queued");
        assert_eq!(inner.packet_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn refusals_escalate_to_suspended() {
        let conn = ScriptedConnection::new().refuse_opens(5);
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        let seen = collect_signals(&inner);
        inner.enqueue_normal(*b"X\n");
        inner.update_state(ControllerState::Active);

        for _ in 0..5 {
            let err = send_loop.cycle().expect_err("refused open");
            assert!(err.is_refusal());
            send_loop.handle_refusal(err);
        }
        assert_eq!(inner.refusals.load(Ordering::Relaxed), 5);
        assert_eq!(inner.current_state(), ControllerState::Suspended);

        let failing: Vec<u32> = seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                ControllerSignal::Failing { refusals } => Some(*refusals),
                _ => None,
            })
            .collect();
        assert_eq!(failing, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn successful_open_clears_refusal_streak() {
        let conn = ScriptedConnection::new().refuse_opens(2);
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.enqueue_normal(*b"X\n");
        inner.update_state(ControllerState::Active);

        for _ in 0..2 {
            let err = send_loop.cycle().expect_err("refused open");
            send_loop.handle_refusal(err);
        }
        assert_eq!(inner.refusals.load(Ordering::Relaxed), 2);

        send_loop.cycle().expect("third attempt connects");
        assert_eq!(inner.refusals.load(Ordering::Relaxed), 0);
        assert_eq!(inner.packet_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn paused_controller_extracts_nothing_from_normal() {
        let conn = ScriptedConnection::new();
        let writes = conn.writes();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.update_state(ControllerState::Active);
        inner.update_state(ControllerState::Paused);
        inner.enqueue_normal(*b"X\n");

        let outcome = send_loop.cycle().expect("cycle");
        assert!(matches!(outcome, Cycle::Empty(_)));
        assert!(writes.lock().is_empty());
        assert_eq!(inner.queued_len(), 2);
    }

    #[test]
    fn realtime_bypasses_a_pause() {
        let conn = ScriptedConnection::new();
        let writes = conn.writes();
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.update_state(ControllerState::Active);
        inner.update_state(ControllerState::Paused);
        inner.enqueue_normal(*b"job\n");
        inner.enqueue_realtime(*b"rt\n");

        send_loop.cycle().expect("cycle");
        assert_eq!(writes.lock().as_slice(), &[b"rt".to_vec()]);
        assert_eq!(inner.queued_len(), 4, "normal lane untouched");
    }

    #[test]
    fn finished_status_cancels_pending_hold() {
        let conn = ScriptedConnection::new().script_replies(&[0xEC]);
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.update_state(ControllerState::Active);
        send_loop.connection.open(0).expect("open");

        let mut directives = vec![Directive::WaitFinished];
        send_loop.confirm(false, &mut directives).expect("confirm");
        assert!(directives.is_empty());
        assert!(send_loop.pre_ok);
    }

    #[test]
    fn expected_rejection_is_not_counted() {
        let conn = ScriptedConnection::new().script_replies(&[0xCF]);
        let (inner, mut send_loop) = engine(ControllerConfig::fast(), conn);
        inner.update_state(ControllerState::Active);
        send_loop.connection.open(0).expect("open");

        let mut directives = Vec::new();
        send_loop.confirm(true, &mut directives).expect("confirm");
        assert_eq!(inner.rejected_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn abort_request_clears_queues_exactly_once() {
        let conn = ScriptedConnection::new();
        let (inner, _send_loop) = engine(ControllerConfig::fast(), conn);
        let seen = collect_signals(&inner);
        inner.enqueue_normal(*b"abc\n");

        inner.request_abort();
        inner.request_abort();
        inner.request_abort();

        assert_eq!(inner.queued_len(), 0);
        let zero_buffers = seen
            .lock()
            .iter()
            .filter(|s| matches!(s, ControllerSignal::BufferLength { queued: 0 }))
            .count();
        assert_eq!(zero_buffers, 1);
        assert!(inner.abort_pending.load(Ordering::Acquire));
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let conn = ScriptedConnection::new();
        let (inner, _send_loop) = engine(ControllerConfig::fast(), conn);
        assert!(!inner.update_state(ControllerState::End));
        assert_eq!(inner.current_state(), ControllerState::Init);
        assert!(inner.update_state(ControllerState::Active));
    }
}
