//! The scheduler: subscriber registration, lifecycle and the loop thread.
//!
//! A scheduler moves through `NotStarted -> Running -> Stopped`. Subscribers
//! can only be registered while it has not started. `start` moves every
//! tracker onto one named thread; from then on the trackers are never touched
//! from another thread, so they need no locking.
//!
//! Each tick runs its phases in a fixed order and fans out one phase's deltas
//! before the next phase begins:
//!
//! 1. instance discovery (rate-limited by the registry itself)
//! 2. world log tailing
//! 3. state polling
//! 4. live-session tailing
//!
//! A phase with no subscribers is skipped. Live-session subscribers also
//! enable world log tailing, since live sessions are opened by world log
//! transitions.

use std::any::Any;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender};

use crate::config::WatchConfig;
use crate::error::{ContractError, WatchError, WatchResult};
use crate::registry::{InstanceRegistry, RegistryDelta};
use crate::sink::{self, ErrorSink};
use crate::time::{self, Millis};
use crate::tracker::{EphemeralSessionTracker, LogSessionTracker, StateTracker};

use super::executor::Executor;
use super::subscriber::{
    InstanceSubscriber, LiveSessionSubscriber, Registered, StateSubscriber, SubscriberId, WorldLogSubscriber,
};

const LOOP_THREAD_NAME: &str = "tailwatch-scheduler";
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// What the loop thread runs.
type LoopBody = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle phase of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting subscribers.
    NotStarted,
    /// The loop thread is running.
    Running,
    /// The loop thread has exited.
    Stopped,
}

#[derive(Debug, Default)]
struct Subscribers {
    instance: Vec<Registered<dyn InstanceSubscriber>>,
    state: Vec<Registered<dyn StateSubscriber>>,
    world_log: Vec<Registered<dyn WorldLogSubscriber>>,
    live_session: Vec<Registered<dyn LiveSessionSubscriber>>,
}

impl Subscribers {
    fn is_empty(&self) -> bool {
        self.instance.is_empty() && self.state.is_empty() && self.world_log.is_empty() && self.live_session.is_empty()
    }

    fn min_interval(&self) -> Option<Duration> {
        let instance = self.instance.iter().map(|r| r.interval);
        let state = self.state.iter().map(|r| r.interval);
        let world_log = self.world_log.iter().map(|r| r.interval);
        let live_session = self.live_session.iter().map(|r| r.interval);
        instance.chain(state).chain(world_log).chain(live_session).min()
    }
}

/// Everything the loop thread owns.
struct Pipeline {
    registry: InstanceRegistry,
    world_logs: LogSessionTracker,
    states: StateTracker,
    live_sessions: EphemeralSessionTracker,
    subscribers: Subscribers,
    sink: Arc<dyn ErrorSink>,
}

impl Pipeline {
    fn new(config: &WatchConfig, subscribers: Subscribers, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            registry: InstanceRegistry::new(config),
            world_logs: LogSessionTracker::new(),
            states: StateTracker::new(config.state_settle_ms, config.state_max_failures),
            live_sessions: EphemeralSessionTracker::new(config.live_session_grace_ms),
            subscribers,
            sink,
        }
    }

    fn tick(&mut self, now: Millis) {
        let sink = Arc::clone(&self.sink);
        let sink = &*sink;

        if let Some(delta) = self.registry.tick(now, sink) {
            self.fan_out_instances(&delta);
        }

        let wants_live = !self.subscribers.live_session.is_empty();
        let wants_world = wants_live || !self.subscribers.world_log.is_empty();
        let wants_state = !self.subscribers.state.is_empty();
        if !(wants_world || wants_state) {
            return;
        }
        let handles = self.registry.handles();

        if wants_world {
            for entry in self.world_logs.tick(&handles, sink) {
                let payload = &entry.instance.payload;
                let shared = Arc::new(entry.entry.clone());
                for sub in &self.subscribers.world_log {
                    let payload = Arc::clone(payload);
                    let shared = Arc::clone(&shared);
                    let is_new = entry.is_new;
                    sub.deliver(move |s| s.on_world_log_entry(&payload, &shared, is_new));
                }
                if wants_live {
                    self.live_sessions.observe(&entry.instance, &entry.entry, sink);
                }
            }
        }

        if wants_state {
            for change in self.states.tick(&handles, now, sink) {
                let state = Arc::new(change.state);
                for sub in &self.subscribers.state {
                    let payload = Arc::clone(&change.instance.payload);
                    let state = Arc::clone(&state);
                    sub.deliver(move |s| s.on_state_change(&payload, &state));
                }
            }
        }

        if wants_live {
            self.live_sessions.release_missing(&handles, now);
            for entry in self.live_sessions.tick(now, sink) {
                let line: Arc<[u8]> = Arc::from(entry.line);
                for sub in &self.subscribers.live_session {
                    let payload = Arc::clone(&entry.instance);
                    let world_path = Arc::clone(&entry.world_path);
                    let line = Arc::clone(&line);
                    sub.deliver(move |s| s.on_live_session_entry(&payload, &world_path, &line));
                }
            }
        }
    }

    fn fan_out_instances(&self, delta: &RegistryDelta) {
        for sub in &self.subscribers.instance {
            for payload in &delta.existing {
                let payload = Arc::clone(payload);
                sub.deliver(move |s| s.on_new_instance(&payload, false));
            }
            for payload in &delta.new {
                let payload = Arc::clone(payload);
                sub.deliver(move |s| s.on_new_instance(&payload, true));
            }
            for payload in &delta.closed {
                let payload = Arc::clone(payload);
                sub.deliver(move |s| s.on_instance_closed(&payload));
            }
        }
    }
}

/// Sets the exit flags however the loop thread ends.
struct ExitGuard {
    should_run: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.should_run.store(false, Ordering::Release);
        self.exited.store(true, Ordering::Release);
    }
}

/// Polls the observed files and dispatches deltas to subscribers.
pub struct Scheduler {
    config: WatchConfig,
    sink: Arc<dyn ErrorSink>,
    subscribers: Subscribers,
    tick_interval: Option<Duration>,
    started: bool,
    should_run: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    wake_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("root_dir", &self.config.root_dir)
            .field("phase", &self.phase())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler that reports non-fatal errors through `tracing`.
    #[must_use]
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            sink: sink::default_sink(),
            subscribers: Subscribers::default(),
            tick_interval: None,
            started: false,
            should_run: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
            wake_tx: None,
            join: None,
        }
    }

    /// Replaces the error sink.
    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Effective loop interval: the smallest interval any subscriber asked
    /// for, never below 1 ms. `None` until a subscriber is registered.
    #[must_use]
    pub const fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        if !self.started {
            Phase::NotStarted
        } else if self.exited.load(Ordering::Acquire) {
            Phase::Stopped
        } else {
            Phase::Running
        }
    }

    #[must_use]
    pub const fn has_started(&self) -> bool {
        self.started
    }

    /// True once the loop thread has exited, whether by `stop` or by a fatal
    /// error inside a tick.
    #[must_use]
    pub fn has_stopped(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Registers an instance lifecycle subscriber.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::AlreadyStarted` after `start`.
    pub fn subscribe_instances(
        &mut self,
        subscriber: Arc<dyn InstanceSubscriber>,
        interval: Duration,
        executor: Option<Arc<dyn Executor>>,
    ) -> WatchResult<SubscriberId> {
        self.ensure_not_started()?;
        let registered = Registered::new(subscriber, interval, executor);
        let id = registered.id;
        self.subscribers.instance.push(registered);
        self.refresh_interval();
        Ok(id)
    }

    /// Registers a state change subscriber.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::AlreadyStarted` after `start`.
    pub fn subscribe_state(
        &mut self,
        subscriber: Arc<dyn StateSubscriber>,
        interval: Duration,
        executor: Option<Arc<dyn Executor>>,
    ) -> WatchResult<SubscriberId> {
        self.ensure_not_started()?;
        let registered = Registered::new(subscriber, interval, executor);
        let id = registered.id;
        self.subscribers.state.push(registered);
        self.refresh_interval();
        Ok(id)
    }

    /// Registers a world log subscriber.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::AlreadyStarted` after `start`.
    pub fn subscribe_world_log(
        &mut self,
        subscriber: Arc<dyn WorldLogSubscriber>,
        interval: Duration,
        executor: Option<Arc<dyn Executor>>,
    ) -> WatchResult<SubscriberId> {
        self.ensure_not_started()?;
        let registered = Registered::new(subscriber, interval, executor);
        let id = registered.id;
        self.subscribers.world_log.push(registered);
        self.refresh_interval();
        Ok(id)
    }

    /// Registers a live-session subscriber.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::AlreadyStarted` after `start`.
    pub fn subscribe_live_session(
        &mut self,
        subscriber: Arc<dyn LiveSessionSubscriber>,
        interval: Duration,
        executor: Option<Arc<dyn Executor>>,
    ) -> WatchResult<SubscriberId> {
        self.ensure_not_started()?;
        let registered = Registered::new(subscriber, interval, executor);
        let id = registered.id;
        self.subscribers.live_session.push(registered);
        self.refresh_interval();
        Ok(id)
    }

    /// Spawns the loop thread. Calling `start` again is a no-op.
    ///
    /// # Errors
    ///
    /// - `ContractError::NoSubscribers` if nothing was registered
    /// - `ContractError::Spawn` if the loop thread cannot be spawned
    pub fn start(&mut self) -> WatchResult<()> {
        self.start_inner(false)
    }

    /// Like `start`, but runs one full tick on the calling thread first, so
    /// instances already present have been delivered when this returns.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::start`].
    pub fn start_with_initial_tick(&mut self) -> WatchResult<()> {
        self.start_inner(true)
    }

    /// Asks the loop to exit and waits a bounded time for it to do so.
    ///
    /// Returns true if the loop has exited. Returns false if the scheduler
    /// never started or the loop did not exit within
    /// `stop_poll_attempts * stop_poll_interval_ms`. Idempotent.
    pub fn stop(&mut self) -> bool {
        if !self.started {
            return false;
        }
        self.should_run.store(false, Ordering::Release);
        // Disconnecting the wake channel interrupts the loop's sleep.
        drop(self.wake_tx.take());

        let interval = self.config.stop_poll_interval();
        for _ in 0..self.config.stop_poll_attempts {
            if self.exited.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(interval);
        }
        if !self.exited.load(Ordering::Acquire) {
            tracing::warn!("scheduler loop did not exit within the stop window");
            return false;
        }
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
        true
    }

    fn ensure_not_started(&self) -> WatchResult<()> {
        if self.started {
            return Err(ContractError::AlreadyStarted.into());
        }
        Ok(())
    }

    fn refresh_interval(&mut self) {
        self.tick_interval = self.subscribers.min_interval().map(|i| i.max(MIN_TICK_INTERVAL));
    }

    fn start_inner(&mut self, initial_tick: bool) -> WatchResult<()> {
        self.launch(initial_tick, spawn_loop_thread)
    }

    /// Builds the pipeline and hands it to a thread obtained from `spawn`.
    ///
    /// The pipeline only crosses over once the thread exists; if `spawn`
    /// fails the subscribers go back into the scheduler so `start` can be
    /// retried.
    fn launch<F>(&mut self, initial_tick: bool, spawn: F) -> WatchResult<()>
    where
        F: FnOnce(LoopBody) -> io::Result<JoinHandle<()>>,
    {
        if self.started {
            return Ok(());
        }
        if self.subscribers.is_empty() {
            return Err(ContractError::NoSubscribers.into());
        }
        let interval = self.tick_interval.unwrap_or(MIN_TICK_INTERVAL);

        let subscribers = mem::take(&mut self.subscribers);
        let mut pipeline = Pipeline::new(&self.config, subscribers, Arc::clone(&self.sink));
        if initial_tick {
            pipeline.tick(time::now_millis());
        }

        let (wake_tx, wake_rx) = bounded::<()>(1);
        let (handoff_tx, handoff_rx) = bounded::<Pipeline>(1);
        let should_run = Arc::clone(&self.should_run);
        let exited = Arc::clone(&self.exited);
        let body: LoopBody = Box::new(move || {
            let guard = ExitGuard { should_run, exited };
            if let Ok(pipeline) = handoff_rx.recv() {
                run_loop(pipeline, interval, &wake_rx, guard);
            }
        });

        let handle = match spawn(body) {
            Ok(handle) => handle,
            Err(source) => {
                self.subscribers = pipeline.subscribers;
                return Err(ContractError::Spawn { source }.into());
            }
        };

        self.should_run.store(true, Ordering::Release);
        self.exited.store(false, Ordering::Release);
        if let Err(SendError(pipeline)) = handoff_tx.send(pipeline) {
            self.should_run.store(false, Ordering::Release);
            self.subscribers = pipeline.subscribers;
            let _ = handle.join();
            self.exited.store(false, Ordering::Release);
            return Err(WatchError::internal("scheduler thread exited before it was handed its pipeline"));
        }

        tracing::info!(
            root = %self.config.root_dir.display(),
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "scheduler started"
        );
        self.started = true;
        self.wake_tx = Some(wake_tx);
        self.join = Some(handle);
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Request a stop without waiting; the loop exits on its own.
        self.should_run.store(false, Ordering::Release);
        drop(self.wake_tx.take());
        drop(self.join.take());
    }
}

fn spawn_loop_thread(body: LoopBody) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(LOOP_THREAD_NAME.to_string()).spawn(body)
}

fn run_loop(mut pipeline: Pipeline, interval: Duration, wake_rx: &Receiver<()>, guard: ExitGuard) {
    let sink = Arc::clone(&pipeline.sink);
    let should_run = &*guard.should_run;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        while should_run.load(Ordering::Acquire) {
            pipeline.tick(time::now_millis());
            match wake_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }));
    match outcome {
        Ok(()) => tracing::debug!("scheduler loop exited"),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(error = %message, "scheduler loop panicked");
            sink.report(
                "Scheduler encountered an error and will stop",
                &WatchError::internal(message),
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use tempfile::tempdir;

    use crate::descriptor::JsonObject;

    struct Noop;

    impl InstanceSubscriber for Noop {
        fn on_new_instance(&self, _instance: &JsonObject, _is_new: bool) {}
        fn on_instance_closed(&self, _instance: &JsonObject) {}
    }

    impl StateSubscriber for Noop {
        fn on_state_change(&self, _instance: &JsonObject, _state: &JsonObject) {}
    }

    struct Panicking;

    impl InstanceSubscriber for Panicking {
        fn on_new_instance(&self, _instance: &JsonObject, _is_new: bool) {
            panic!("subscriber bug");
        }
        fn on_instance_closed(&self, _instance: &JsonObject) {}
    }

    fn scheduler() -> (tempfile::TempDir, Scheduler) {
        let dir = tempdir().unwrap();
        let scheduler = Scheduler::new(WatchConfig::with_root(dir.path()));
        (dir, scheduler)
    }

    #[test]
    fn start_without_subscribers_is_rejected() {
        let (_dir, mut s) = scheduler();
        let err = s.start().unwrap_err();
        assert!(matches!(err, WatchError::Contract(ContractError::NoSubscribers)));
        assert_eq!(s.phase(), Phase::NotStarted);
        assert!(!s.stop());
    }

    #[test]
    fn tick_interval_is_the_minimum_with_a_floor() {
        let (_dir, mut s) = scheduler();
        assert_eq!(s.tick_interval(), None);
        s.subscribe_instances(Arc::new(Noop), Duration::from_millis(200), None).unwrap();
        s.subscribe_state(Arc::new(Noop), Duration::from_millis(50), None).unwrap();
        assert_eq!(s.tick_interval(), Some(Duration::from_millis(50)));
        s.subscribe_state(Arc::new(Noop), Duration::ZERO, None).unwrap();
        assert_eq!(s.tick_interval(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn lifecycle_and_late_registration() {
        let (_dir, mut s) = scheduler();
        s.subscribe_instances(Arc::new(Noop), Duration::from_millis(5), None).unwrap();
        s.start().unwrap();
        assert!(s.has_started());
        assert_eq!(s.phase(), Phase::Running);
        s.start().unwrap();

        let err = s
            .subscribe_state(Arc::new(Noop), Duration::from_millis(5), None)
            .unwrap_err();
        assert!(matches!(err, WatchError::Contract(ContractError::AlreadyStarted)));

        assert!(s.stop());
        assert!(s.has_stopped());
        assert_eq!(s.phase(), Phase::Stopped);
        assert!(s.stop());
    }

    #[test]
    fn panicking_subscriber_stops_the_loop_and_is_reported() {
        let dir = tempdir().unwrap();
        let instances = dir.path().join("instances");
        std::fs::create_dir_all(&instances).unwrap();
        std::fs::write(instances.join("a.json"), r#"{"game_version": "1.16.1"}"#).unwrap();

        let reports = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&reports);
        let sink: Arc<dyn ErrorSink> = Arc::new(move |ctx: &str, e: &WatchError| {
            r.lock().unwrap().push((ctx.to_string(), e.is_internal()));
        });
        let mut s = Scheduler::new(WatchConfig::with_root(dir.path())).with_error_sink(sink);
        s.subscribe_instances(Arc::new(Panicking), Duration::from_millis(5), None).unwrap();
        s.start().unwrap();

        for _ in 0..500 {
            if s.has_stopped() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(s.has_stopped());
        let reports = reports.lock().unwrap();
        assert!(reports.contains(&("Scheduler encountered an error and will stop".to_string(), true)));
    }

    #[test]
    fn failed_spawn_keeps_subscribers_for_a_retry() {
        let (_dir, mut s) = scheduler();
        s.subscribe_instances(Arc::new(Noop), Duration::from_millis(5), None).unwrap();

        let err = s
            .launch(false, |_body| Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left")))
            .unwrap_err();
        assert!(matches!(err, WatchError::Contract(ContractError::Spawn { .. })));
        assert_eq!(s.phase(), Phase::NotStarted);
        assert!(!s.has_stopped());

        s.start().unwrap();
        assert_eq!(s.phase(), Phase::Running);
        assert!(s.stop());
    }

    struct Blocking {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl InstanceSubscriber for Blocking {
        fn on_new_instance(&self, _instance: &JsonObject, _is_new: bool) {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(10));
        }
        fn on_instance_closed(&self, _instance: &JsonObject) {}
    }

    #[test]
    fn stop_gives_up_after_the_bounded_wait() {
        let dir = tempdir().unwrap();
        let instances = dir.path().join("instances");
        std::fs::create_dir_all(&instances).unwrap();
        std::fs::write(instances.join("a.json"), "{}").unwrap();

        let config = WatchConfig {
            stop_poll_attempts: 2,
            stop_poll_interval_ms: 10,
            ..WatchConfig::with_root(dir.path())
        };
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let mut s = Scheduler::new(config);
        let blocking = Blocking {
            entered: entered_tx,
            release: release_rx,
        };
        s.subscribe_instances(Arc::new(blocking), Duration::from_millis(5), None).unwrap();
        s.start().unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The loop is stuck inside an inline callback.
        assert!(!s.stop());
        assert!(!s.has_stopped());

        release_tx.send(()).unwrap();
        for _ in 0..500 {
            if s.has_stopped() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(s.has_stopped());
        assert!(s.stop());
    }
}
