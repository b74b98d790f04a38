//! Recurring-loop scheduler.
//!
//! Each loop is an independent actor: a background Tokio task that owns its
//! configuration and state, driven by a timer and a control channel
//! (`Start` / `Stop` / `Update`). External mutation is serialized through
//! messages, so there are no locks on the tick path.

mod runner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use runner::LoopMsg;

/// Scheduler configuration errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A loop was created without a task.
    #[error("loop configuration requires a task")]
    MissingTask,
    /// No loop with the given id exists.
    #[error("unknown loop: {0}")]
    UnknownLoop(String),
}

/// Why a loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called from outside the loop.
    Manual,
    /// The configured condition predicate evaluated false.
    Condition,
    /// The iteration cap was reached.
    MaxIterations,
    /// A caller-supplied reason, typically passed by the task itself.
    Custom(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Manual => f.write_str("manual"),
            StopReason::Condition => f.write_str("condition"),
            StopReason::MaxIterations => f.write_str("max_iterations"),
            StopReason::Custom(reason) => f.write_str(reason),
        }
    }
}

/// Read-only snapshot of one loop's state.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Loop identity.
    pub id: String,
    /// Completed iterations since the last `start()`.
    pub iterations: u64,
    /// Timestamp of the most recent tick.
    pub last_run: Option<DateTime<Utc>>,
    /// Whether the loop is currently running.
    pub running: bool,
    /// Why the loop last stopped, if it has.
    pub stop_reason: Option<StopReason>,
}

impl LoopState {
    fn idle(id: String) -> Self {
        Self {
            id,
            iterations: 0,
            last_run: None,
            running: false,
            stop_reason: None,
        }
    }
}

/// Computes the delay before a tick from the post-tick loop state.
pub type IntervalFn = Arc<dyn Fn(&LoopState) -> Duration + Send + Sync>;

/// Predicate evaluated before each tick; false stops the loop.
pub type ConditionFn = Arc<dyn Fn(&LoopState) -> bool + Send + Sync>;

/// Callback fired exactly once per actual stop, with the frozen state and
/// the reason.
pub type StopCallback = Arc<dyn Fn(&LoopState, &StopReason) + Send + Sync>;

/// Delay rule between ticks.
#[derive(Clone)]
pub enum Interval {
    /// Constant delay.
    Fixed(Duration),
    /// Delay computed from the post-tick state (ramping, backoff).
    Computed(IntervalFn),
}

impl Interval {
    fn evaluate(&self, state: &LoopState) -> Duration {
        match self {
            Interval::Fixed(duration) => *duration,
            Interval::Computed(f) => f(state),
        }
    }
}

impl std::fmt::Debug for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interval::Fixed(duration) => f.debug_tuple("Fixed").field(duration).finish(),
            Interval::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Lets a task stop its own loop from within a tick.
///
/// The first call wins; later calls within the same tick are ignored.
#[derive(Clone)]
pub struct StopHandle {
    requested: Arc<Mutex<Option<StopReason>>>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            requested: Arc::new(Mutex::new(None)),
        }
    }

    /// Request that the loop stop after the current tick.
    pub fn stop(&self, reason: StopReason) {
        if let Ok(mut slot) = self.requested.lock() {
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
    }

    fn take(&self) -> Option<StopReason> {
        self.requested.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// The recurring unit of work driven by a loop.
#[async_trait]
pub trait LoopTask: Send + Sync {
    /// Run one tick. `state` is a post-increment snapshot; calling
    /// `stop.stop(..)` ends the loop without scheduling another tick.
    async fn run(&self, state: LoopState, stop: StopHandle) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can be used as loop tasks.
struct FnTask<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> LoopTask for FnTask<F>
where
    F: Fn(LoopState, StopHandle) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, state: LoopState, stop: StopHandle) -> anyhow::Result<()> {
        (self.f)(state, stop).await
    }
}

/// Wrap an async closure as a [`LoopTask`].
pub fn task_fn<F, Fut>(f: F) -> Arc<dyn LoopTask>
where
    F: Fn(LoopState, StopHandle) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask { f })
}

/// Configuration for one loop.
#[derive(Clone)]
pub struct LoopConfig {
    /// Explicit loop id; a UUID is generated when absent.
    pub id: Option<String>,
    /// Delay rule between ticks.
    pub interval: Interval,
    /// The recurring task. Required.
    pub task: Option<Arc<dyn LoopTask>>,
    /// Optional predicate; evaluating false before a tick stops the loop.
    pub condition: Option<ConditionFn>,
    /// Iteration cap; `None` is unbounded.
    pub max_iterations: Option<u64>,
    /// Fired exactly once per actual stop.
    pub on_stop: Option<StopCallback>,
    /// Whether `create` starts the loop immediately. Default true.
    pub auto_start: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopConfig {
    /// An unbounded, auto-starting loop with a one-second fixed interval
    /// and no task. A task must be attached before `create` accepts it.
    pub fn new() -> Self {
        Self {
            id: None,
            interval: Interval::Fixed(Duration::from_secs(1)),
            task: None,
            condition: None,
            max_iterations: None,
            on_stop: None,
            auto_start: true,
        }
    }

    /// Set an explicit loop id.
    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    /// Use a constant interval.
    #[must_use]
    pub fn every(mut self, duration: Duration) -> Self {
        self.interval = Interval::Fixed(duration);
        self
    }

    /// Compute the interval from the post-tick state.
    #[must_use]
    pub fn interval_fn(
        mut self,
        f: impl Fn(&LoopState) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.interval = Interval::Computed(Arc::new(f));
        self
    }

    /// Attach the recurring task.
    #[must_use]
    pub fn task(mut self, task: Arc<dyn LoopTask>) -> Self {
        self.task = Some(task);
        self
    }

    /// Stop when this predicate evaluates false before a tick.
    #[must_use]
    pub fn condition(mut self, f: impl Fn(&LoopState) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Cap the number of iterations.
    #[must_use]
    pub fn max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Fire this callback once per actual stop.
    #[must_use]
    pub fn on_stop(mut self, f: impl Fn(&LoopState, &StopReason) + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(f));
        self
    }

    /// Control whether `create` starts the loop immediately.
    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// Partial reconfiguration applied to a live loop.
///
/// `None` fields are left untouched. For the optional configuration fields
/// the patch nests an `Option`: `Some(None)` clears, `Some(Some(v))`
/// replaces. Applying a patch to a running loop cancels any pending wait
/// and reschedules under the merged configuration.
#[derive(Clone, Default)]
pub struct LoopUpdate {
    /// Replace the delay rule.
    pub interval: Option<Interval>,
    /// Replace the task.
    pub task: Option<Arc<dyn LoopTask>>,
    /// Replace or clear the condition predicate.
    pub condition: Option<Option<ConditionFn>>,
    /// Replace or clear the iteration cap.
    pub max_iterations: Option<Option<u64>>,
    /// Replace or clear the stop callback.
    pub on_stop: Option<Option<StopCallback>>,
}

impl LoopUpdate {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the delay rule with a constant interval.
    #[must_use]
    pub fn every(mut self, duration: Duration) -> Self {
        self.interval = Some(Interval::Fixed(duration));
        self
    }

    /// Replace the delay rule with a computed interval.
    #[must_use]
    pub fn interval_fn(
        mut self,
        f: impl Fn(&LoopState) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.interval = Some(Interval::Computed(Arc::new(f)));
        self
    }

    /// Replace (`Some`) or clear (`None`) the iteration cap.
    #[must_use]
    pub fn max_iterations(mut self, max: Option<u64>) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Replace (`Some`) or clear (`None`) the condition predicate.
    #[must_use]
    pub fn condition(mut self, condition: Option<ConditionFn>) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Read-only view of a loop's live configuration.
#[derive(Debug, Clone)]
pub struct LoopConfigView {
    /// Iteration cap, if any.
    pub max_iterations: Option<u64>,
    /// Whether a condition predicate is configured.
    pub has_condition: bool,
    /// The constant delay, when the interval is fixed.
    pub fixed_interval: Option<Duration>,
    /// Whether a stop callback is configured.
    pub has_stop_callback: bool,
}

/// Handle to one loop's actor.
#[derive(Clone, Debug)]
pub struct LoopController {
    id: String,
    tx: mpsc::UnboundedSender<LoopMsg>,
    shared: Arc<RwLock<(LoopState, LoopConfigView)>>,
}

impl LoopController {
    /// The loop's identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start (or restart) the loop. Resets the iteration counter.
    pub fn start(&self) {
        let _ = self.tx.send(LoopMsg::Start);
    }

    /// Stop the loop. Idempotent: stopping an already-stopped loop is a
    /// no-op and does not re-fire the stop callback.
    pub fn stop(&self, reason: StopReason) {
        let _ = self.tx.send(LoopMsg::Stop(reason));
    }

    /// Merge a partial configuration into the live loop.
    pub fn update(&self, patch: LoopUpdate) {
        let _ = self.tx.send(LoopMsg::Update(patch));
    }

    /// Snapshot of the loop's current state.
    pub fn state(&self) -> LoopState {
        match self.shared.read() {
            Ok(guard) => guard.0.clone(),
            Err(e) => {
                warn!(error = %e, "loop state lock poisoned");
                LoopState::idle(self.id.clone())
            }
        }
    }

    /// Snapshot of the loop's current configuration.
    pub fn config(&self) -> LoopConfigView {
        match self.shared.read() {
            Ok(guard) => guard.1.clone(),
            Err(e) => {
                warn!(error = %e, "loop config lock poisoned");
                LoopConfigView {
                    max_iterations: None,
                    has_condition: false,
                    fixed_interval: None,
                    has_stop_callback: false,
                }
            }
        }
    }
}

/// Creates and tracks loop controllers.
pub struct Scheduler {
    loops: RwLock<HashMap<String, LoopController>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            loops: RwLock::new(HashMap::new()),
        }
    }

    /// Build a controller for one independent loop and spawn its actor.
    ///
    /// Starts the loop immediately when `auto_start` is set.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::MissingTask`] when the configuration has
    /// no task attached.
    pub fn create(&self, config: LoopConfig) -> Result<LoopController, SchedulerError> {
        if config.task.is_none() {
            return Err(SchedulerError::MissingTask);
        }
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let shared = Arc::new(RwLock::new((
            LoopState::idle(id.clone()),
            runner::config_view(&config),
        )));
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = LoopController {
            id: id.clone(),
            tx,
            shared: Arc::clone(&shared),
        };

        tokio::spawn(runner::run_loop(id.clone(), config.clone(), shared, rx));

        let previous = match self.loops.write() {
            Ok(mut map) => map.insert(id.clone(), controller.clone()),
            Err(e) => {
                warn!(error = %e, "scheduler lock poisoned in create");
                None
            }
        };
        // A re-used id displaces the old loop; stop it rather than leaving
        // a headless actor ticking.
        if let Some(old) = previous {
            old.stop(StopReason::Manual);
        }

        if config.auto_start {
            controller.start();
        }

        info!(loop_id = %id, auto_start = config.auto_start, "loop created");
        Ok(controller)
    }

    /// Look up a controller by id.
    pub fn get(&self, id: &str) -> Option<LoopController> {
        match self.loops.read() {
            Ok(map) => map.get(id).cloned(),
            Err(e) => {
                warn!(error = %e, "scheduler lock poisoned in get");
                None
            }
        }
    }

    /// Stop one loop by id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownLoop`] when no such loop exists.
    pub fn stop(&self, id: &str, reason: StopReason) -> Result<(), SchedulerError> {
        self.get(id)
            .map(|controller| controller.stop(reason))
            .ok_or_else(|| SchedulerError::UnknownLoop(id.to_owned()))
    }

    /// Ids of every known loop.
    pub fn list(&self) -> Vec<String> {
        match self.loops.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(e) => {
                warn!(error = %e, "scheduler lock poisoned in list");
                Vec::new()
            }
        }
    }

    /// Stop every loop and drop the controllers, letting the actors exit.
    pub fn stop_all(&self, reason: StopReason) {
        let controllers: Vec<LoopController> = match self.loops.write() {
            Ok(mut map) => map.drain().map(|(_, c)| c).collect(),
            Err(e) => {
                warn!(error = %e, "scheduler lock poisoned in stop_all");
                Vec::new()
            }
        };
        for controller in controllers {
            controller.stop(reason.clone());
        }
    }
}
