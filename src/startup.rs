//! One-time bootstrap coordination.
//!
//! Startup processes run exactly once, in descending priority order, before
//! the first intercepted request. The completion flip happens synchronously
//! under the lock — ahead of any suspension point — so two interleaved
//! requests can never both believe they are first.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Trigger tag passed to a process registered after startup completed.
pub const LATE_REGISTRATION_TRIGGER: &str = "late-registration";

/// A bootstrap routine run once by the coordinator.
#[async_trait]
pub trait StartupRoutine: Send + Sync {
    /// Run the routine. The trigger names what initiated startup (a request
    /// id, [`LATE_REGISTRATION_TRIGGER`], or a caller-supplied tag).
    async fn run(&self, trigger: &str) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can be registered as startup routines.
struct FnRoutine<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StartupRoutine for FnRoutine<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, trigger: &str) -> anyhow::Result<()> {
        (self.f)(trigger.to_owned()).await
    }
}

/// Wrap an async closure as a [`StartupRoutine`].
pub fn startup_fn<F, Fut>(f: F) -> Arc<dyn StartupRoutine>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnRoutine { f })
}

/// Registration options for a startup process.
#[derive(Clone)]
pub struct StartupOptions {
    /// Execution priority; higher runs earlier. Default 0.
    pub priority: i32,
    /// When registering after startup already completed, whether to run this
    /// single process asynchronously. Default true.
    pub run_if_already_started: bool,
    /// Explicit process id; a UUID is generated when absent.
    pub id: Option<String>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            run_if_already_started: true,
            id: None,
        }
    }
}

/// Coordinator lifecycle. Monotonic: never reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Completed,
}

struct Process {
    id: String,
    routine: Arc<dyn StartupRoutine>,
    priority: i32,
    run_if_already_started: bool,
    seq: u64,
}

struct Inner {
    phase: Phase,
    processes: Vec<Process>,
    next_seq: u64,
}

/// Runs registered bootstrap processes exactly once.
pub struct StartupCoordinator {
    inner: Mutex<Inner>,
}

impl Default for StartupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupCoordinator {
    /// Create a coordinator in the not-started phase.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::NotStarted,
                processes: Vec::new(),
                next_seq: 0,
            }),
        }
    }

    /// Register a bootstrap process; returns its id.
    ///
    /// If startup already completed and `run_if_already_started` is true,
    /// this single process is scheduled asynchronously with the
    /// [`LATE_REGISTRATION_TRIGGER`] tag — the others are not re-run.
    pub fn register(&self, routine: Arc<dyn StartupRoutine>, options: StartupOptions) -> String {
        let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let late_run = {
            let mut inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(e) => {
                    warn!(error = %e, "startup lock poisoned in register");
                    return id;
                }
            };
            let seq = inner.next_seq;
            inner.next_seq = inner.next_seq.saturating_add(1);
            inner.processes.push(Process {
                id: id.clone(),
                routine: Arc::clone(&routine),
                priority: options.priority,
                run_if_already_started: options.run_if_already_started,
                seq,
            });
            inner
                .processes
                .sort_by_key(|p| (std::cmp::Reverse(p.priority), p.seq));

            inner.phase == Phase::Completed && options.run_if_already_started
        };

        if late_run {
            let process_id = id.clone();
            tokio::spawn(async move {
                debug!(process = %process_id, "running late-registered startup process");
                if let Err(e) = routine.run(LATE_REGISTRATION_TRIGGER).await {
                    warn!(process = %process_id, error = %e, "late startup process failed");
                }
            });
        }

        id
    }

    /// Remove a registered process; a missing id is a no-op.
    pub fn remove(&self, id: &str) {
        match self.inner.lock() {
            Ok(mut inner) => inner.processes.retain(|p| p.id != id),
            Err(e) => warn!(error = %e, "startup lock poisoned in remove"),
        }
    }

    /// Whether startup has been initiated.
    pub fn initiated(&self) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.phase == Phase::Completed,
            Err(e) => {
                warn!(error = %e, "startup lock poisoned in initiated");
                false
            }
        }
    }

    /// Run every registered process exactly once, in priority order.
    ///
    /// The completion flag flips under the lock before any routine runs, so
    /// a concurrently interleaved call observes completion immediately and
    /// returns without re-triggering the batch. Each routine is failure
    /// isolated: a failing process is logged and the remainder still run.
    pub async fn ensure_startup(&self, trigger: &str) {
        // Check-and-set: claim completion synchronously, before any await.
        let batch: Vec<(String, Arc<dyn StartupRoutine>)> = {
            let mut inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(e) => {
                    warn!(error = %e, "startup lock poisoned in ensure_startup");
                    return;
                }
            };
            if inner.phase == Phase::Completed {
                return;
            }
            inner.phase = Phase::Completed;
            inner
                .processes
                .iter()
                .map(|p| (p.id.clone(), Arc::clone(&p.routine)))
                .collect()
        };

        info!(trigger, processes = batch.len(), "running startup processes");
        for (id, routine) in batch {
            if let Err(e) = routine.run(trigger).await {
                warn!(process = %id, error = %e, "startup process failed; continuing");
            }
        }
    }
}
