//! The per-loop actor task.
//!
//! Owns the loop's configuration and state. Reacts to control messages and
//! to the pending tick timer via `tokio::select!`; publishes state and
//! config snapshots to the shared slot the controller reads from.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    ConditionFn, Interval, LoopConfig, LoopConfigView, LoopState, LoopTask, LoopUpdate,
    StopCallback, StopHandle, StopReason,
};

/// Control messages accepted by a loop actor.
pub(super) enum LoopMsg {
    Start,
    Stop(StopReason),
    Update(LoopUpdate),
}

/// Build the read-only view published for a configuration.
pub(super) fn config_view(config: &LoopConfig) -> LoopConfigView {
    LoopConfigView {
        max_iterations: config.max_iterations,
        has_condition: config.condition.is_some(),
        fixed_interval: match config.interval {
            Interval::Fixed(duration) => Some(duration),
            Interval::Computed(_) => None,
        },
        has_stop_callback: config.on_stop.is_some(),
    }
}

/// Deadline `duration` from now, clamped on overflow.
fn next_deadline(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or(now)
}

struct Actor {
    state: LoopState,
    interval: Interval,
    task: Arc<dyn LoopTask>,
    condition: Option<ConditionFn>,
    max_iterations: Option<u64>,
    on_stop: Option<StopCallback>,
    shared: Arc<RwLock<(LoopState, LoopConfigView)>>,
}

/// Run one loop actor until every controller handle is dropped.
pub(super) async fn run_loop(
    id: String,
    config: LoopConfig,
    shared: Arc<RwLock<(LoopState, LoopConfigView)>>,
    mut rx: mpsc::UnboundedReceiver<LoopMsg>,
) {
    let task = match config.task {
        Some(task) => task,
        // Guarded by Scheduler::create; an actor without a task has
        // nothing to do.
        None => return,
    };

    let mut actor = Actor {
        state: LoopState::idle(id),
        interval: config.interval,
        task,
        condition: config.condition,
        max_iterations: config.max_iterations,
        on_stop: config.on_stop,
        shared,
    };

    // No pending tick while `None`.
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                None => break,
                Some(LoopMsg::Start) => actor.handle_start(&mut deadline),
                Some(LoopMsg::Stop(reason)) => actor.handle_stop(reason, &mut deadline),
                Some(LoopMsg::Update(patch)) => actor.handle_update(patch, &mut deadline),
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                deadline = None;
                actor.tick(&mut deadline).await;
            }
        }
    }

    debug!(loop_id = %actor.state.id, "loop actor exiting");
}

impl Actor {
    /// Publish the current state and config view for controller reads.
    fn publish(&self) {
        match self.shared.write() {
            Ok(mut guard) => {
                guard.0 = self.state.clone();
                guard.1 = LoopConfigView {
                    max_iterations: self.max_iterations,
                    has_condition: self.condition.is_some(),
                    fixed_interval: match self.interval {
                        Interval::Fixed(duration) => Some(duration),
                        Interval::Computed(_) => None,
                    },
                    has_stop_callback: self.on_stop.is_some(),
                };
            }
            Err(e) => warn!(error = %e, "loop shared lock poisoned in publish"),
        }
    }

    fn handle_start(&mut self, deadline: &mut Option<Instant>) {
        if self.state.running {
            return;
        }
        self.state.running = true;
        self.state.iterations = 0;
        self.state.stop_reason = None;
        self.publish();
        *deadline = Some(next_deadline(self.interval.evaluate(&self.state)));
        debug!(loop_id = %self.state.id, "loop started");
    }

    /// Stop the loop. Idempotent; the stop callback fires exactly once per
    /// actual stop, with the frozen state and the reason.
    fn handle_stop(&mut self, reason: StopReason, deadline: &mut Option<Instant>) {
        if !self.state.running {
            return;
        }
        self.state.running = false;
        self.state.stop_reason = Some(reason.clone());
        *deadline = None;
        self.publish();
        if let Some(callback) = &self.on_stop {
            callback(&self.state, &reason);
        }
        info!(loop_id = %self.state.id, reason = %reason, "loop stopped");
    }

    /// Merge a partial configuration. A running loop's pending wait is
    /// cancelled and rescheduled under the merged delay rule.
    fn handle_update(&mut self, patch: LoopUpdate, deadline: &mut Option<Instant>) {
        if let Some(interval) = patch.interval {
            self.interval = interval;
        }
        if let Some(task) = patch.task {
            self.task = task;
        }
        if let Some(condition) = patch.condition {
            self.condition = condition;
        }
        if let Some(max_iterations) = patch.max_iterations {
            self.max_iterations = max_iterations;
        }
        if let Some(on_stop) = patch.on_stop {
            self.on_stop = on_stop;
        }
        self.publish();

        if self.state.running {
            *deadline = Some(next_deadline(self.interval.evaluate(&self.state)));
            debug!(loop_id = %self.state.id, "loop rescheduled after update");
        }
    }

    /// One scheduled tick.
    async fn tick(&mut self, deadline: &mut Option<Instant>) {
        // A tick can race a stop that landed after the timer fired.
        if !self.state.running {
            return;
        }

        if let Some(condition) = &self.condition {
            if !condition(&self.state) {
                self.handle_stop(StopReason::Condition, deadline);
                return;
            }
        }

        self.state.iterations = self.state.iterations.saturating_add(1);
        self.state.last_run = Some(chrono::Utc::now());
        self.publish();

        let stop_handle = StopHandle::new();
        if let Err(e) = self
            .task
            .run(self.state.clone(), stop_handle.clone())
            .await
        {
            warn!(
                loop_id = %self.state.id,
                iteration = self.state.iterations,
                error = %e,
                "loop task failed; continuing"
            );
        }

        if let Some(reason) = stop_handle.take() {
            self.handle_stop(reason, deadline);
            return;
        }

        if let Some(max) = self.max_iterations {
            if self.state.iterations >= max {
                self.handle_stop(StopReason::MaxIterations, deadline);
                return;
            }
        }

        // Evaluate the delay against the post-tick state so ramping and
        // backoff schedules see the new iteration count.
        *deadline = Some(next_deadline(self.interval.evaluate(&self.state)));
    }
}
