//! Execution controller: single-node mutual exclusion over pipeline runs.
//!
//! State machine: `idle → pending → running → {succeeded|failed|timed_out|cancelled} → idle`.
//! All transitions occur under one mutex; no lock is held across I/O (§5).

use crate::errors::TriggerOutcome;
use crate::model::{RunRecord, RunState, TriggerReason};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Default per-run watchdog timeout.
pub const DEFAULT_RUN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Idle,
    Pending,
    Running,
}

struct Inner {
    state: ControllerState,
    latest_run: Option<RunRecord>,
    run_started_monotonic: Option<std::time::Instant>,
    cancel_token: Option<CancellationToken>,
}

/// A snapshot of the current run state, safe to read concurrently.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// `true` if a run is pending or actively running.
    pub busy: bool,
    /// The most recent run record, if any run has ever started.
    pub latest_run: Option<RunRecord>,
    /// How long the active run (if any) has been in its current state.
    pub time_in_state: Option<std::time::Duration>,
}

/// Callback invoked to actually execute one pipeline pass; supplied by the wiring code
/// (`main.rs`) so the controller stays agnostic of `PipelineRunner`'s internals.
pub type RunFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<RunOutcome, String>> + Send>>;

/// Reusable producer of `RunFuture`s, shared between the `Scheduler` and the
/// `TelegramCommandListener` so both can trigger the same underlying pipeline logic.
pub type RunFactory = Arc<dyn Fn(CancellationToken) -> RunFuture + Send + Sync>;

/// What happened during one completed run, as reported back to the controller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Whether at least one chunk was delivered before any failure.
    pub partial_delivery: bool,
    /// Fetched/analyzed/delivered counters.
    pub item_counts: crate::model::ItemCounts,
}

/// Mutually-exclusive pipeline-run coordinator, shared between the scheduler and the
/// Telegram command listener.
pub struct ExecutionController {
    inner: Mutex<Inner>,
    next_run_id: AtomicU64,
    idle_notify: Notify,
    timeout: std::time::Duration,
}

impl ExecutionController {
    /// Build a controller with the given per-run watchdog timeout.
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                latest_run: None,
                run_started_monotonic: None,
                cancel_token: None,
            }),
            next_run_id: AtomicU64::new(1),
            idle_notify: Notify::new(),
            timeout,
        }
    }

    /// Attempt to start a run for `reason`, executing `run` if accepted.
    ///
    /// Non-blocking when busy: returns `RejectedBusy` immediately rather than queueing
    /// (§5 "a deliberate contract to prevent unbounded queueing").
    #[instrument(skip(self, run))]
    pub async fn trigger(
        self: &Arc<Self>,
        reason: TriggerReason,
        run: impl FnOnce(CancellationToken) -> RunFuture + Send + 'static,
    ) -> TriggerOutcome {
        let run_id = {
            let mut inner = self.inner.lock();
            if inner.state != ControllerState::Idle {
                return TriggerOutcome::RejectedBusy;
            }
            let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
            let cancel_token = CancellationToken::new();
            inner.state = ControllerState::Pending;
            inner.cancel_token = Some(cancel_token);
            inner.latest_run = Some(RunRecord::new(run_id, reason, Utc::now()));
            inner.run_started_monotonic = Some(std::time::Instant::now());
            run_id
        };

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.execute(run_id, run).await;
        });

        TriggerOutcome::Accepted
    }

    async fn execute(
        self: Arc<Self>,
        run_id: u64,
        run: impl FnOnce(CancellationToken) -> RunFuture + Send + 'static,
    ) {
        let cancel_token = {
            let mut inner = self.inner.lock();
            inner.state = ControllerState::Running;
            inner.cancel_token.clone().unwrap_or_default()
        };

        let watchdog_token = cancel_token.clone();
        let timeout = self.timeout;
        let timed_out = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watchdog_timed_out = timed_out.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_token.cancel();
        });

        let outcome = run(cancel_token.clone()).await;
        watchdog.abort();

        let mut inner = self.inner.lock();
        let Some(mut record) = inner.latest_run.take() else {
            inner.state = ControllerState::Idle;
            inner.cancel_token = None;
            return;
        };

        record.finished_at = Some(Utc::now());
        record.state = match outcome {
            Ok(result) => {
                record.partial_delivery = result.partial_delivery;
                record.item_counts = result.item_counts;
                RunState::Succeeded
            }
            Err(detail) if timed_out.load(Ordering::SeqCst) => {
                record.error = Some(detail);
                RunState::TimedOut
            }
            Err(detail) if cancel_token.is_cancelled() => {
                record.error = Some(detail);
                RunState::Cancelled
            }
            Err(detail) => {
                record.error = Some(detail);
                RunState::Failed
            }
        };
        info!(run_id, state = ?record.state, "run completed");
        inner.latest_run = Some(record);
        inner.state = ControllerState::Idle;
        inner.cancel_token = None;
        drop(inner);
        self.idle_notify.notify_waiters();
    }

    /// Signal cancellation of the active run, if any.
    pub fn cancel(&self) {
        let inner = self.inner.lock();
        if let Some(token) = &inner.cancel_token {
            token.cancel();
        }
    }

    /// Return a snapshot of the current state and the latest run record.
    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        let busy = inner.state != ControllerState::Idle;
        let time_in_state = inner.run_started_monotonic.map(|t| t.elapsed());
        StatusSnapshot {
            busy,
            latest_run: inner.latest_run.clone(),
            time_in_state,
        }
    }

    /// Wait until the controller returns to `Idle`. Used by graceful shutdown.
    pub async fn wait_idle(&self) {
        loop {
            if !self.status().busy {
                return;
            }
            self.idle_notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn slow_run(millis: u64) -> impl FnOnce(CancellationToken) -> RunFuture {
        move |_cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(RunOutcome {
                    partial_delivery: false,
                    item_counts: crate::model::ItemCounts::default(),
                })
            })
        }
    }

    #[tokio::test]
    async fn second_trigger_rejected_while_busy() {
        let controller = Arc::new(ExecutionController::new(DEFAULT_RUN_TIMEOUT));
        let first = controller.trigger(TriggerReason::Scheduled, slow_run(200)).await;
        assert_eq!(first, TriggerOutcome::Accepted);
        let second = controller.trigger(TriggerReason::Command, slow_run(10)).await;
        assert_eq!(second, TriggerOutcome::RejectedBusy);
        controller.wait_idle().await;
    }

    #[tokio::test]
    async fn trigger_rejection_is_non_blocking() {
        let controller = Arc::new(ExecutionController::new(DEFAULT_RUN_TIMEOUT));
        controller.trigger(TriggerReason::Scheduled, slow_run(500)).await;
        let start = std::time::Instant::now();
        let outcome = controller.trigger(TriggerReason::Command, slow_run(10)).await;
        assert_eq!(outcome, TriggerOutcome::RejectedBusy);
        assert!(start.elapsed() < Duration::from_millis(50));
        controller.wait_idle().await;
    }

    #[tokio::test]
    async fn status_reflects_completed_run() {
        let controller = Arc::new(ExecutionController::new(DEFAULT_RUN_TIMEOUT));
        controller.trigger(TriggerReason::Manual, slow_run(10)).await;
        controller.wait_idle().await;
        let status = controller.status();
        assert!(!status.busy);
        assert_eq!(status.latest_run.unwrap().state, RunState::Succeeded);
    }

    #[tokio::test]
    async fn only_one_accepted_among_parallel_triggers() {
        let controller = Arc::new(ExecutionController::new(DEFAULT_RUN_TIMEOUT));
        let accepted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            let accepted = accepted.clone();
            handles.push(tokio::spawn(async move {
                let outcome = controller.trigger(TriggerReason::Command, slow_run(100)).await;
                if outcome == TriggerOutcome::Accepted {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        controller.wait_idle().await;
    }
}
