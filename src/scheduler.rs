//! Periodic scheduler driving the `ExecutionController` on a fixed interval.
//!
//! Grounded on §4.9: no catch-up runs — a tick that lands while a run is still active is
//! simply logged and dropped, since `ExecutionController::trigger` already refuses to
//! queue.

use crate::controller::{ExecutionController, RunFactory};
use crate::errors::TriggerOutcome;
use crate::model::TriggerReason;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Fires `Trigger(reason=scheduled)` on a fixed interval against a shared controller.
pub struct Scheduler {
    controller: Arc<ExecutionController>,
    run_factory: RunFactory,
    interval: Duration,
    run_immediately: bool,
    stopped: Arc<AtomicBool>,
}

impl Scheduler {
    /// Build a scheduler ticking every `interval`, optionally firing an immediate first
    /// trigger before the first interval elapses.
    pub fn new(
        controller: Arc<ExecutionController>,
        run_factory: RunFactory,
        interval: Duration,
        run_immediately: bool,
    ) -> Self {
        Self {
            controller,
            run_factory,
            interval,
            run_immediately,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the scheduling loop until `stop()` is called.
    pub async fn run(&self) {
        if self.run_immediately {
            self.tick().await;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; consume it since we already ran above
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let factory = self.run_factory.clone();
        let outcome = self
            .controller
            .trigger(TriggerReason::Scheduled, move |token| factory(token))
            .await;
        match outcome {
            TriggerOutcome::Accepted => info!("scheduled run accepted"),
            TriggerOutcome::RejectedBusy => warn!("scheduled tick skipped: a run is already active"),
        }
    }

    /// Stop future triggers. Does not cancel an already-active run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RunOutcome;
    use std::sync::atomic::AtomicUsize;

    fn counting_factory(counter: Arc<AtomicUsize>, millis: u64) -> RunFactory {
        Arc::new(move |_token| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(RunOutcome {
                    partial_delivery: false,
                    item_counts: crate::model::ItemCounts::default(),
                })
            })
        })
    }

    #[tokio::test]
    async fn immediate_first_tick_fires_without_waiting_interval() {
        let controller = Arc::new(ExecutionController::new(crate::controller::DEFAULT_RUN_TIMEOUT));
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            controller.clone(),
            counting_factory(counter.clone(), 10),
            Duration::from_secs(3600),
            true,
        );
        scheduler.tick().await;
        controller.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_while_busy_is_skipped_not_queued() {
        let controller = Arc::new(ExecutionController::new(crate::controller::DEFAULT_RUN_TIMEOUT));
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            controller.clone(),
            counting_factory(counter.clone(), 200),
            Duration::from_secs(3600),
            false,
        );
        scheduler.tick().await;
        scheduler.tick().await;
        controller.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
