//! Scheduler background worker.
//!
//! Runs the reconciliation loop on a short tick, and immediately whenever
//! the desired set changes.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use super::reconciler::SchedulerReconciler;

/// Scheduler worker that runs the reconciliation loop.
pub struct SchedulerWorker {
    reconciler: SchedulerReconciler,
    interval: Duration,
}

impl SchedulerWorker {
    pub fn new(reconciler: SchedulerReconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting scheduler worker"
        );

        let mut changes = self.reconciler.desired().subscribe();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.run_reconciliation().await,
                change = changes.recv() => match change {
                    Ok(change) => {
                        debug!(process_guid = %change.process_guid(), "Desired change, reconciling");
                        self.run_reconciliation().await;
                    }
                    Err(RecvError::Lagged(_)) => self.run_reconciliation().await,
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_reconciliation(&self) {
        if let Err(e) = self.reconciler.reconcile_all().await {
            error!(error = %e, "Scheduler reconciliation failed");
        }
    }
}
