//! Background traffic sampling.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome tally of sampled requests. Anything other than 200 counts as
/// bad; probes report 0 when no response arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBudget {
    pub attempts: usize,
    pub failures: Vec<u16>,
}

impl ErrorBudget {
    pub fn record(&mut self, status: u16) {
        self.attempts += 1;
        if status != 200 {
            self.failures.push(status);
        }
    }

    /// Bad fraction; zero when nothing was sampled.
    pub fn rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.failures.len() as f64 / self.attempts as f64
    }

    /// Strictly below `fraction`.
    pub fn within(&self, fraction: f64) -> bool {
        self.rate() < fraction
    }
}

impl fmt::Display for ErrorBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bad codes out of {} attempts ({:.3}%)",
            self.failures.len(),
            self.attempts,
            self.rate() * 100.0
        )
    }
}

/// Probes on a fixed tick until stopped.
///
/// A slow probe delays the next one rather than piling up ticks.
pub struct Sampler {
    stop: watch::Sender<bool>,
    handle: JoinHandle<ErrorBudget>,
}

impl Sampler {
    pub fn spawn<F, Fut>(interval: Duration, mut probe: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = u16> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut budget = ErrorBudget::default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = probe().await;
                        if status != 200 {
                            tracing::debug!(status, "Sampled bad status");
                        }
                        budget.record(status);
                    }
                    _ = stopped.changed() => break,
                }
            }

            budget
        });

        Self { stop, handle }
    }

    /// Stop sampling and return the tally.
    pub async fn stop(self) -> ErrorBudget {
        let _ = self.stop.send(true);
        match self.handle.await {
            Ok(budget) => budget,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => ErrorBudget::default(),
        }
    }
}
