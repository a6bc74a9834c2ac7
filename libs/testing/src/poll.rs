//! Eventually/consistently polling.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Why a polled assertion failed.
#[derive(Debug, Error)]
pub enum PollError<T: Debug> {
    #[error("not satisfied after {elapsed:?} ({attempts} attempts); last observed: {last:?}")]
    Timeout {
        elapsed: Duration,
        attempts: usize,
        last: Option<T>,
    },

    #[error("violated after {elapsed:?}: observed {value:?}")]
    Violated { elapsed: Duration, value: T },
}

impl<T: Debug> PollError<T> {
    /// The most recent observation, if any was made.
    pub fn last(&self) -> Option<&T> {
        match self {
            Self::Timeout { last, .. } => last.as_ref(),
            Self::Violated { value, .. } => Some(value),
        }
    }
}

/// Poll until an observation is accepted or the timeout elapses.
#[derive(Debug, Clone, Copy)]
pub struct Eventually {
    timeout: Duration,
    interval: Duration,
}

impl Eventually {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Returns the first accepted observation.
    ///
    /// The observation is taken at least once, even with a zero timeout.
    pub async fn until<T, F, Fut, P>(&self, mut observe: F, accept: P) -> Result<T, PollError<T>>
    where
        T: Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        P: Fn(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0;

        loop {
            let value = observe().await;
            attempts += 1;

            if accept(&value) {
                return Ok(value);
            }

            if Instant::now() >= deadline {
                return Err(PollError::Timeout {
                    elapsed: start.elapsed(),
                    attempts,
                    last: Some(value),
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn should_eq<T, F, Fut>(&self, observe: F, expected: T) -> Result<T, PollError<T>>
    where
        T: Debug + PartialEq,
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
    {
        self.until(observe, |value| *value == expected).await
    }
}

/// Require every observation over a window to be accepted.
#[derive(Debug, Clone, Copy)]
pub struct Consistently {
    duration: Duration,
    interval: Duration,
}

impl Consistently {
    pub fn new(duration: Duration, interval: Duration) -> Self {
        Self { duration, interval }
    }

    /// Fails on the first rejected observation.
    pub async fn holds<T, F, Fut, P>(&self, mut observe: F, accept: P) -> Result<(), PollError<T>>
    where
        T: Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        P: Fn(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.duration;

        loop {
            let value = observe().await;
            if !accept(&value) {
                return Err(PollError::Violated {
                    elapsed: start.elapsed(),
                    value,
                });
            }

            if Instant::now() >= deadline {
                return Ok(());
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
