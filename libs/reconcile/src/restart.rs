//! Crash restart policy.

use std::time::Duration;

/// Outcome of consulting the restart policy for a crashed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart on this pass.
    Now,
    /// Restart once this much longer has passed.
    After(Duration),
    /// Crashed beyond the policy; leave it visible as crashed.
    Never,
}

/// When a crashed instance may be restarted.
///
/// The first `immediate_restarts` crashes restart right away. After that
/// the wait doubles from `backoff_base` up to `max_backoff`. Past
/// `max_restart_attempts` crashes the instance stays crashed.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub immediate_restarts: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub max_restart_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            immediate_restarts: 3,
            backoff_base: Duration::from_secs(30),
            max_backoff: Duration::from_secs(16 * 60),
            max_restart_attempts: 200,
        }
    }
}

impl RestartPolicy {
    /// Backoff owed after the `crash_count`-th crash.
    pub fn backoff(&self, crash_count: u32) -> Duration {
        if crash_count <= self.immediate_restarts {
            return Duration::ZERO;
        }
        let exponent = (crash_count - self.immediate_restarts - 1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// `crashed_for` is the time since the instance entered Crashed.
    pub fn decide(&self, crash_count: u32, crashed_for: Duration) -> RestartDecision {
        if crash_count > self.max_restart_attempts {
            return RestartDecision::Never;
        }
        let backoff = self.backoff(crash_count);
        if crashed_for >= backoff {
            RestartDecision::Now
        } else {
            RestartDecision::After(backoff - crashed_for)
        }
    }
}
