//! Per-index convergence planning.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::restart::{RestartDecision, RestartPolicy};
use crate::ConvergenceStatus;

/// What the scheduler currently knows about one actual instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// Unclaimed or claimed, not yet running.
    Pending,
    Running,
    Crashed { crash_count: u32, crashed_for: Duration },
}

/// Actions needed to move a process's actual instances toward its desired
/// count. Every list is sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    /// Indices in `[0, desired)` with no actual record.
    pub to_create: Vec<i32>,
    /// Indices `>= desired`. Highest indices are the ones retired.
    pub to_retire: Vec<i32>,
    /// Crashed indices whose backoff has elapsed.
    pub to_restart: Vec<i32>,
    /// Indices still starting up.
    pub pending: Vec<i32>,
    /// Crashed indices waiting out their backoff, with the time remaining.
    pub backing_off: Vec<(i32, Duration)>,
    /// Crashed indices past the restart policy.
    pub fatal: Vec<i32>,
}

impl IndexPlan {
    /// Nothing to create, retire or restart.
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_retire.is_empty() && self.to_restart.is_empty()
    }

    pub fn status(&self) -> ConvergenceStatus {
        if !self.fatal.is_empty() {
            ConvergenceStatus::Diverged
        } else if !self.is_noop() || !self.pending.is_empty() || !self.backing_off.is_empty() {
            ConvergenceStatus::Converging
        } else {
            ConvergenceStatus::Converged
        }
    }
}

/// Plan the index set for one process.
///
/// Negative `desired` counts as zero. Duplicate records for an index keep
/// the first one seen.
pub fn plan_indices<T>(
    desired: i32,
    actuals: &[T],
    index_of: impl Fn(&T) -> i32,
    observe: impl Fn(&T) -> Observed,
    policy: &RestartPolicy,
) -> IndexPlan {
    let desired = desired.max(0);
    let mut present: BTreeMap<i32, Observed> = BTreeMap::new();
    for actual in actuals {
        present.entry(index_of(actual)).or_insert_with(|| observe(actual));
    }

    let mut plan = IndexPlan {
        to_create: (0..desired).filter(|i| !present.contains_key(i)).collect(),
        ..IndexPlan::default()
    };

    for (&index, observed) in &present {
        if index < 0 || index >= desired {
            plan.to_retire.push(index);
            continue;
        }
        match *observed {
            Observed::Running => {}
            Observed::Pending => plan.pending.push(index),
            Observed::Crashed {
                crash_count,
                crashed_for,
            } => match policy.decide(crash_count, crashed_for) {
                RestartDecision::Now => plan.to_restart.push(index),
                RestartDecision::After(remaining) => plan.backing_off.push((index, remaining)),
                RestartDecision::Never => plan.fatal.push(index),
            },
        }
    }

    plan
}
