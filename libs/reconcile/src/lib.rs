//! Reconciliation primitives.
//!
//! Helpers for converging actual instances toward a desired LRP:
//!
//! - **Desired state**: the instance count and spec the client declared.
//! - **Actual state**: the per-index records the scheduler owns.
//! - **Convergence**: making the second match the first.
//!
//! # Invariants
//!
//! - Planning is pure and deterministic given the same inputs
//! - Replaying a converged desired state yields an empty plan
//! - Indices are contiguous `[0, N)` once converged

mod plan;
mod restart;

use std::time::Duration;

use sha2::{Digest, Sha256};

pub use plan::{plan_indices, IndexPlan, Observed};
pub use restart::{RestartDecision, RestartPolicy};

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (current matches desired).
    Converged,

    /// Resource is converging (current is moving toward desired).
    Converging,

    /// Resource has diverged (requires intervention).
    Diverged,
}

/// A spec hash for deterministic comparison.
///
/// Two desired states with the same hash are the same request; applying
/// the second one must not cause any churn.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sorted keys, no whitespace.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Scheduler tick.
pub const DEFAULT_CONVERGENCE_TICK: Duration = Duration::from_millis(10);

/// How long observers wait for a desired change to show up in actual
/// state and routing.
pub const DEFAULT_CONVERGENCE_WINDOW: Duration = Duration::from_secs(10);
