//! Error taxonomy for desired/actual state operations.

use thiserror::Error;

use crate::lrp::{ActualLrpKey, ActualLrpState};
use vizzini_id::ProcessGuid;

/// Result type for BBS operations.
pub type BbsResult<T> = Result<T, BbsError>;

/// Errors surfaced by the desired-state API and the actual-state queries.
///
/// `InvalidArgument`, `NotFound` and `ResourceExists` are reported
/// synchronously by the mutating call. `Transient` means "not converged
/// yet" and is expected inside the convergence window.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BbsError {
    /// Malformed desired-state mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation against an unknown resource.
    #[error("{resource} not found: {key}")]
    NotFound { resource: &'static str, key: String },

    /// Desire against an already desired process guid.
    #[error("{resource} already exists: {key}")]
    ResourceExists { resource: &'static str, key: String },

    /// Actual LRP state machine violation.
    #[error("actual lrp {key}: cannot transition from {from} to {to}")]
    InvalidTransition {
        key: String,
        from: ActualLrpState,
        to: ActualLrpState,
    },

    /// Routing or convergence not complete yet.
    #[error("transient: {0}")]
    Transient(String),

    /// Instance crashed beyond the restart policy, or an internal failure.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl BbsError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn desired_not_found(process_guid: &ProcessGuid) -> Self {
        Self::NotFound {
            resource: "desired lrp",
            key: process_guid.to_string(),
        }
    }

    pub fn actual_not_found(key: &ActualLrpKey) -> Self {
        Self::NotFound {
            resource: "actual lrp",
            key: key.to_string(),
        }
    }

    /// Returns true if the caller should poll again rather than fail.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
