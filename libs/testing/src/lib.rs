//! Test support for the vizzini acceptance suite.
//!
//! Observation is asynchronous: a desired-state change returns before
//! actual state or routing reflect it. Assertions therefore poll:
//!
//! - [`Eventually`] waits until an observation is accepted.
//! - [`Consistently`] requires every observation over a window to pass.
//! - [`Sampler`] probes in the background and tallies an [`ErrorBudget`].

mod poll;
mod sampler;

use tracing_subscriber::EnvFilter;

pub use poll::{Consistently, Eventually, PollError};
pub use sampler::{ErrorBudget, Sampler};

/// Install a test-writer subscriber once. `RUST_LOG` overrides the default.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vizzini_bbs=debug,vizzini_conformance=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
