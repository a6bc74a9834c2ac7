//! Scheduler: converges actual LRPs toward desired LRPs.
//!
//! The reconciler plans each desired LRP's index set and applies the plan:
//! creating and placing missing indices, retiring surplus ones, restarting
//! crashed ones the restart policy allows. The worker runs it on a short
//! tick and whenever the desired set changes.

mod reconciler;
mod worker;

pub use reconciler::{ReconcileStats, SchedulerReconciler};
pub use worker::SchedulerWorker;
