//! # vizzini-conformance
//!
//! Acceptance scenarios for a desired/actual LRP orchestrator. Scenarios
//! drive the [`LrpClient`](vizzini_models::LrpClient) seam, then observe
//! effects through the routing layer and actual-state queries, polling
//! until the orchestrator converges.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p vizzini-conformance
//! ```

pub mod context;
pub mod deployment;
pub mod http;
pub mod matchers;
pub mod suite;

pub use context::{ScenarioContext, Timeouts};
pub use deployment::{Deployment, LocalDeployment};
pub use http::HttpRouteClient;
pub use suite::{Outcome, ScenarioReport, ScenarioSpec, Suite, Summary};
