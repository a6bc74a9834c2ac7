//! # vizzini-bbs
//!
//! In-memory reference orchestrator. It keeps desired and actual LRPs,
//! places instances onto simulated cells, and routes HTTP-shaped requests
//! to them by hostname, so the acceptance suite can run without an external
//! system.
//!
//! ```ignore
//! let bbs = Bbs::start(Config::default());
//! bbs.client().desire_lrp(lrp).await?;
//! let response = bbs.route_client().get(&host, "/env").await?;
//! ```

pub mod actual;
pub mod cell;
pub mod client;
pub mod config;
pub mod desired;
pub mod orchestrator;
pub mod routing;
pub mod scheduler;
pub mod workload;

pub use client::{FabricClient, LocalBbsClient};
pub use config::Config;
pub use orchestrator::Bbs;
