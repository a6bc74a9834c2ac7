//! # vizzini-models
//!
//! The data model shared by the reference orchestrator and the acceptance
//! suite:
//!
//! - [`DesiredLrp`] / [`DesiredLrpUpdate`]: what the client asks for
//! - [`ActualLrp`]: what the scheduler has placed, keyed by (guid, index)
//! - [`CfRoutes`]: hostname sets per container port, carried in routing info
//! - [`EnvironmentSnapshot`]: what a container sees at start
//! - [`LrpClient`] / [`RouteClient`]: the two seams the suite drives

mod api;
mod env;
mod error;
mod lrp;
mod routing;

pub use api::{LrpClient, RouteClient, RouteResponse};
pub use env::{env_keys, CfPortMapping, EnvironmentSnapshot};
pub use error::{BbsError, BbsResult};
pub use lrp::{
    ActualLrp, ActualLrpFilter, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, DesiredLrp,
    DesiredLrpUpdate, ModificationTag, PortMapping,
};
pub use routing::{CfRoute, CfRoutes, RoutingInfo, CF_ROUTER};
