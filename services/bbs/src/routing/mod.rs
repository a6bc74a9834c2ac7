//! Routing fabric.
//!
//! - [`RouteTable`]: hostname -> (process, port)
//! - [`BackendSelector`]: (process, port) -> Running instances
//! - [`RouteEmitter`]: keeps both in line with the stores
//! - [`RoutingFabric`]: dispatches requests with session affinity

mod backend;
mod emitter;
mod fabric;
mod router;

pub use backend::{Backend, BackendPool, BackendSelector, HealthStatus, UNHEALTHY_RETRY_AFTER};
pub use emitter::{backends_for, RouteEmitter};
pub use fabric::{FabricRequest, FabricResponse, RoutingFabric, DEFAULT_MAX_ATTEMPTS, VCAP_ID_COOKIE};
pub use router::{normalize_hostname, RouteTable, RouteTarget, RoutingDecision};
