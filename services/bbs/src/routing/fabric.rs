//! In-process HTTP routing.
//!
//! Resolves the request host, picks a backend and dispatches to the
//! container. Session affinity works the way a gorouter does it: when the
//! app sets `JSESSIONID`, the response also carries `__VCAP_ID__` naming
//! the instance, and requests presenting both are pinned to it.

use std::sync::Arc;

use tracing::{debug, warn};
use vizzini_id::InstanceGuid;

use super::backend::BackendSelector;
use super::router::{RouteTable, RoutingDecision};
use crate::cell::CellRegistry;
use crate::workload::{SetCookie, WorkloadRequest, SESSION_COOKIE};

/// Cookie naming the pinned instance.
pub const VCAP_ID_COOKIE: &str = "__VCAP_ID__";

/// Backends tried per request before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct FabricRequest {
    pub host: String,
    pub request: WorkloadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricResponse {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<SetCookie>,
}

impl FabricResponse {
    fn error(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookies: Vec::new(),
        }
    }
}

pub struct RoutingFabric {
    table: Arc<RouteTable>,
    selector: Arc<BackendSelector>,
    cells: Arc<CellRegistry>,
    max_attempts: usize,
}

impl RoutingFabric {
    pub fn new(
        table: Arc<RouteTable>,
        selector: Arc<BackendSelector>,
        cells: Arc<CellRegistry>,
    ) -> Self {
        Self {
            table,
            selector,
            cells,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub async fn handle(&self, req: FabricRequest) -> FabricResponse {
        let target = match self.table.route(&req.host) {
            RoutingDecision::Matched { target, .. } => target,
            RoutingDecision::NoMatch { reason } => {
                debug!(host = %req.host, "No route");
                return FabricResponse::error(404, format!("404 Not Found: {reason}"));
            }
        };

        let Some(pool) = self.selector.get_pool(&target).await else {
            return FabricResponse::error(503, "503 Service Unavailable: no endpoints");
        };

        let sticky = sticky_instance(&req.request);
        let candidates = pool.candidates(sticky.as_ref()).await;
        if candidates.is_empty() {
            return FabricResponse::error(503, "503 Service Unavailable: no endpoints");
        }

        for backend in candidates.into_iter().take(self.max_attempts) {
            let container = self
                .cells
                .container(&backend.cell_id, &backend.instance_guid)
                .await;
            let response = container
                .and_then(|c| c.handle(backend.container_port, &req.request));

            let Some(response) = response else {
                warn!(
                    host = %req.host,
                    endpoint = %backend.endpoint(),
                    instance_guid = %backend.instance_guid,
                    "Backend did not answer"
                );
                pool.mark_unhealthy(&backend.instance_guid).await;
                continue;
            };
            pool.mark_healthy(&backend.instance_guid).await;

            let mut set_cookies = response.set_cookies;
            let session = set_cookies.iter().find(|c| c.name == SESSION_COOKIE).cloned();
            match session {
                Some(cookie) if cookie.expired => {
                    set_cookies.push(SetCookie::expire(VCAP_ID_COOKIE));
                }
                Some(_) => {
                    set_cookies.push(SetCookie::new(VCAP_ID_COOKIE, backend.instance_guid.to_string()));
                }
                None if sticky.is_some() && sticky != Some(backend.instance_guid) => {
                    // Pinned instance is gone; re-pin to the one that answered.
                    set_cookies.push(SetCookie::new(VCAP_ID_COOKIE, backend.instance_guid.to_string()));
                }
                None => {}
            }

            return FabricResponse {
                status: response.status,
                body: response.body,
                set_cookies,
            };
        }

        FabricResponse::error(502, "502 Bad Gateway: no backend answered")
    }
}

/// The pinned instance, if the request carries a session and a valid
/// `__VCAP_ID__`.
fn sticky_instance(request: &WorkloadRequest) -> Option<InstanceGuid> {
    request.cookie(SESSION_COOKIE)?;
    InstanceGuid::parse(request.cookie(VCAP_ID_COOKIE)?).ok()
}
