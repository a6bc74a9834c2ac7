//! Route emitter.
//!
//! Keeps the route table and backend pools in line with desired routes and
//! Running instances. Changes are applied as events arrive; a periodic full
//! sync repairs anything missed, including lagged subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use vizzini_models::{ActualLrp, ActualLrpFilter, CfRoutes, DesiredLrp};

use super::backend::{Backend, BackendSelector};
use super::router::{RouteTable, RouteTarget};
use crate::actual::{ActualLrpChange, ActualStore};
use crate::desired::{DesiredChange, DesiredStore};

/// Backends an actual LRP contributes, one per mapped port. Empty unless
/// it is Running.
pub fn backends_for(lrp: &ActualLrp) -> Vec<(RouteTarget, Backend)> {
    let (Some(instance_guid), Some(cell_id), Some(net_info)) =
        (lrp.instance_guid, lrp.cell_id, lrp.net_info.as_ref())
    else {
        return Vec::new();
    };
    if !lrp.is_running() {
        return Vec::new();
    }

    net_info
        .ports
        .iter()
        .map(|mapping| {
            (
                RouteTarget {
                    process_guid: lrp.key.process_guid,
                    port: mapping.container_port,
                },
                Backend {
                    instance_guid,
                    index: lrp.key.index,
                    cell_id,
                    address: net_info.address.clone(),
                    host_port: mapping.host_port,
                    container_port: mapping.container_port,
                },
            )
        })
        .collect()
}

fn routes_of(lrp: &DesiredLrp) -> CfRoutes {
    match lrp.cf_routes() {
        Ok(routes) => routes,
        Err(e) => {
            warn!(process_guid = %lrp.process_guid, error = %e, "Ignoring malformed routes");
            CfRoutes::default()
        }
    }
}

pub struct RouteEmitter {
    desired: Arc<DesiredStore>,
    actual: Arc<ActualStore>,
    table: Arc<RouteTable>,
    selector: Arc<BackendSelector>,
    sync_interval: Duration,
}

impl RouteEmitter {
    pub fn new(
        desired: Arc<DesiredStore>,
        actual: Arc<ActualStore>,
        table: Arc<RouteTable>,
        selector: Arc<BackendSelector>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            desired,
            actual,
            table,
            selector,
            sync_interval,
        }
    }

    /// Rebuild routes and pools from the stores.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) {
        let desired = self.desired.list().await;
        let running: Vec<ActualLrp> = self
            .actual
            .list(&ActualLrpFilter::default())
            .await
            .into_iter()
            .filter(ActualLrp::is_running)
            .collect();

        let mut pools: HashMap<RouteTarget, Vec<Backend>> = HashMap::new();
        for lrp in &desired {
            for port in &lrp.ports {
                pools.insert(
                    RouteTarget {
                        process_guid: lrp.process_guid,
                        port: *port,
                    },
                    Vec::new(),
                );
            }
        }
        for lrp in &running {
            for (target, backend) in backends_for(lrp) {
                if let Some(backends) = pools.get_mut(&target) {
                    backends.push(backend);
                }
            }
        }

        self.table
            .replace_all(desired.iter().map(|lrp| (lrp.process_guid, routes_of(lrp))));

        let targets: Vec<RouteTarget> = pools.keys().copied().collect();
        for (target, backends) in pools {
            self.selector.update_target_backends(target, backends).await;
        }
        self.selector.retain_targets(&targets).await;

        debug!(
            desired_count = desired.len(),
            running_count = running.len(),
            "Route sync complete"
        );
    }

    pub async fn handle_desired(&self, change: &DesiredChange) {
        match change {
            DesiredChange::Created(lrp) => {
                self.table.set_process_routes(lrp.process_guid, &routes_of(lrp));
            }
            DesiredChange::Updated { before, after } => {
                if before.routes != after.routes {
                    self.table
                        .set_process_routes(after.process_guid, &routes_of(after));
                }
            }
            DesiredChange::Removed(lrp) => {
                self.table.remove_process(&lrp.process_guid);
                self.selector.remove_process(&lrp.process_guid).await;
            }
        }
    }

    pub async fn handle_actual(&self, change: &ActualLrpChange) {
        match change {
            ActualLrpChange::Created(_) => {}
            ActualLrpChange::Changed { before, after } => {
                let replaced = before.instance_guid != after.instance_guid;
                if before.is_running() && (replaced || !after.is_running()) {
                    self.drop_instance(before).await;
                }
                for (target, backend) in backends_for(after) {
                    self.selector.get_or_create_pool(target).await.upsert(backend).await;
                }
            }
            ActualLrpChange::Removed(lrp) => self.drop_instance(lrp).await,
        }
    }

    async fn drop_instance(&self, lrp: &ActualLrp) {
        if let Some(instance_guid) = &lrp.instance_guid {
            self.selector
                .remove_instance(&lrp.key.process_guid, instance_guid)
                .await;
        }
    }

    /// Run until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut desired_events = self.desired.subscribe();
        let mut actual_events = self.actual.subscribe();

        self.sync_all().await;
        info!(
            sync_interval_ms = self.sync_interval.as_millis() as u64,
            "Route emitter started"
        );

        let mut interval = tokio::time::interval(self.sync_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                change = desired_events.recv() => match change {
                    Ok(change) => self.handle_desired(&change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Desired events lagged, resyncing");
                        self.sync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                change = actual_events.recv() => match change {
                    Ok(change) => self.handle_actual(&change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Actual events lagged, resyncing");
                        self.sync_all().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = interval.tick() => self.sync_all().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Route emitter shutting down");
                        break;
                    }
                }
            }
        }
    }
}
