//! Backend pool management and selection.
//!
//! One pool per route target (process, container port). A backend is one
//! Running instance's mapping for that port.
//!
//! - Round-robin among eligible backends
//! - A sticky request goes to its pinned instance while it is in the pool
//! - Failed backends are marked unhealthy and skipped for
//!   [`UNHEALTHY_RETRY_AFTER`], then retried

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use vizzini_id::{CellId, InstanceGuid, ProcessGuid};

use super::router::RouteTarget;

/// How long a failed backend sits out before it is tried again.
pub const UNHEALTHY_RETRY_AFTER: Duration = Duration::from_secs(2);

/// A backend endpoint representing a workload instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    pub instance_guid: InstanceGuid,
    pub index: i32,
    pub cell_id: CellId,
    pub address: String,
    pub host_port: Option<u32>,
    pub container_port: u32,
}

impl Backend {
    /// `address:host_port`, as a router would dial it.
    pub fn endpoint(&self) -> String {
        match self.host_port {
            Some(port) => format!("{}:{port}", self.address),
            None => self.address.clone(),
        }
    }
}

/// Health status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Not yet dialed.
    Unknown,
}

#[derive(Debug)]
struct BackendState {
    backend: Backend,
    health: HealthStatus,
    last_failure: Option<Instant>,
}

impl BackendState {
    fn fresh(backend: Backend) -> Self {
        Self {
            backend,
            health: HealthStatus::Unknown,
            last_failure: None,
        }
    }

    fn is_eligible(&self, now: Instant) -> bool {
        match self.health {
            HealthStatus::Healthy | HealthStatus::Unknown => true,
            HealthStatus::Unhealthy => self
                .last_failure
                .map_or(true, |at| now.duration_since(at) >= UNHEALTHY_RETRY_AFTER),
        }
    }
}

/// A pool of backends for a single route target.
pub struct BackendPool {
    target: RouteTarget,
    backends: RwLock<Vec<BackendState>>,
    rr_counter: AtomicUsize,
}

impl BackendPool {
    pub fn new(target: RouteTarget) -> Self {
        Self {
            target,
            backends: RwLock::new(Vec::new()),
            rr_counter: AtomicUsize::new(0),
        }
    }

    pub fn target(&self) -> RouteTarget {
        self.target
    }

    /// Replace the backend set, preserving health for backends that stay.
    pub async fn update_backends(&self, backends: Vec<Backend>) {
        let mut state = self.backends.write().await;

        let mut existing: HashMap<InstanceGuid, BackendState> = state
            .drain(..)
            .map(|s| (s.backend.instance_guid, s))
            .collect();

        *state = backends
            .into_iter()
            .map(|b| match existing.remove(&b.instance_guid) {
                Some(prev) if prev.backend == b => prev,
                _ => BackendState::fresh(b),
            })
            .collect();

        debug!(
            process_guid = %self.target.process_guid,
            port = self.target.port,
            backend_count = state.len(),
            "Updated backend pool"
        );
    }

    /// Add a backend, or refresh it if the instance is already present.
    pub async fn upsert(&self, backend: Backend) {
        let mut state = self.backends.write().await;
        match state
            .iter_mut()
            .find(|s| s.backend.instance_guid == backend.instance_guid)
        {
            Some(existing) if existing.backend == backend => {}
            Some(existing) => *existing = BackendState::fresh(backend),
            None => state.push(BackendState::fresh(backend)),
        }
    }

    /// Returns true if a backend was removed.
    pub async fn remove(&self, instance_guid: &InstanceGuid) -> bool {
        let mut state = self.backends.write().await;
        let before = state.len();
        state.retain(|s| s.backend.instance_guid != *instance_guid);
        before != state.len()
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }

    /// Backends to try, in order.
    ///
    /// The sticky instance comes first when present. The rest follow in
    /// round-robin order. An unhealthy backend is left out until its retry
    /// window passes, unless every backend is unhealthy.
    pub async fn candidates(&self, sticky: Option<&InstanceGuid>) -> Vec<Backend> {
        let now = Instant::now();
        let state = self.backends.read().await;

        let mut eligible: Vec<&BackendState> =
            state.iter().filter(|s| s.is_eligible(now)).collect();
        if eligible.is_empty() {
            eligible = state.iter().collect();
        }
        if eligible.is_empty() {
            return Vec::new();
        }

        let mut ordered = Vec::with_capacity(eligible.len());
        if let Some(guid) = sticky {
            if let Some(pinned) = state.iter().find(|s| s.backend.instance_guid == *guid) {
                ordered.push(pinned.backend.clone());
            }
        }

        let start = self.rr_counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        for i in 0..eligible.len() {
            let candidate = &eligible[(start + i) % eligible.len()].backend;
            if Some(&candidate.instance_guid) != sticky {
                ordered.push(candidate.clone());
            }
        }
        ordered
    }

    pub async fn mark_healthy(&self, instance_guid: &InstanceGuid) {
        let mut backends = self.backends.write().await;
        if let Some(state) = backends
            .iter_mut()
            .find(|s| s.backend.instance_guid == *instance_guid)
        {
            state.health = HealthStatus::Healthy;
            state.last_failure = None;
        }
    }

    pub async fn mark_unhealthy(&self, instance_guid: &InstanceGuid) {
        let mut backends = self.backends.write().await;
        if let Some(state) = backends
            .iter_mut()
            .find(|s| s.backend.instance_guid == *instance_guid)
        {
            state.health = HealthStatus::Unhealthy;
            state.last_failure = Some(Instant::now());
        }
    }

    pub async fn health(&self, instance_guid: &InstanceGuid) -> Option<HealthStatus> {
        self.backends
            .read()
            .await
            .iter()
            .find(|s| s.backend.instance_guid == *instance_guid)
            .map(|s| s.health)
    }
}

/// Selector that manages backend pools for every route target.
pub struct BackendSelector {
    pools: RwLock<HashMap<RouteTarget, Arc<BackendPool>>>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create_pool(&self, target: RouteTarget) -> Arc<BackendPool> {
        // Fast path: read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(&target) {
                return Arc::clone(pool);
            }
        }

        let mut pools = self.pools.write().await;
        pools
            .entry(target)
            .or_insert_with(|| Arc::new(BackendPool::new(target)))
            .clone()
    }

    pub async fn get_pool(&self, target: &RouteTarget) -> Option<Arc<BackendPool>> {
        self.pools.read().await.get(target).cloned()
    }

    pub async fn update_target_backends(&self, target: RouteTarget, backends: Vec<Backend>) {
        let pool = self.get_or_create_pool(target).await;
        pool.update_backends(backends).await;
    }

    /// Drop `instance_guid` from every pool of `process_guid`.
    pub async fn remove_instance(&self, process_guid: &ProcessGuid, instance_guid: &InstanceGuid) {
        let pools: Vec<Arc<BackendPool>> = self
            .pools
            .read()
            .await
            .iter()
            .filter(|(target, _)| target.process_guid == *process_guid)
            .map(|(_, pool)| Arc::clone(pool))
            .collect();

        for pool in pools {
            if pool.remove(instance_guid).await {
                debug!(
                    process_guid = %process_guid,
                    port = pool.target().port,
                    instance_guid = %instance_guid,
                    "Backend removed"
                );
            }
        }
    }

    pub async fn remove_process(&self, process_guid: &ProcessGuid) {
        self.pools
            .write()
            .await
            .retain(|target, _| target.process_guid != *process_guid);
    }

    /// Drop pools whose target is not in `keep`.
    pub async fn retain_targets(&self, keep: &[RouteTarget]) {
        self.pools
            .write()
            .await
            .retain(|target, _| keep.contains(target));
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}
