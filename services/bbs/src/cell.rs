//! Simulated cells and the containers they run.
//!
//! A cell owns an address, leases host ports and instance addresses, and
//! runs one container per claimed instance. Starting a container renders its
//! environment once from the placement, waits out the boot delay, then
//! reports Running to the actual store. A container's lease goes back to the
//! cell when the container is removed.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vizzini_id::{CellId, InstanceGuid};
use vizzini_models::{
    env_keys, ActualLrpKey, ActualLrpNetInfo, BbsError, BbsResult, CfPortMapping, DesiredLrp,
    EnvironmentSnapshot, PortMapping,
};

use crate::actual::ActualStore;
use crate::workload::{Workload, WorkloadRequest, WorkloadResponse};

/// First host port handed out on every cell.
pub const HOST_PORT_BASE: u32 = 61000;

/// Last host port handed out on every cell.
pub const HOST_PORT_MAX: u32 = 65535;

/// Instance addresses use host octets `1..=INSTANCE_HOST_MAX`.
pub const INSTANCE_HOST_MAX: u8 = 254;

/// In-container port of the first TLS proxy listener.
pub const CONTAINER_TLS_PROXY_BASE: u32 = 61001;

/// A running (or draining) container.
#[derive(Debug)]
pub struct Container {
    pub key: ActualLrpKey,
    pub instance_guid: InstanceGuid,
    pub cell_id: CellId,
    pub net_info: ActualLrpNetInfo,
    workload: Workload,
    lease: Lease,
    alive: AtomicBool,
}

impl Container {
    pub fn env(&self) -> &EnvironmentSnapshot {
        self.workload.env()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Serve a request on `container_port`. A dead container refuses.
    pub fn handle(&self, container_port: u32, request: &WorkloadRequest) -> Option<WorkloadResponse> {
        if !self.is_alive() {
            return None;
        }
        self.workload.handle(container_port, request)
    }

    fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// Environment for one container, in a fixed order.
pub fn render_environment(
    key: &ActualLrpKey,
    instance_guid: &InstanceGuid,
    net_info: &ActualLrpNetInfo,
) -> BbsResult<EnvironmentSnapshot> {
    let ports_payload = CfPortMapping::payload(net_info)
        .map_err(|e| BbsError::Fatal(format!("encode {}: {e}", env_keys::CF_INSTANCE_PORTS)))?;

    let mut env = EnvironmentSnapshot::new();
    env.push(env_keys::INSTANCE_GUID, instance_guid.to_string());
    env.push(env_keys::INSTANCE_INDEX, key.index.to_string());
    env.push(env_keys::CF_INSTANCE_GUID, instance_guid.to_string());
    env.push(env_keys::CF_INSTANCE_INDEX, key.index.to_string());
    env.push(env_keys::CF_INSTANCE_IP, net_info.address.clone());
    env.push(env_keys::CF_INSTANCE_INTERNAL_IP, net_info.instance_address.clone());

    if let Some(first) = net_info.ports.first() {
        if let Some(host_port) = first.host_port {
            env.push(env_keys::CF_INSTANCE_PORT, host_port.to_string());
            env.push(
                env_keys::CF_INSTANCE_ADDR,
                format!("{}:{host_port}", net_info.address),
            );
        }
        env.push(env_keys::PORT, first.container_port.to_string());
    }
    env.push(env_keys::CF_INSTANCE_PORTS, ports_payload);

    Ok(env)
}

/// What a live container holds on its cell.
#[derive(Debug, Default)]
struct Lease {
    instance_host: u8,
    host_ports: Vec<u32>,
}

/// Host ports and instance host octets in use on one cell.
///
/// Both are handed out round-robin from their range, skipping values a live
/// container still holds.
#[derive(Debug)]
struct Allocator {
    ports_in_use: BTreeSet<u32>,
    next_port: u32,
    hosts_in_use: BTreeSet<u8>,
    next_host: u8,
}

impl Allocator {
    fn new() -> Self {
        Self {
            ports_in_use: BTreeSet::new(),
            next_port: HOST_PORT_BASE,
            hosts_in_use: BTreeSet::new(),
            next_host: 1,
        }
    }

    fn take_port(&mut self) -> Option<u32> {
        let span = HOST_PORT_MAX - HOST_PORT_BASE + 1;
        let start = self.next_port - HOST_PORT_BASE;
        let port = (0..span)
            .map(|offset| HOST_PORT_BASE + (start + offset) % span)
            .find(|port| !self.ports_in_use.contains(port))?;
        self.ports_in_use.insert(port);
        self.next_port = if port == HOST_PORT_MAX {
            HOST_PORT_BASE
        } else {
            port + 1
        };
        Some(port)
    }

    fn take_host(&mut self) -> Option<u8> {
        let span = u16::from(INSTANCE_HOST_MAX);
        let start = u16::from(self.next_host - 1);
        let host = (0..span)
            .filter_map(|offset| u8::try_from((start + offset) % span + 1).ok())
            .find(|host| !self.hosts_in_use.contains(host))?;
        self.hosts_in_use.insert(host);
        self.next_host = if host == INSTANCE_HOST_MAX { 1 } else { host + 1 };
        Some(host)
    }

    /// An instance address plus one mapping per declared port, in
    /// declaration order. Nothing is held on failure.
    fn lease(&mut self, desired: &DesiredLrp) -> Result<(Lease, Vec<PortMapping>), &'static str> {
        let instance_host = self.take_host().ok_or("instance addresses")?;
        let mut lease = Lease {
            instance_host,
            host_ports: Vec::new(),
        };

        let mut ports = Vec::with_capacity(desired.ports.len());
        for (i, &container_port) in desired.ports.iter().enumerate() {
            let Some(host_port) = self.take_port() else {
                self.release(&lease);
                return Err("host ports");
            };
            lease.host_ports.push(host_port);

            let mut mapping = PortMapping {
                container_port,
                host_port: Some(host_port),
                container_tls_proxy_port: None,
                host_tls_proxy_port: None,
            };
            if desired.tls_proxy {
                let Some(tls_port) = self.take_port() else {
                    self.release(&lease);
                    return Err("host ports");
                };
                lease.host_ports.push(tls_port);
                mapping.container_tls_proxy_port = Some(CONTAINER_TLS_PROXY_BASE + i as u32);
                mapping.host_tls_proxy_port = Some(tls_port);
            }
            ports.push(mapping);
        }
        Ok((lease, ports))
    }

    fn release(&mut self, lease: &Lease) {
        self.hosts_in_use.remove(&lease.instance_host);
        for port in &lease.host_ports {
            self.ports_in_use.remove(port);
        }
    }
}

pub struct Cell {
    id: CellId,
    address: Ipv4Addr,
    ordinal: u8,
    allocator: Mutex<Allocator>,
    boot_delay: Duration,
    drain_delay: Duration,
    containers: RwLock<HashMap<InstanceGuid, Arc<Container>>>,
}

impl Cell {
    pub fn new(ordinal: u8, boot_delay: Duration, drain_delay: Duration) -> Self {
        Self {
            id: CellId::new(),
            address: Ipv4Addr::new(10, 0, 16, ordinal.saturating_add(1)),
            ordinal,
            allocator: Mutex::new(Allocator::new()),
            boot_delay,
            drain_delay,
            containers: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn container(&self, instance_guid: &InstanceGuid) -> Option<Arc<Container>> {
        self.containers.read().await.get(instance_guid).cloned()
    }

    fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease an instance address and host ports for `desired`.
    fn allocate(&self, desired: &DesiredLrp) -> BbsResult<(Lease, ActualLrpNetInfo)> {
        let (lease, ports) = self.allocator().lease(desired).map_err(|exhausted| {
            BbsError::Transient(format!("{exhausted} exhausted on cell {}", self.id))
        })?;
        let instance_address = Ipv4Addr::new(10, 255, self.ordinal, lease.instance_host);
        let net_info = ActualLrpNetInfo {
            address: self.address.to_string(),
            instance_address: instance_address.to_string(),
            ports,
        };
        Ok((lease, net_info))
    }

    /// Start a container for a claimed instance.
    ///
    /// Returns once the container exists; it reports Running after the boot
    /// delay. If the record moved on meanwhile the container is discarded.
    pub async fn launch(
        self: &Arc<Self>,
        key: ActualLrpKey,
        desired: &DesiredLrp,
        instance_guid: InstanceGuid,
        actual: Arc<ActualStore>,
    ) -> BbsResult<Arc<Container>> {
        let (lease, net_info) = self.allocate(desired)?;
        let env = match render_environment(&key, &instance_guid, &net_info) {
            Ok(env) => env,
            Err(e) => {
                self.allocator().release(&lease);
                return Err(e);
            }
        };

        let container = Arc::new(Container {
            workload: Workload::new(key.index, env),
            key,
            instance_guid,
            cell_id: self.id,
            net_info,
            lease,
            alive: AtomicBool::new(true),
        });

        self.containers
            .write()
            .await
            .insert(instance_guid, Arc::clone(&container));

        debug!(
            cell_id = %self.id,
            key = %container.key,
            instance_guid = %instance_guid,
            "Container created"
        );

        let cell = Arc::clone(self);
        let booting = Arc::clone(&container);
        tokio::spawn(async move {
            tokio::time::sleep(cell.boot_delay).await;
            if !booting.is_alive() {
                return;
            }
            match actual
                .start(&booting.key, &booting.instance_guid, booting.net_info.clone())
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        key = %booting.key,
                        instance_guid = %booting.instance_guid,
                        error = %e,
                        "Discarding container whose record moved on"
                    );
                    cell.discard(&booting.instance_guid).await;
                }
            }
        });

        Ok(container)
    }

    /// Retire a container after the drain delay. It keeps serving until
    /// then.
    pub async fn stop(self: &Arc<Self>, instance_guid: InstanceGuid) {
        if self.container(&instance_guid).await.is_none() {
            return;
        }

        info!(cell_id = %self.id, instance_guid = %instance_guid, "Draining container");
        let cell = Arc::clone(self);
        let drain_delay = self.drain_delay;
        tokio::spawn(async move {
            tokio::time::sleep(drain_delay).await;
            cell.discard(&instance_guid).await;
        });
    }

    /// Kill a container at once, as if its process exited.
    pub async fn crash(&self, instance_guid: &InstanceGuid) -> Option<Arc<Container>> {
        let container = self.containers.write().await.remove(instance_guid)?;
        container.kill();
        self.allocator().release(&container.lease);
        warn!(cell_id = %self.id, instance_guid = %instance_guid, "Container crashed");
        Some(container)
    }

    async fn discard(&self, instance_guid: &InstanceGuid) {
        let removed = self.containers.write().await.remove(instance_guid);
        if let Some(container) = removed {
            container.kill();
            self.allocator().release(&container.lease);
            debug!(cell_id = %self.id, instance_guid = %instance_guid, "Container removed");
        }
    }
}

/// All cells, indexed by id.
pub struct CellRegistry {
    cells: Vec<Arc<Cell>>,
}

impl CellRegistry {
    pub fn new(count: usize, boot_delay: Duration, drain_delay: Duration) -> Self {
        let cells = (0..count.clamp(1, usize::from(u8::MAX)))
            .map(|ordinal| Arc::new(Cell::new(ordinal as u8, boot_delay, drain_delay)))
            .collect();
        Self { cells }
    }

    pub fn cells(&self) -> &[Arc<Cell>] {
        &self.cells
    }

    pub fn get(&self, cell_id: &CellId) -> Option<&Arc<Cell>> {
        self.cells.iter().find(|cell| cell.id == *cell_id)
    }

    /// The cell with the fewest containers; ties go to the lowest ordinal.
    pub async fn least_loaded(&self) -> Option<Arc<Cell>> {
        let mut best: Option<(usize, &Arc<Cell>)> = None;
        for cell in &self.cells {
            let load = cell.container_count().await;
            if best.map_or(true, |(min, _)| load < min) {
                best = Some((load, cell));
            }
        }
        best.map(|(_, cell)| Arc::clone(cell))
    }

    pub async fn container(
        &self,
        cell_id: &CellId,
        instance_guid: &InstanceGuid,
    ) -> Option<Arc<Container>> {
        self.get(cell_id)?.container(instance_guid).await
    }

    /// Search every cell.
    pub async fn find_container(&self, instance_guid: &InstanceGuid) -> Option<Arc<Container>> {
        for cell in &self.cells {
            if let Some(container) = cell.container(instance_guid).await {
                return Some(container);
            }
        }
        None
    }

    pub async fn stop(&self, cell_id: &CellId, instance_guid: InstanceGuid) {
        if let Some(cell) = self.get(cell_id) {
            cell.stop(instance_guid).await;
        }
    }
}
