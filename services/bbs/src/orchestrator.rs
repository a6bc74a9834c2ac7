//! Wires the stores, cells, scheduler and routing into one running
//! orchestrator.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vizzini_id::ProcessGuid;
use vizzini_models::{ActualLrp, ActualLrpKey, BbsError, BbsResult};

use crate::actual::ActualStore;
use crate::cell::CellRegistry;
use crate::client::{FabricClient, LocalBbsClient};
use crate::config::Config;
use crate::desired::DesiredStore;
use crate::routing::{BackendSelector, RouteEmitter, RouteTable, RoutingFabric};
use crate::scheduler::{SchedulerReconciler, SchedulerWorker};

/// A running in-memory orchestrator.
///
/// Background tasks stop when [`Bbs::shutdown`] is awaited or the value is
/// dropped.
pub struct Bbs {
    config: Config,
    desired: Arc<DesiredStore>,
    actual: Arc<ActualStore>,
    cells: Arc<CellRegistry>,
    table: Arc<RouteTable>,
    fabric: Arc<RoutingFabric>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bbs {
    /// Start the scheduler and route emitter. Must be called inside a tokio
    /// runtime.
    pub fn start(config: Config) -> Self {
        let desired = Arc::new(DesiredStore::new());
        let actual = Arc::new(ActualStore::new());
        let cells = Arc::new(CellRegistry::new(
            config.cell_count,
            config.boot_delay,
            config.drain_delay,
        ));
        let table = Arc::new(RouteTable::new());
        let selector = Arc::new(BackendSelector::new());
        let fabric = Arc::new(RoutingFabric::new(
            Arc::clone(&table),
            Arc::clone(&selector),
            Arc::clone(&cells),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = SchedulerWorker::new(
            SchedulerReconciler::new(
                Arc::clone(&desired),
                Arc::clone(&actual),
                Arc::clone(&cells),
                config.restart_policy.clone(),
            ),
            config.convergence_interval,
        );
        let emitter = RouteEmitter::new(
            Arc::clone(&desired),
            Arc::clone(&actual),
            Arc::clone(&table),
            selector,
            config.route_sync_interval,
        );

        let worker_shutdown = shutdown_rx.clone();
        let tasks = vec![
            tokio::spawn(async move { worker.run(worker_shutdown).await }),
            tokio::spawn(async move { emitter.run(shutdown_rx).await }),
        ];

        info!(
            domain = %config.domain,
            cell_count = config.cell_count,
            "Orchestrator started"
        );

        Self {
            config,
            desired,
            actual,
            cells,
            table,
            fabric,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    pub fn client(&self) -> LocalBbsClient {
        LocalBbsClient::new(Arc::clone(&self.desired), Arc::clone(&self.actual))
    }

    /// A route client with an empty cookie jar.
    pub fn route_client(&self) -> FabricClient {
        FabricClient::new(Arc::clone(&self.fabric))
    }

    pub fn cells(&self) -> &Arc<CellRegistry> {
        &self.cells
    }

    pub fn route_table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// Crash the instance at (`process_guid`, `index`), as if its process
    /// exited.
    pub async fn crash_instance(
        &self,
        process_guid: &ProcessGuid,
        index: i32,
        reason: &str,
    ) -> BbsResult<ActualLrp> {
        let lrp = self.desired.get(process_guid).await?;
        let key = ActualLrpKey::new(*process_guid, index, lrp.domain);
        let current = self.actual.get(&key).await?;

        let (Some(cell_id), Some(instance_guid)) = (current.cell_id, current.instance_guid) else {
            return Err(BbsError::invalid(format!("actual lrp {key} is not placed")));
        };

        if let Some(cell) = self.cells.get(&cell_id) {
            cell.crash(&instance_guid).await;
        }
        self.actual.crash(&key, &instance_guid, reason).await
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }
        info!("Orchestrator stopped");
    }
}

impl Drop for Bbs {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
