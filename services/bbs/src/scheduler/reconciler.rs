//! Scheduler reconciler for actual LRP placement.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use vizzini_id::{InstanceGuid, ProcessGuid};
use vizzini_models::{
    ActualLrp, ActualLrpFilter, ActualLrpKey, ActualLrpState, BbsError, BbsResult, DesiredLrp,
};
use vizzini_reconcile::{plan_indices, IndexPlan, Observed, RestartPolicy};

use crate::actual::ActualStore;
use crate::cell::CellRegistry;
use crate::desired::DesiredStore;

/// Totals for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub lrps_processed: usize,
    pub lrps_failed: usize,
    pub instances_created: usize,
    pub instances_placed: usize,
    pub instances_retired: usize,
    pub instances_restarted: usize,
    pub instances_fatal: usize,
}

impl ReconcileStats {
    pub fn changed_anything(&self) -> bool {
        self.instances_created > 0
            || self.instances_placed > 0
            || self.instances_retired > 0
            || self.instances_restarted > 0
    }

    fn absorb(&mut self, other: &ReconcileStats) {
        self.instances_created += other.instances_created;
        self.instances_placed += other.instances_placed;
        self.instances_retired += other.instances_retired;
        self.instances_restarted += other.instances_restarted;
        self.instances_fatal += other.instances_fatal;
    }
}

fn observe(lrp: &ActualLrp) -> Observed {
    match lrp.state {
        ActualLrpState::Unclaimed | ActualLrpState::Claimed => Observed::Pending,
        ActualLrpState::Running => Observed::Running,
        ActualLrpState::Crashed => Observed::Crashed {
            crash_count: lrp.crash_count,
            crashed_for: (Utc::now() - lrp.since).to_std().unwrap_or_default(),
        },
    }
}

/// The scheduler reconciler.
pub struct SchedulerReconciler {
    desired: Arc<DesiredStore>,
    actual: Arc<ActualStore>,
    cells: Arc<CellRegistry>,
    policy: RestartPolicy,
}

impl SchedulerReconciler {
    pub fn new(
        desired: Arc<DesiredStore>,
        actual: Arc<ActualStore>,
        cells: Arc<CellRegistry>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            desired,
            actual,
            cells,
            policy,
        }
    }

    pub fn desired(&self) -> &Arc<DesiredStore> {
        &self.desired
    }

    /// Run a single reconciliation pass over every desired LRP, then retire
    /// actual LRPs nobody desires any more.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> BbsResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let desired = self.desired.list().await;
        let mut actuals: BTreeMap<ProcessGuid, Vec<ActualLrp>> = BTreeMap::new();
        for lrp in self.actual.list(&ActualLrpFilter::default()).await {
            actuals.entry(lrp.key.process_guid).or_default().push(lrp);
        }

        for lrp in &desired {
            let current = actuals.remove(&lrp.process_guid).unwrap_or_default();
            match self.reconcile_lrp(lrp, &current).await {
                Ok(lrp_stats) => {
                    stats.lrps_processed += 1;
                    stats.absorb(&lrp_stats);
                }
                Err(e) => {
                    warn!(
                        process_guid = %lrp.process_guid,
                        error = %e,
                        "Failed to reconcile desired LRP"
                    );
                    stats.lrps_failed += 1;
                }
            }
        }

        for (process_guid, orphans) in actuals {
            debug!(process_guid = %process_guid, count = orphans.len(), "Retiring orphaned actual LRPs");
            for orphan in &orphans {
                if self.retire(orphan).await? {
                    stats.instances_retired += 1;
                }
            }
        }

        if stats.changed_anything() {
            info!(
                lrps_processed = stats.lrps_processed,
                lrps_failed = stats.lrps_failed,
                instances_created = stats.instances_created,
                instances_placed = stats.instances_placed,
                instances_retired = stats.instances_retired,
                instances_restarted = stats.instances_restarted,
                "Reconciliation pass complete"
            );
        }

        Ok(stats)
    }

    /// Plan for one desired LRP against its current actuals.
    pub fn plan(&self, desired: &DesiredLrp, current: &[ActualLrp]) -> IndexPlan {
        plan_indices(
            desired.instances,
            current,
            ActualLrp::index,
            observe,
            &self.policy,
        )
    }

    #[instrument(skip(self, desired, current), fields(process_guid = %desired.process_guid))]
    async fn reconcile_lrp(
        &self,
        desired: &DesiredLrp,
        current: &[ActualLrp],
    ) -> BbsResult<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        let plan = self.plan(desired, current);
        if plan.is_noop() && plan.pending.is_empty() {
            stats.instances_fatal = plan.fatal.len();
            return Ok(stats);
        }

        debug!(
            desired = desired.instances,
            status = ?plan.status(),
            to_create = ?plan.to_create,
            to_retire = ?plan.to_retire,
            to_restart = ?plan.to_restart,
            "Planned LRP"
        );

        let by_index: BTreeMap<i32, &ActualLrp> =
            current.iter().map(|lrp| (lrp.index(), lrp)).collect();

        // Retire first so scale-down frees capacity before placement.
        for index in &plan.to_retire {
            if let Some(lrp) = by_index.get(index) {
                if self.retire(lrp).await? {
                    stats.instances_retired += 1;
                }
            }
        }

        let mut unplaced: Vec<ActualLrpKey> = Vec::new();

        for index in &plan.to_create {
            let key = ActualLrpKey::new(desired.process_guid, *index, desired.domain.clone());
            match self.actual.create_unclaimed(key.clone()).await {
                Ok(_) => {
                    stats.instances_created += 1;
                    unplaced.push(key);
                }
                Err(BbsError::ResourceExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        for index in &plan.to_restart {
            if let Some(lrp) = by_index.get(index) {
                let restarted = self.actual.restart(&lrp.key).await?;
                info!(
                    key = %restarted.key,
                    crash_count = restarted.crash_count,
                    "Restarting crashed instance"
                );
                stats.instances_restarted += 1;
                unplaced.push(restarted.key);
            }
        }

        for index in &plan.pending {
            if let Some(lrp) = by_index.get(index) {
                if lrp.state == ActualLrpState::Unclaimed {
                    unplaced.push(lrp.key.clone());
                }
            }
        }

        for key in unplaced {
            self.place(&key, desired).await?;
            stats.instances_placed += 1;
        }

        if !plan.fatal.is_empty() {
            debug!(fatal = ?plan.fatal, "Instances crashed beyond restart policy");
        }
        stats.instances_fatal = plan.fatal.len();

        Ok(stats)
    }

    /// Claim `key` on the least loaded cell and start its container.
    async fn place(&self, key: &ActualLrpKey, desired: &DesiredLrp) -> BbsResult<()> {
        let cell = self
            .cells
            .least_loaded()
            .await
            .ok_or_else(|| BbsError::Transient("no cells available".to_string()))?;

        let instance_guid = InstanceGuid::new();
        self.actual.claim(key, cell.id(), instance_guid).await?;

        if let Err(e) = cell
            .launch(key.clone(), desired, instance_guid, Arc::clone(&self.actual))
            .await
        {
            warn!(key = %key, error = %e, "Container launch failed");
            self.actual.unclaim(key, &instance_guid).await?;
            return Err(e);
        }

        debug!(key = %key, cell_id = %cell.id(), instance_guid = %instance_guid, "Instance placed");
        Ok(())
    }

    /// Remove the record, then drain its container. Returns false if the
    /// record was already gone.
    async fn retire(&self, lrp: &ActualLrp) -> BbsResult<bool> {
        match self.actual.remove(&lrp.key).await {
            Ok(removed) => {
                if let (Some(cell_id), Some(instance_guid)) = (removed.cell_id, removed.instance_guid)
                {
                    self.cells.stop(&cell_id, instance_guid).await;
                }
                debug!(key = %removed.key, state = %removed.state, "Instance retired");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
