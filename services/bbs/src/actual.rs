//! Actual LRP store.
//!
//! One record per (process guid, index). Every mutation is checked against
//! the state machine in [`ActualLrpState::can_transition_to`] and
//! broadcast as an [`ActualLrpChange`].

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use vizzini_id::{CellId, InstanceGuid, ProcessGuid};
use vizzini_models::{
    ActualLrp, ActualLrpFilter, ActualLrpKey, ActualLrpNetInfo, ActualLrpState, BbsError,
    BbsResult,
};

const EVENT_CAPACITY: usize = 4096;

type RecordKey = (ProcessGuid, i32);

/// A change to one actual LRP record.
#[derive(Debug, Clone)]
pub enum ActualLrpChange {
    Created(ActualLrp),
    Changed { before: ActualLrp, after: ActualLrp },
    Removed(ActualLrp),
}

pub struct ActualStore {
    records: RwLock<BTreeMap<RecordKey, ActualLrp>>,
    events: broadcast::Sender<ActualLrpChange>,
}

fn record_key(key: &ActualLrpKey) -> RecordKey {
    (key.process_guid, key.index)
}

fn check_transition(lrp: &ActualLrp, to: ActualLrpState) -> BbsResult<()> {
    if lrp.state.can_transition_to(to) {
        Ok(())
    } else {
        Err(BbsError::InvalidTransition {
            key: lrp.key.to_string(),
            from: lrp.state,
            to,
        })
    }
}

fn check_instance(lrp: &ActualLrp, instance_guid: &InstanceGuid) -> BbsResult<()> {
    if lrp.instance_guid.as_ref() == Some(instance_guid) {
        Ok(())
    } else {
        Err(BbsError::invalid(format!(
            "actual lrp {} is not held by instance {instance_guid}",
            lrp.key
        )))
    }
}

impl ActualStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActualLrpChange> {
        self.events.subscribe()
    }

    pub async fn create_unclaimed(&self, key: ActualLrpKey) -> BbsResult<ActualLrp> {
        let mut records = self.records.write().await;
        let slot = record_key(&key);
        if records.contains_key(&slot) {
            return Err(BbsError::ResourceExists {
                resource: "actual lrp",
                key: key.to_string(),
            });
        }

        let lrp = ActualLrp::unclaimed(key);
        records.insert(slot, lrp.clone());
        debug!(key = %lrp.key, "Actual LRP created");
        let _ = self.events.send(ActualLrpChange::Created(lrp.clone()));
        Ok(lrp)
    }

    /// Unclaimed -> Claimed on `cell_id` as `instance_guid`.
    pub async fn claim(
        &self,
        key: &ActualLrpKey,
        cell_id: CellId,
        instance_guid: InstanceGuid,
    ) -> BbsResult<ActualLrp> {
        self.mutate(key, |lrp| {
            check_transition(lrp, ActualLrpState::Claimed)?;
            lrp.state = ActualLrpState::Claimed;
            lrp.cell_id = Some(cell_id);
            lrp.instance_guid = Some(instance_guid);
            Ok(())
        })
        .await
    }

    /// Claimed -> Running. Repeating the call for the same instance is a
    /// no-op.
    pub async fn start(
        &self,
        key: &ActualLrpKey,
        instance_guid: &InstanceGuid,
        net_info: ActualLrpNetInfo,
    ) -> BbsResult<ActualLrp> {
        {
            let records = self.records.read().await;
            if let Some(lrp) = records.get(&record_key(key)) {
                if lrp.is_running() && lrp.instance_guid.as_ref() == Some(instance_guid) {
                    return Ok(lrp.clone());
                }
            }
        }

        let lrp = self
            .mutate(key, |lrp| {
                check_instance(lrp, instance_guid)?;
                check_transition(lrp, ActualLrpState::Running)?;
                lrp.state = ActualLrpState::Running;
                lrp.net_info = Some(net_info);
                Ok(())
            })
            .await?;

        info!(key = %lrp.key, instance_guid = %instance_guid, "Actual LRP running");
        Ok(lrp)
    }

    /// Claimed or Running -> Crashed. Clears placement and bumps the crash
    /// count.
    pub async fn crash(
        &self,
        key: &ActualLrpKey,
        instance_guid: &InstanceGuid,
        reason: impl Into<String>,
    ) -> BbsResult<ActualLrp> {
        let reason = reason.into();
        let lrp = self
            .mutate(key, |lrp| {
                check_instance(lrp, instance_guid)?;
                check_transition(lrp, ActualLrpState::Crashed)?;
                lrp.state = ActualLrpState::Crashed;
                lrp.crash_count += 1;
                lrp.crash_reason = Some(reason.clone());
                lrp.net_info = None;
                lrp.cell_id = None;
                lrp.instance_guid = None;
                Ok(())
            })
            .await?;

        warn!(
            key = %lrp.key,
            crash_count = lrp.crash_count,
            reason = %reason,
            "Actual LRP crashed"
        );
        Ok(lrp)
    }

    /// Crashed -> Unclaimed, keeping the crash count.
    pub async fn restart(&self, key: &ActualLrpKey) -> BbsResult<ActualLrp> {
        self.mutate(key, |lrp| {
            if lrp.state != ActualLrpState::Crashed {
                return Err(BbsError::InvalidTransition {
                    key: lrp.key.to_string(),
                    from: lrp.state,
                    to: ActualLrpState::Unclaimed,
                });
            }
            lrp.state = ActualLrpState::Unclaimed;
            Ok(())
        })
        .await
    }

    /// Drop placement and go back to Unclaimed, e.g. when a container
    /// could not be launched.
    pub async fn unclaim(
        &self,
        key: &ActualLrpKey,
        instance_guid: &InstanceGuid,
    ) -> BbsResult<ActualLrp> {
        self.mutate(key, |lrp| {
            check_instance(lrp, instance_guid)?;
            check_transition(lrp, ActualLrpState::Unclaimed)?;
            lrp.state = ActualLrpState::Unclaimed;
            lrp.net_info = None;
            lrp.cell_id = None;
            lrp.instance_guid = None;
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, key: &ActualLrpKey) -> BbsResult<ActualLrp> {
        let removed = self
            .records
            .write()
            .await
            .remove(&record_key(key))
            .ok_or_else(|| BbsError::actual_not_found(key))?;

        debug!(key = %removed.key, state = %removed.state, "Actual LRP removed");
        let _ = self.events.send(ActualLrpChange::Removed(removed.clone()));
        Ok(removed)
    }

    pub async fn get(&self, key: &ActualLrpKey) -> BbsResult<ActualLrp> {
        self.records
            .read()
            .await
            .get(&record_key(key))
            .cloned()
            .ok_or_else(|| BbsError::actual_not_found(key))
    }

    /// Records matching `filter`, ordered by (process guid, index).
    pub async fn list(&self, filter: &ActualLrpFilter) -> Vec<ActualLrp> {
        let records = self.records.read().await;
        match filter.process_guid {
            Some(guid) => records
                .range((guid, i32::MIN)..=(guid, i32::MAX))
                .map(|(_, lrp)| lrp)
                .filter(|lrp| filter.matches(lrp))
                .cloned()
                .collect(),
            None => records
                .values()
                .filter(|lrp| filter.matches(lrp))
                .cloned()
                .collect(),
        }
    }

    async fn mutate<F>(&self, key: &ActualLrpKey, apply: F) -> BbsResult<ActualLrp>
    where
        F: FnOnce(&mut ActualLrp) -> BbsResult<()>,
    {
        let mut records = self.records.write().await;
        let lrp = records
            .get_mut(&record_key(key))
            .ok_or_else(|| BbsError::actual_not_found(key))?;

        let before = lrp.clone();
        apply(lrp)?;
        if lrp.state != before.state {
            lrp.since = Utc::now();
        }
        lrp.modification_tag.increment();

        let after = lrp.clone();
        let _ = self.events.send(ActualLrpChange::Changed {
            before,
            after: after.clone(),
        });
        Ok(after)
    }
}

impl Default for ActualStore {
    fn default() -> Self {
        Self::new()
    }
}
