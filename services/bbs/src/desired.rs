//! Desired LRP store.
//!
//! Mutations are serialised under one write lock, so updates to the same
//! process are applied in submission order. Every applied change is
//! broadcast; the scheduler and the route emitter subscribe.
//!
//! A hostname belongs to at most one process. Claiming a hostname another
//! process already routes is rejected.

use std::collections::{BTreeSet, HashMap};

use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument};
use vizzini_id::ProcessGuid;
use vizzini_models::{BbsError, BbsResult, DesiredLrp, DesiredLrpUpdate, ModificationTag};
use vizzini_reconcile::SpecHash;

use crate::routing::normalize_hostname;

const EVENT_CAPACITY: usize = 1024;

/// A change to the desired set.
#[derive(Debug, Clone)]
pub enum DesiredChange {
    Created(DesiredLrp),
    Updated {
        before: DesiredLrp,
        after: DesiredLrp,
    },
    Removed(DesiredLrp),
}

impl DesiredChange {
    pub fn process_guid(&self) -> ProcessGuid {
        match self {
            Self::Created(lrp) | Self::Removed(lrp) => lrp.process_guid,
            Self::Updated { after, .. } => after.process_guid,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDesired {
    lrp: DesiredLrp,
    spec_hash: SpecHash,
}

/// Hash of everything a client can set. The modification tag is excluded
/// so replaying a request hashes the same.
fn spec_hash(lrp: &DesiredLrp) -> SpecHash {
    SpecHash::from_json(&json!({
        "domain": lrp.domain,
        "instances": lrp.instances,
        "ports": lrp.ports,
        "routes": lrp.routes,
        "tls_proxy": lrp.tls_proxy,
        "annotation": lrp.annotation,
    }))
}

fn routed_hostnames(lrp: &DesiredLrp) -> BbsResult<BTreeSet<String>> {
    Ok(lrp
        .cf_routes()?
        .iter()
        .flat_map(|route| route.hostnames.iter())
        .map(|hostname| normalize_hostname(hostname))
        .collect())
}

/// Fail if another process already routes one of `lrp`'s hostnames.
fn check_hostnames(records: &HashMap<ProcessGuid, StoredDesired>, lrp: &DesiredLrp) -> BbsResult<()> {
    let claimed = routed_hostnames(lrp)?;
    if claimed.is_empty() {
        return Ok(());
    }

    for (owner, stored) in records {
        if *owner == lrp.process_guid {
            continue;
        }
        let Ok(taken) = routed_hostnames(&stored.lrp) else {
            continue;
        };
        if let Some(hostname) = claimed.intersection(&taken).next() {
            return Err(BbsError::invalid(format!(
                "hostname {hostname} is already routed to {owner}"
            )));
        }
    }
    Ok(())
}

pub struct DesiredStore {
    records: RwLock<HashMap<ProcessGuid, StoredDesired>>,
    events: broadcast::Sender<DesiredChange>,
}

impl DesiredStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DesiredChange> {
        self.events.subscribe()
    }

    /// Record a new desired LRP with a fresh modification tag.
    #[instrument(skip(self, lrp), fields(process_guid = %lrp.process_guid))]
    pub async fn desire(&self, mut lrp: DesiredLrp) -> BbsResult<DesiredLrp> {
        lrp.validate()?;

        let mut records = self.records.write().await;
        if records.contains_key(&lrp.process_guid) {
            return Err(BbsError::ResourceExists {
                resource: "desired lrp",
                key: lrp.process_guid.to_string(),
            });
        }
        check_hostnames(&records, &lrp)?;

        lrp.modification_tag = ModificationTag::new();
        let stored = StoredDesired {
            spec_hash: spec_hash(&lrp),
            lrp: lrp.clone(),
        };
        records.insert(lrp.process_guid, stored);

        info!(instances = lrp.instances, ports = ?lrp.ports, "Desired LRP created");
        let _ = self.events.send(DesiredChange::Created(lrp.clone()));
        Ok(lrp)
    }

    /// Apply `update`. An update that changes nothing keeps the tag and
    /// emits nothing.
    #[instrument(skip(self, update))]
    pub async fn update(
        &self,
        process_guid: &ProcessGuid,
        update: DesiredLrpUpdate,
    ) -> BbsResult<DesiredLrp> {
        update.validate()?;

        let mut records = self.records.write().await;
        let stored = records
            .get(process_guid)
            .ok_or_else(|| BbsError::desired_not_found(process_guid))?;
        update.validate_against(&stored.lrp)?;

        let before = stored.lrp.clone();
        let mut after = before.clone();
        update.apply_to(&mut after);

        let hash = spec_hash(&after);
        if hash == stored.spec_hash {
            debug!("Desired LRP update is a no-op");
            return Ok(before);
        }
        if update.routes.is_some() {
            check_hostnames(&records, &after)?;
        }

        after.modification_tag.increment();
        records.insert(
            *process_guid,
            StoredDesired {
                lrp: after.clone(),
                spec_hash: hash,
            },
        );

        info!(
            instances = after.instances,
            tag_index = after.modification_tag.index,
            "Desired LRP updated"
        );
        let _ = self.events.send(DesiredChange::Updated {
            before,
            after: after.clone(),
        });
        Ok(after)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, process_guid: &ProcessGuid) -> BbsResult<DesiredLrp> {
        let removed = self
            .records
            .write()
            .await
            .remove(process_guid)
            .ok_or_else(|| BbsError::desired_not_found(process_guid))?;

        info!("Desired LRP removed");
        let _ = self.events.send(DesiredChange::Removed(removed.lrp.clone()));
        Ok(removed.lrp)
    }

    pub async fn get(&self, process_guid: &ProcessGuid) -> BbsResult<DesiredLrp> {
        self.records
            .read()
            .await
            .get(process_guid)
            .map(|stored| stored.lrp.clone())
            .ok_or_else(|| BbsError::desired_not_found(process_guid))
    }

    /// All desired LRPs, ordered by process guid.
    pub async fn list(&self) -> Vec<DesiredLrp> {
        let mut lrps: Vec<DesiredLrp> = self
            .records
            .read()
            .await
            .values()
            .map(|stored| stored.lrp.clone())
            .collect();
        lrps.sort_by_key(|lrp| lrp.process_guid);
        lrps
    }
}

impl Default for DesiredStore {
    fn default() -> Self {
        Self::new()
    }
}
