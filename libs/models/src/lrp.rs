//! Desired and actual long-running process records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vizzini_id::{CellId, InstanceGuid, ProcessGuid, Ulid};

use crate::error::{BbsError, BbsResult};
use crate::routing::{CfRoutes, RoutingInfo};

// =============================================================================
// Modification Tag
// =============================================================================

/// Version stamp of a record.
///
/// The epoch changes when the record is recreated; the index increments
/// once per applied mutation. Two tags with the same epoch are ordered by
/// index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    /// Fresh tag with a new epoch.
    pub fn new() -> Self {
        Self {
            epoch: Ulid::new().to_string().to_lowercase(),
            index: 0,
        }
    }

    pub fn increment(&mut self) {
        self.index += 1;
    }

    /// Returns true if `self` supersedes `other` within the same epoch.
    pub fn succeeds(&self, other: &ModificationTag) -> bool {
        self.epoch == other.epoch && self.index > other.index
    }
}

impl Default for ModificationTag {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Desired LRP
// =============================================================================

/// Declared specification of a long-running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredLrp {
    pub process_guid: ProcessGuid,
    pub domain: String,
    pub instances: i32,

    /// Container ports, in declaration order.
    #[serde(default)]
    pub ports: Vec<u32>,

    #[serde(default)]
    pub routes: RoutingInfo,

    /// Assign TLS proxy ports alongside each declared port.
    #[serde(default)]
    pub tls_proxy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,

    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl DesiredLrp {
    /// A single-instance LRP with no ports or routes.
    pub fn new(process_guid: ProcessGuid, domain: impl Into<String>) -> Self {
        Self {
            process_guid,
            domain: domain.into(),
            instances: 1,
            ports: Vec::new(),
            routes: RoutingInfo::new(),
            tls_proxy: false,
            annotation: None,
            modification_tag: ModificationTag::new(),
        }
    }

    /// Parsed `cf-router` routes.
    pub fn cf_routes(&self) -> BbsResult<CfRoutes> {
        CfRoutes::from_routing_info(&self.routes)
            .map_err(|e| BbsError::invalid(format!("malformed routes: {e}")))
    }

    pub fn validate(&self) -> BbsResult<()> {
        if self.domain.trim().is_empty() {
            return Err(BbsError::invalid("domain must not be empty"));
        }
        validate_instances(self.instances)?;

        let mut seen = BTreeSet::new();
        for port in &self.ports {
            if *port == 0 || *port > u32::from(u16::MAX) {
                return Err(BbsError::invalid(format!("invalid container port {port}")));
            }
            if !seen.insert(*port) {
                return Err(BbsError::invalid(format!("duplicate container port {port}")));
            }
        }

        validate_routes(&self.routes, &self.ports)
    }
}

fn validate_instances(instances: i32) -> BbsResult<()> {
    if instances < 0 {
        return Err(BbsError::invalid(format!(
            "instances must be >= 0, got {instances}"
        )));
    }
    Ok(())
}

fn validate_routes(routes: &RoutingInfo, ports: &[u32]) -> BbsResult<()> {
    let cf_routes = CfRoutes::from_routing_info(routes)
        .map_err(|e| BbsError::invalid(format!("malformed routes: {e}")))?;

    for route in cf_routes.iter() {
        if !ports.contains(&route.port) {
            return Err(BbsError::invalid(format!(
                "route targets undeclared port {}",
                route.port
            )));
        }
        if route.hostnames.iter().any(|h| h.trim().is_empty()) {
            return Err(BbsError::invalid("route hostnames must not be empty"));
        }
    }
    Ok(())
}

/// Partial mutation of a desired LRP.
///
/// Routes are replaced wholesale: a port absent from the new routing info
/// loses all of its hostnames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredLrpUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<RoutingInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl DesiredLrpUpdate {
    pub fn instances(instances: i32) -> Self {
        Self {
            instances: Some(instances),
            ..Self::default()
        }
    }

    pub fn routes(routes: RoutingInfo) -> Self {
        Self {
            routes: Some(routes),
            ..Self::default()
        }
    }

    /// Checks that need no stored state.
    pub fn validate(&self) -> BbsResult<()> {
        if let Some(instances) = self.instances {
            validate_instances(instances)?;
        }
        Ok(())
    }

    /// Checks against the record being updated.
    pub fn validate_against(&self, current: &DesiredLrp) -> BbsResult<()> {
        self.validate()?;
        if let Some(routes) = &self.routes {
            validate_routes(routes, &current.ports)?;
        }
        Ok(())
    }

    /// Apply to `lrp`. Does not touch the modification tag.
    pub fn apply_to(&self, lrp: &mut DesiredLrp) {
        if let Some(instances) = self.instances {
            lrp.instances = instances;
        }
        if let Some(routes) = &self.routes {
            lrp.routes = routes.clone();
        }
        if let Some(annotation) = &self.annotation {
            lrp.annotation = Some(annotation.clone());
        }
    }
}

// =============================================================================
// Actual LRP
// =============================================================================

/// Identity of one instance slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActualLrpKey {
    pub process_guid: ProcessGuid,
    pub index: i32,
    pub domain: String,
}

impl ActualLrpKey {
    pub fn new(process_guid: ProcessGuid, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid,
            index,
            domain: domain.into(),
        }
    }
}

impl std::fmt::Display for ActualLrpKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.process_guid, self.index)
    }
}

/// Lifecycle state of an actual LRP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActualLrpState {
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

impl ActualLrpState {
    /// Allowed state machine edges.
    ///
    /// ```text
    /// Unclaimed -> Claimed -> Running -> Crashed -> Unclaimed
    ///                 |  \________________^
    ///                 v
    ///             Unclaimed
    /// ```
    pub fn can_transition_to(self, next: ActualLrpState) -> bool {
        use ActualLrpState::*;
        matches!(
            (self, next),
            (Unclaimed, Claimed)
                | (Claimed, Running)
                | (Claimed, Unclaimed)
                | (Claimed, Crashed)
                | (Running, Crashed)
                | (Running, Unclaimed)
                | (Crashed, Unclaimed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclaimed => "UNCLAIMED",
            Self::Claimed => "CLAIMED",
            Self::Running => "RUNNING",
            Self::Crashed => "CRASHED",
        }
    }
}

impl std::fmt::Display for ActualLrpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port mapping for one declared container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_tls_proxy_port: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_tls_proxy_port: Option<u32>,
}

/// Network facts recorded when an instance starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpNetInfo {
    /// Host address reachable from the routing layer.
    pub address: String,

    /// Container-internal address.
    pub instance_address: String,

    /// One entry per declared port, same order as the desired ports.
    pub ports: Vec<PortMapping>,
}

impl ActualLrpNetInfo {
    pub fn port(&self, container_port: u32) -> Option<&PortMapping> {
        self.ports.iter().find(|p| p.container_port == container_port)
    }
}

/// One instance slot of a desired LRP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrp {
    pub key: ActualLrpKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_guid: Option<InstanceGuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,

    pub state: ActualLrpState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_info: Option<ActualLrpNetInfo>,

    #[serde(default)]
    pub crash_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_reason: Option<String>,

    /// When the current state was entered.
    pub since: DateTime<Utc>,

    pub modification_tag: ModificationTag,
}

impl ActualLrp {
    pub fn unclaimed(key: ActualLrpKey) -> Self {
        Self {
            key,
            instance_guid: None,
            cell_id: None,
            state: ActualLrpState::Unclaimed,
            net_info: None,
            crash_count: 0,
            crash_reason: None,
            since: Utc::now(),
            modification_tag: ModificationTag::new(),
        }
    }

    pub fn process_guid(&self) -> &ProcessGuid {
        &self.key.process_guid
    }

    pub fn index(&self) -> i32 {
        self.key.index
    }

    pub fn is_running(&self) -> bool {
        self.state == ActualLrpState::Running
    }
}

/// Filter for actual LRP queries. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualLrpFilter {
    pub process_guid: Option<ProcessGuid>,
    pub index: Option<i32>,
    pub cell_id: Option<CellId>,
}

impl ActualLrpFilter {
    pub fn process_guid(process_guid: ProcessGuid) -> Self {
        Self {
            process_guid: Some(process_guid),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: i32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn matches(&self, lrp: &ActualLrp) -> bool {
        self.process_guid
            .map_or(true, |guid| lrp.key.process_guid == guid)
            && self.index.map_or(true, |index| lrp.key.index == index)
            && self
                .cell_id
                .map_or(true, |cell| lrp.cell_id == Some(cell))
    }
}
