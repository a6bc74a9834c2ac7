//! Environment exposed to a running instance.

use serde::{Deserialize, Serialize};

use crate::lrp::{ActualLrpNetInfo, PortMapping};

/// Well-known environment keys.
pub mod env_keys {
    pub const INSTANCE_INDEX: &str = "INSTANCE_INDEX";
    pub const INSTANCE_GUID: &str = "INSTANCE_GUID";
    pub const CF_INSTANCE_INDEX: &str = "CF_INSTANCE_INDEX";
    pub const CF_INSTANCE_GUID: &str = "CF_INSTANCE_GUID";
    pub const CF_INSTANCE_IP: &str = "CF_INSTANCE_IP";
    pub const CF_INSTANCE_INTERNAL_IP: &str = "CF_INSTANCE_INTERNAL_IP";
    pub const CF_INSTANCE_PORT: &str = "CF_INSTANCE_PORT";
    pub const CF_INSTANCE_ADDR: &str = "CF_INSTANCE_ADDR";
    pub const CF_INSTANCE_PORTS: &str = "CF_INSTANCE_PORTS";
    pub const PORT: &str = "PORT";
}

/// One entry of the `CF_INSTANCE_PORTS` payload.
///
/// Field order is part of the wire format: the payload is compared as a
/// string, so serialisation must emit `external`, `internal`,
/// `external_tls_proxy`, `internal_tls_proxy` in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfPortMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<u32>,

    pub internal: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_tls_proxy: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_tls_proxy: Option<u32>,
}

impl From<&PortMapping> for CfPortMapping {
    fn from(mapping: &PortMapping) -> Self {
        Self {
            external: mapping.host_port,
            internal: mapping.container_port,
            external_tls_proxy: mapping.host_tls_proxy_port,
            internal_tls_proxy: mapping.container_tls_proxy_port,
        }
    }
}

impl CfPortMapping {
    /// The `CF_INSTANCE_PORTS` value for an instance's net info.
    pub fn payload(net_info: &ActualLrpNetInfo) -> Result<String, serde_json::Error> {
        let mappings: Vec<CfPortMapping> = net_info.ports.iter().map(Self::from).collect();
        serde_json::to_string(&mappings)
    }
}

/// Ordered environment of one container, fixed at start.
///
/// Serialises as `[["KEY", "value"], ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentSnapshot(Vec<(String, String)>);

impl EnvironmentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns true if the exact pair is present.
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|(k, v)| k == key && v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvironmentSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
