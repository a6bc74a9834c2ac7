//! Routing info carried on a desired LRP.
//!
//! Routing info is an opaque map from router name to JSON. The HTTP router
//! reads the `cf-router` key: an array of `{hostnames, port}` entries, each
//! binding a hostname set to one declared container port.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key under which HTTP routes live in the routing info.
pub const CF_ROUTER: &str = "cf-router";

/// Router name -> router-specific payload.
pub type RoutingInfo = BTreeMap<String, Value>;

/// Hostnames bound to one container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfRoute {
    pub hostnames: Vec<String>,
    pub port: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
}

impl CfRoute {
    pub fn new<I, S>(hostnames: I, port: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hostnames: hostnames.into_iter().map(Into::into).collect(),
            port,
            route_service_url: None,
        }
    }
}

/// The `cf-router` entries of a routing info map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfRoutes(Vec<CfRoute>);

impl CfRoutes {
    /// Decode from routing info. A missing `cf-router` key is no routes.
    pub fn from_routing_info(info: &RoutingInfo) -> Result<Self, serde_json::Error> {
        match info.get(CF_ROUTER) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Vec::<CfRoute>::deserialize(value).map(Self),
        }
    }

    /// Encode as a routing info map holding only the `cf-router` key.
    pub fn routing_info(&self) -> RoutingInfo {
        let entries = self
            .0
            .iter()
            .map(|route| {
                let mut entry = serde_json::Map::new();
                entry.insert(
                    "hostnames".to_string(),
                    Value::Array(route.hostnames.iter().cloned().map(Value::String).collect()),
                );
                entry.insert("port".to_string(), Value::from(route.port));
                if let Some(url) = &route.route_service_url {
                    entry.insert("route_service_url".to_string(), Value::String(url.clone()));
                }
                Value::Object(entry)
            })
            .collect();

        let mut info = RoutingInfo::new();
        info.insert(CF_ROUTER.to_string(), Value::Array(entries));
        info
    }

    pub fn push(&mut self, route: CfRoute) {
        self.0.push(route);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CfRoute> {
        self.0.iter()
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut CfRoute> {
        self.0.get_mut(position)
    }

    /// Every hostname bound to `port`, across all entries.
    pub fn hostnames_for_port(&self, port: u32) -> Vec<&str> {
        self.0
            .iter()
            .filter(|route| route.port == port)
            .flat_map(|route| route.hostnames.iter().map(String::as_str))
            .collect()
    }
}

impl From<Vec<CfRoute>> for CfRoutes {
    fn from(routes: Vec<CfRoute>) -> Self {
        Self(routes)
    }
}

impl IntoIterator for CfRoutes {
    type Item = CfRoute;
    type IntoIter = std::vec::IntoIter<CfRoute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
