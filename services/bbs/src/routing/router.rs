//! Route table and routing decisions.
//!
//! Maps a request hostname to the (process, container port) that serves it.
//!
//! - Exact hostname match only
//! - Hostnames normalized to lowercase, trailing dot trimmed
//! - A process's routes are replaced as one unit, so a route update never
//!   shows a half-applied hostname set
//!
//! Readers take a snapshot without locking; writers swap in a new one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;
use vizzini_id::ProcessGuid;
use vizzini_models::CfRoutes;

/// What a hostname resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteTarget {
    pub process_guid: ProcessGuid,
    pub port: u32,
}

/// Result of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Matched { hostname: String, target: RouteTarget },
    NoMatch { reason: String },
}

/// Normalize a hostname for matching.
pub fn normalize_hostname(hostname: &str) -> String {
    let host = hostname.trim().trim_end_matches('.');
    // Drop an explicit port.
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.to_lowercase()
}

/// Immutable snapshot of route data for lock-free reads.
#[derive(Debug, Clone, Default)]
struct RouteSnapshot {
    by_host: HashMap<String, RouteTarget>,
    by_process: HashMap<ProcessGuid, Vec<String>>,
}

impl RouteSnapshot {
    fn with_process(&self, process_guid: ProcessGuid, routes: &CfRoutes) -> Self {
        let mut next = self.without_process(&process_guid);

        let mut hostnames = Vec::new();
        for route in routes.iter() {
            for hostname in &route.hostnames {
                let hostname = normalize_hostname(hostname);
                next.by_host.insert(
                    hostname.clone(),
                    RouteTarget {
                        process_guid,
                        port: route.port,
                    },
                );
                hostnames.push(hostname);
            }
        }

        if !hostnames.is_empty() {
            next.by_process.insert(process_guid, hostnames);
        }
        next
    }

    fn without_process(&self, process_guid: &ProcessGuid) -> Self {
        let mut next = self.clone();
        if let Some(hostnames) = next.by_process.remove(process_guid) {
            for hostname in hostnames {
                let owned = next
                    .by_host
                    .get(&hostname)
                    .is_some_and(|target| target.process_guid == *process_guid);
                if owned {
                    next.by_host.remove(&hostname);
                }
            }
        }
        next
    }
}

/// Route table managing all active routes.
pub struct RouteTable {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
        }
    }

    /// Replace every route of `process_guid` in one swap.
    pub fn set_process_routes(&self, process_guid: ProcessGuid, routes: &CfRoutes) {
        self.snapshot
            .rcu(|current| Arc::new(current.with_process(process_guid, routes)));
        debug!(
            process_guid = %process_guid,
            route_count = routes.len(),
            "Process routes replaced"
        );
    }

    pub fn remove_process(&self, process_guid: &ProcessGuid) {
        self.snapshot
            .rcu(|current| Arc::new(current.without_process(process_guid)));
        debug!(process_guid = %process_guid, "Process routes removed");
    }

    /// Rebuild the whole table from scratch.
    pub fn replace_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (ProcessGuid, CfRoutes)>,
    {
        let snapshot = entries
            .into_iter()
            .fold(RouteSnapshot::default(), |acc, (guid, routes)| {
                acc.with_process(guid, &routes)
            });
        let host_count = snapshot.by_host.len();
        self.snapshot.store(Arc::new(snapshot));
        debug!(host_count, "Route table rebuilt");
    }

    pub fn route(&self, hostname: &str) -> RoutingDecision {
        let hostname = normalize_hostname(hostname);
        let snapshot = self.snapshot.load();
        match snapshot.by_host.get(&hostname) {
            Some(target) => RoutingDecision::Matched {
                target: *target,
                hostname,
            },
            None => RoutingDecision::NoMatch {
                reason: format!("Requested route ('{hostname}') does not exist."),
            },
        }
    }

    /// Hostnames currently bound for `process_guid`.
    pub fn hostnames(&self, process_guid: &ProcessGuid) -> Vec<String> {
        self.snapshot
            .load()
            .by_process
            .get(process_guid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
