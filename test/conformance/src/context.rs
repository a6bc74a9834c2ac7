//! Per-scenario state.

use std::sync::Arc;
use std::time::Duration;

use vizzini_id::ProcessGuid;
use vizzini_models::{LrpClient, RouteClient};
use vizzini_reconcile::DEFAULT_CONVERGENCE_WINDOW;
use vizzini_testing::{Consistently, Eventually};

use crate::deployment::Deployment;
use crate::helpers::route_for_guid;

/// Polling bounds for a run.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// How long a desired change may take to become observable.
    pub convergence: Duration,
    /// Delay between observations.
    pub poll: Duration,
    /// Window for "must keep holding" checks.
    pub consistently: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            convergence: DEFAULT_CONVERGENCE_WINDOW,
            poll: Duration::from_millis(20),
            consistently: Duration::from_millis(500),
        }
    }
}

/// Everything a scenario needs, passed explicitly.
///
/// Each context carries its own process guid, so scenarios never share
/// desired state.
#[derive(Clone)]
pub struct ScenarioContext {
    deployment: Arc<dyn Deployment>,
    guid: ProcessGuid,
    timeouts: Timeouts,
}

impl ScenarioContext {
    pub fn new(deployment: Arc<dyn Deployment>, timeouts: Timeouts) -> Self {
        Self {
            deployment,
            guid: ProcessGuid::new(),
            timeouts,
        }
    }

    pub fn guid(&self) -> ProcessGuid {
        self.guid
    }

    pub fn bbs(&self) -> &dyn LrpClient {
        self.deployment.lrp_client()
    }

    /// A route client with its own cookie jar.
    pub fn router(&self) -> Arc<dyn RouteClient> {
        Arc::from(self.deployment.route_client())
    }

    pub fn domain(&self) -> &str {
        self.deployment.domain()
    }

    /// Hostname routed to this scenario's process.
    pub fn route(&self) -> String {
        route_for_guid(self.domain(), &self.guid)
    }

    pub fn route_for(&self, guid: &ProcessGuid) -> String {
        route_for_guid(self.domain(), guid)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn eventually(&self) -> Eventually {
        Eventually::new(self.timeouts.convergence, self.timeouts.poll)
    }

    pub fn consistently(&self) -> Consistently {
        Consistently::new(self.timeouts.consistently, self.timeouts.poll)
    }
}
