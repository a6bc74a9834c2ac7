//! The system under test.

use vizzini_bbs::{Bbs, Config, LocalBbsClient};
use vizzini_models::{LrpClient, RouteClient};

/// An orchestrator the suite can drive.
pub trait Deployment: Send + Sync + 'static {
    fn lrp_client(&self) -> &dyn LrpClient;

    /// A route client with a fresh cookie jar.
    fn route_client(&self) -> Box<dyn RouteClient>;

    /// Domain route hostnames are minted under.
    fn domain(&self) -> &str;
}

/// The in-memory reference orchestrator.
pub struct LocalDeployment {
    bbs: Bbs,
    client: LocalBbsClient,
}

impl LocalDeployment {
    /// Must be called inside a tokio runtime.
    pub fn start(config: Config) -> Self {
        let bbs = Bbs::start(config);
        let client = bbs.client();
        Self { bbs, client }
    }

    pub fn bbs(&self) -> &Bbs {
        &self.bbs
    }
}

impl Deployment for LocalDeployment {
    fn lrp_client(&self) -> &dyn LrpClient {
        &self.client
    }

    fn route_client(&self) -> Box<dyn RouteClient> {
        Box::new(self.bbs.route_client())
    }

    fn domain(&self) -> &str {
        self.bbs.domain()
    }
}
