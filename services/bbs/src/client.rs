//! Client seams over the in-memory orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use vizzini_id::ProcessGuid;
use vizzini_models::{
    ActualLrp, ActualLrpFilter, BbsError, BbsResult, DesiredLrp, DesiredLrpUpdate, LrpClient,
    RouteClient, RouteResponse,
};

use crate::actual::ActualStore;
use crate::desired::DesiredStore;
use crate::routing::{normalize_hostname, FabricRequest, RoutingFabric};
use crate::workload::{SetCookie, WorkloadRequest};

/// [`LrpClient`] backed directly by the stores.
#[derive(Clone)]
pub struct LocalBbsClient {
    desired: Arc<DesiredStore>,
    actual: Arc<ActualStore>,
}

impl LocalBbsClient {
    pub fn new(desired: Arc<DesiredStore>, actual: Arc<ActualStore>) -> Self {
        Self { desired, actual }
    }
}

#[async_trait]
impl LrpClient for LocalBbsClient {
    async fn desire_lrp(&self, lrp: DesiredLrp) -> BbsResult<()> {
        self.desired.desire(lrp).await.map(|_| ())
    }

    async fn update_desired_lrp(
        &self,
        process_guid: &ProcessGuid,
        update: DesiredLrpUpdate,
    ) -> BbsResult<()> {
        self.desired.update(process_guid, update).await.map(|_| ())
    }

    async fn remove_desired_lrp(&self, process_guid: &ProcessGuid) -> BbsResult<()> {
        self.desired.remove(process_guid).await.map(|_| ())
    }

    async fn desired_lrp_by_process_guid(
        &self,
        process_guid: &ProcessGuid,
    ) -> BbsResult<DesiredLrp> {
        self.desired.get(process_guid).await
    }

    async fn actual_lrps(&self, filter: ActualLrpFilter) -> BbsResult<Vec<ActualLrp>> {
        Ok(self.actual.list(&filter).await)
    }
}

/// [`RouteClient`] dispatching through the in-process fabric.
///
/// Keeps cookies in a reqwest [`Jar`] under `http://{host}/`, the same store
/// an HTTP client against a real router uses.
pub struct FabricClient {
    fabric: Arc<RoutingFabric>,
    jar: Jar,
}

fn host_url(host: &str) -> BbsResult<Url> {
    Url::parse(&format!("http://{}/", normalize_hostname(host)))
        .map_err(|e| BbsError::invalid(format!("invalid host {host:?}: {e}")))
}

fn cookie_str(cookie: &SetCookie) -> String {
    if cookie.expired {
        format!("{}=; Path=/; Max-Age=0", cookie.name)
    } else {
        format!("{}={}; Path=/", cookie.name, cookie.value)
    }
}

impl FabricClient {
    pub fn new(fabric: Arc<RoutingFabric>) -> Self {
        Self {
            fabric,
            jar: Jar::default(),
        }
    }

    /// Cookies currently held for `host`.
    pub fn cookies(&self, host: &str) -> BTreeMap<String, String> {
        host_url(host)
            .map(|url| self.cookies_for(&url))
            .unwrap_or_default()
    }

    fn cookies_for(&self, url: &Url) -> BTreeMap<String, String> {
        let Some(header) = self.jar.cookies(url) else {
            return BTreeMap::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

#[async_trait]
impl RouteClient for FabricClient {
    async fn get(&self, host: &str, path: &str) -> BbsResult<RouteResponse> {
        let url = host_url(host)?;
        let mut request = WorkloadRequest::get(path);
        request.cookies = self.cookies_for(&url).into_iter().collect();

        let response = self
            .fabric
            .handle(FabricRequest {
                host: normalize_hostname(host),
                request,
            })
            .await;

        for cookie in &response.set_cookies {
            self.jar.add_cookie_str(&cookie_str(cookie), &url);
        }

        Ok(RouteResponse {
            status: response.status,
            body: response.body,
        })
    }
}
