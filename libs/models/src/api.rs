//! Client seams driven by the acceptance suite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vizzini_id::ProcessGuid;

use crate::error::{BbsError, BbsResult};
use crate::lrp::{ActualLrp, ActualLrpFilter, DesiredLrp, DesiredLrpUpdate};

/// Desired-state mutations and actual-state queries.
///
/// Mutations report `InvalidArgument`/`NotFound` synchronously; they
/// return before convergence.
#[async_trait]
pub trait LrpClient: Send + Sync {
    async fn desire_lrp(&self, lrp: DesiredLrp) -> BbsResult<()>;

    async fn update_desired_lrp(
        &self,
        process_guid: &ProcessGuid,
        update: DesiredLrpUpdate,
    ) -> BbsResult<()>;

    async fn remove_desired_lrp(&self, process_guid: &ProcessGuid) -> BbsResult<()>;

    async fn desired_lrp_by_process_guid(&self, process_guid: &ProcessGuid)
        -> BbsResult<DesiredLrp>;

    /// Actual LRPs matching `filter`, ordered by (process guid, index).
    async fn actual_lrps(&self, filter: ActualLrpFilter) -> BbsResult<Vec<ActualLrp>>;

    async fn actual_lrp_by_process_guid_and_index(
        &self,
        process_guid: &ProcessGuid,
        index: i32,
    ) -> BbsResult<ActualLrp> {
        let filter = ActualLrpFilter::process_guid(*process_guid).with_index(index);
        self.actual_lrps(filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BbsError::NotFound {
                resource: "actual lrp",
                key: format!("{process_guid}/{index}"),
            })
    }
}

/// Response observed through the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub status: u16,
    pub body: String,
}

impl RouteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain HTTP GET through the routing layer, by hostname.
///
/// Each client owns its cookie jar, so affinity established by one client
/// never leaks into another. Transport failures are `Transient`.
#[async_trait]
pub trait RouteClient: Send + Sync {
    /// GET `path` (which may carry a query string) on `host`.
    async fn get(&self, host: &str, path: &str) -> BbsResult<RouteResponse>;
}
