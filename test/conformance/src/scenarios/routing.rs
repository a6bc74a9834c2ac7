//! Traffic through the routing layer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use tracing::info;
use vizzini_id::ProcessGuid;
use vizzini_models::{CfRoute, DesiredLrpUpdate, RouteClient};
use vizzini_testing::Sampler;

use crate::context::ScenarioContext;
use crate::helpers::{
    actuals_by_process_guid, desired_lrp_with_guid, endpoint_content, endpoint_status,
    index_counter, BANNER, INDEX_SAMPLES, PRIMARY_PORT, SIDE_CHANNEL_BODY, SIDE_CHANNEL_PORT,
};
use crate::matchers::{consist_of, describe, running_range};

/// Probe cadence while measuring availability.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Scale cycles in the churn scenario.
const CHURN_CYCLES: usize = 4;

/// Pause between scaling down and back up.
const CHURN_PAUSE: Duration = Duration::from_millis(200);

/// Allowed fraction of bad responses under churn.
const CHURN_BUDGET: f64 = 0.01;

/// Wait until exactly indices `[0, n)` are running.
async fn wait_running(ctx: &ScenarioContext, n: i32) -> anyhow::Result<()> {
    let want = running_range(n);
    ctx.eventually()
        .until(
            || actuals_by_process_guid(ctx.bbs(), ctx.guid()),
            |actuals| consist_of(actuals, &want),
        )
        .await
        .map_err(|err| {
            let seen = err.last().map(|a| describe(a)).unwrap_or_default();
            anyhow::anyhow!("waiting for {n} running instances, last saw {seen}")
        })?;
    Ok(())
}

/// Status sampler for GET `path` on `host`.
fn sample(router: Arc<dyn RouteClient>, host: String, path: &'static str) -> Sampler {
    Sampler::spawn(SAMPLE_INTERVAL, move || {
        let router = router.clone();
        let host = host.clone();
        async move { endpoint_status(&*router, &host, path).await }
    })
}

/// Affinity pins a client to one instance until it is released.
pub async fn sticky_sessions(ctx: ScenarioContext) -> anyhow::Result<()> {
    let mut lrp = desired_lrp_with_guid(ctx.guid(), ctx.domain());
    lrp.instances = 3;
    ctx.bbs().desire_lrp(lrp).await.context("desiring lrp")?;

    let router = ctx.router();
    let host = ctx.route();
    ctx.eventually()
        .should_eq(|| index_counter(&*router, &host, INDEX_SAMPLES), 3)
        .await
        .context("waiting for all three instances to serve")?;

    let stick = router.get(&host, "/stick").await.context("GET /stick")?;
    ensure!(stick.is_success(), "/stick returned {}", stick.status);

    let pinned = index_counter(&*router, &host, INDEX_SAMPLES).await;
    ensure!(pinned < 3, "stuck session still reached {pinned} instances");

    let unstick = router.get(&host, "/unstick").await.context("GET /unstick")?;
    ensure!(unstick.is_success(), "/unstick returned {}", unstick.status);

    ctx.eventually()
        .until(
            || index_counter(&*router, &host, INDEX_SAMPLES),
            |count| *count >= 2,
        )
        .await
        .context("waiting for traffic to spread after unstick")?;
    Ok(())
}

/// Each declared port is routable under its own hostnames.
pub async fn multiple_ports(ctx: ScenarioContext) -> anyhow::Result<()> {
    let mut lrp = desired_lrp_with_guid(ctx.guid(), ctx.domain());
    lrp.ports = vec![PRIMARY_PORT, SIDE_CHANNEL_PORT];
    let original_routes = lrp.routes.clone();
    let mut routes = lrp.cf_routes().context("decoding routes")?;
    ctx.bbs().desire_lrp(lrp).await.context("desiring lrp")?;

    let router = ctx.router();
    let primary = ctx.route();
    ctx.eventually()
        .should_eq(|| endpoint_status(&*router, &primary, "/env"), 200)
        .await
        .context("waiting for the primary route")?;

    let sampler = sample(router.clone(), primary.clone(), "/env");

    let side = ctx.route_for(&ProcessGuid::new());
    routes.push(CfRoute::new([side.clone()], SIDE_CHANNEL_PORT));
    ctx.bbs()
        .update_desired_lrp(&ctx.guid(), DesiredLrpUpdate::routes(routes.routing_info()))
        .await
        .context("adding side-channel route")?;

    ctx.eventually()
        .should_eq(
            || endpoint_content(&*router, &side, "/"),
            SIDE_CHANNEL_BODY.to_string(),
        )
        .await
        .context("waiting for the side-channel route")?;
    let body = endpoint_content(&*router, &primary, "/env").await;
    ensure!(body.contains(BANNER), "primary route changed: {body:?}");

    let extra = ctx.route_for(&ProcessGuid::new());
    routes
        .get_mut(1)
        .context("side-channel entry missing")?
        .hostnames
        .push(extra.clone());
    ctx.bbs()
        .update_desired_lrp(&ctx.guid(), DesiredLrpUpdate::routes(routes.routing_info()))
        .await
        .context("adding second side-channel hostname")?;

    ctx.eventually()
        .should_eq(
            || endpoint_content(&*router, &extra, "/"),
            SIDE_CHANNEL_BODY.to_string(),
        )
        .await
        .context("waiting for the second side-channel hostname")?;
    let body = endpoint_content(&*router, &side, "/").await;
    ensure!(body == SIDE_CHANNEL_BODY, "first hostname lost: {body:?}");
    let body = endpoint_content(&*router, &primary, "/env").await;
    ensure!(body.contains(BANNER), "primary route changed: {body:?}");

    ctx.bbs()
        .update_desired_lrp(&ctx.guid(), DesiredLrpUpdate::routes(original_routes))
        .await
        .context("reverting routes")?;
    ctx.eventually()
        .until(|| endpoint_status(&*router, &side, "/"), |status| *status != 200)
        .await
        .context("waiting for the side-channel route to go away")?;

    let budget = sampler.stop().await;
    ensure!(
        budget.failures.is_empty(),
        "primary route faltered during route updates: {budget}"
    );
    Ok(())
}

/// Scaling up and down repeatedly drops almost no requests.
pub async fn churn(ctx: ScenarioContext) -> anyhow::Result<()> {
    let mut lrp = desired_lrp_with_guid(ctx.guid(), ctx.domain());
    lrp.instances = 3;
    ctx.bbs().desire_lrp(lrp).await.context("desiring lrp")?;
    wait_running(&ctx, 3).await?;

    let router = ctx.router();
    let primary = ctx.route();
    ctx.eventually()
        .should_eq(|| endpoint_status(&*router, &primary, "/env"), 200)
        .await
        .context("waiting for the primary route")?;

    let sampler = sample(router, primary, "/env");
    for cycle in 0..CHURN_CYCLES {
        info!(cycle, "Scaling down");
        ctx.bbs()
            .update_desired_lrp(&ctx.guid(), DesiredLrpUpdate::instances(1))
            .await
            .context("scaling to 1")?;
        wait_running(&ctx, 1).await?;
        tokio::time::sleep(CHURN_PAUSE).await;

        info!(cycle, "Scaling up");
        ctx.bbs()
            .update_desired_lrp(&ctx.guid(), DesiredLrpUpdate::instances(3))
            .await
            .context("scaling to 3")?;
        wait_running(&ctx, 3).await?;
    }

    let budget = sampler.stop().await;
    info!(
        attempts = budget.attempts,
        bad = budget.failures.len(),
        "{budget}"
    );
    ensure!(
        budget.within(CHURN_BUDGET),
        "too many failed requests under churn: {budget}"
    );
    Ok(())
}
