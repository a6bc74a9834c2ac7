//! What a running instance sees in its environment.

use std::collections::BTreeMap;

use anyhow::{ensure, Context};
use vizzini_models::{env_keys, CfPortMapping, DesiredLrp, EnvironmentSnapshot, RouteClient};

use crate::context::ScenarioContext;
use crate::helpers::{desired_lrp_with_guid, endpoint_status, get_envs};

const ENV_JSON: &str = "/env?json=true";

fn env_lrp(ctx: &ScenarioContext, instances: i32) -> DesiredLrp {
    let mut lrp = desired_lrp_with_guid(ctx.guid(), ctx.domain());
    lrp.instances = instances;
    lrp.ports = vec![8080, 5000];
    lrp
}

/// Desire the LRP and wait until its route answers.
async fn desire_and_wait(ctx: &ScenarioContext, instances: i32) -> anyhow::Result<String> {
    ctx.bbs()
        .desire_lrp(env_lrp(ctx, instances))
        .await
        .context("desiring lrp")?;

    let router = ctx.router();
    let host = ctx.route();
    ctx.eventually()
        .should_eq(|| endpoint_status(&*router, &host, ENV_JSON), 200)
        .await
        .context("waiting for the environment endpoint")?;
    Ok(host)
}

pub async fn instance_identity(ctx: ScenarioContext) -> anyhow::Result<()> {
    let host = desire_and_wait(&ctx, 1).await?;
    let actual = ctx
        .bbs()
        .actual_lrp_by_process_guid_and_index(&ctx.guid(), 0)
        .await
        .context("fetching actual lrp 0")?;
    let instance_guid = actual
        .instance_guid
        .context("running instance has no instance guid")?
        .to_string();

    let envs = get_envs(&*ctx.router(), &host).await?;
    ensure!(
        envs.contains(env_keys::INSTANCE_INDEX, "0"),
        "INSTANCE_INDEX: got {:?}",
        envs.get(env_keys::INSTANCE_INDEX)
    );
    ensure!(
        envs.contains(env_keys::INSTANCE_GUID, &instance_guid),
        "INSTANCE_GUID: got {:?}, want {instance_guid}",
        envs.get(env_keys::INSTANCE_GUID)
    );
    Ok(())
}

pub async fn networking(ctx: ScenarioContext) -> anyhow::Result<()> {
    let host = desire_and_wait(&ctx, 1).await?;
    let actual = ctx
        .bbs()
        .actual_lrp_by_process_guid_and_index(&ctx.guid(), 0)
        .await
        .context("fetching actual lrp 0")?;
    let net_info = actual
        .net_info
        .context("running instance has no net info")?;
    let ports = CfPortMapping::payload(&net_info).context("encoding port payload")?;

    let envs = get_envs(&*ctx.router(), &host).await?;
    ensure!(
        envs.contains(env_keys::CF_INSTANCE_IP, &net_info.address),
        "CF_INSTANCE_IP: got {:?}, want {}",
        envs.get(env_keys::CF_INSTANCE_IP),
        net_info.address
    );
    ensure!(
        envs.contains(env_keys::CF_INSTANCE_PORTS, &ports),
        "CF_INSTANCE_PORTS: got {:?}, want {ports}",
        envs.get(env_keys::CF_INSTANCE_PORTS)
    );
    Ok(())
}

pub async fn internal_ip(ctx: ScenarioContext) -> anyhow::Result<()> {
    let host = desire_and_wait(&ctx, 1).await?;
    let envs = get_envs(&*ctx.router(), &host).await?;
    ensure!(
        envs.contains_key(env_keys::CF_INSTANCE_INTERNAL_IP),
        "CF_INSTANCE_INTERNAL_IP missing from {} variables",
        envs.len()
    );
    Ok(())
}

/// Every instance reports its own index and guid.
pub async fn per_instance_identity(ctx: ScenarioContext) -> anyhow::Result<()> {
    const INSTANCES: i32 = 3;
    let host = desire_and_wait(&ctx, INSTANCES).await?;

    let router = ctx.router();
    let seen = ctx
        .eventually()
        .until(
            || collect_snapshots(&*router, &host, INSTANCES as usize),
            |seen| seen.len() == INSTANCES as usize,
        )
        .await
        .context("reaching every instance")?;

    for (index, envs) in &seen {
        let actual = ctx
            .bbs()
            .actual_lrp_by_process_guid_and_index(&ctx.guid(), *index)
            .await
            .with_context(|| format!("fetching actual lrp {index}"))?;
        let instance_guid = actual
            .instance_guid
            .with_context(|| format!("index {index} has no instance guid"))?;
        ensure!(
            envs.contains(env_keys::INSTANCE_GUID, &instance_guid.to_string()),
            "index {index} reports INSTANCE_GUID {:?}, record has {instance_guid}",
            envs.get(env_keys::INSTANCE_GUID)
        );
        ensure!(
            envs.contains(env_keys::CF_INSTANCE_INDEX, &index.to_string()),
            "index {index} reports CF_INSTANCE_INDEX {:?}",
            envs.get(env_keys::CF_INSTANCE_INDEX)
        );
    }
    Ok(())
}

/// Snapshots keyed by reported index, from a burst of requests.
async fn collect_snapshots(
    router: &dyn RouteClient,
    host: &str,
    want: usize,
) -> BTreeMap<i32, EnvironmentSnapshot> {
    let mut seen = BTreeMap::new();
    for _ in 0..want * 10 {
        let Ok(envs) = get_envs(router, host).await else {
            continue;
        };
        if let Some(index) = envs
            .get(env_keys::INSTANCE_INDEX)
            .and_then(|value| value.parse::<i32>().ok())
        {
            seen.insert(index, envs);
        }
        if seen.len() == want {
            break;
        }
    }
    seen
}
