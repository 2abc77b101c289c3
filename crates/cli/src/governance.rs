use alloy::primitives::{B256, Bytes};
use anyhow::Context;
use perp_deploy::{
    deployer::Deployer,
    upgrade::{ProxyGroup, UpgradeOrchestrator},
};

use crate::{Chain, args::GroupArgs};

fn group(args: &GroupArgs) -> ProxyGroup {
    ProxyGroup { liquidity_pool: args.liquidity_pool, governor: args.governor }
}

pub(crate) async fn propose(
    deployer: &Deployer<Chain>,
    orchestrator: UpgradeOrchestrator,
    args: &GroupArgs,
    version: B256,
    call_data: [Bytes; 2],
    description: &str,
) -> anyhow::Result<()> {
    let proposal = orchestrator
        .propose_to_upgrade_and_call(deployer.client(), group(args), version, call_data, description)
        .await
        .context("proposing upgrade")?;
    println!("{proposal}");
    Ok(())
}

pub(crate) async fn execute(
    deployer: &mut Deployer<Chain>,
    orchestrator: UpgradeOrchestrator,
    args: &GroupArgs,
    id: u64,
) -> anyhow::Result<()> {
    let proposal =
        orchestrator.execute(deployer, group(args), id).await.with_context(|| format!("executing proposal {id}"))?;
    println!("{proposal}");
    Ok(())
}

pub(crate) async fn show(
    deployer: &Deployer<Chain>,
    orchestrator: UpgradeOrchestrator,
    args: &GroupArgs,
    id: u64,
) -> anyhow::Result<()> {
    let proposal = orchestrator
        .proposal(deployer.client(), group(args), id)
        .await
        .with_context(|| format!("reading proposal {id}"))?;
    println!("{proposal}");
    Ok(())
}
