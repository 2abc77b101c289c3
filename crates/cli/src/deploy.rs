use alloy::primitives::{Address, Bytes, I256, U256};
use anyhow::Context;
use colored::Colorize;
use perp_deploy::{
    component::{Component, Upgradeable},
    config::NetworkConfig,
    deployer::Deployer,
    script::{self, PoolParams},
};

use crate::Chain;

pub(crate) async fn exchange(deployer: &mut Deployer<Chain>, config: &NetworkConfig) -> anyhow::Result<()> {
    let deployed = script::deploy_exchange(deployer, config).await.context("deploying exchange")?;
    println!("{} on {}", "Exchange deployed".bold().green(), deployer.env().network().blue());
    println!("    SymbolService: {}", deployed.symbol_service);
    println!("    PoolCreator:   {}", deployed.pool_creator);
    println!("    Reader:        {}", deployed.reader);
    println!("    Version:       {}", deployed.version_key);
    println!("Records: {}", deployer.env().store().path().display());
    Ok(())
}

pub(crate) async fn version(deployer: &mut Deployer<Chain>, schema: u64, note: &str) -> anyhow::Result<()> {
    let version = script::deploy_version(deployer, schema, note).await.context("deploying version")?;
    println!("{} {}", "Version".bold().green(), version.key());
    for implementation in version.implementations() {
        println!("    Implementation: {implementation}");
    }
    println!("    Governor:       {}", version.governor_implementation());
    Ok(())
}

pub(crate) async fn pool(
    deployer: &Deployer<Chain>,
    collateral: Address,
    decimals: u8,
    nonce: I256,
    fast_creation: bool,
    liquidity_cap: U256,
) -> anyhow::Result<()> {
    let params = PoolParams {
        is_fast_creation_enabled: fast_creation,
        liquidity_cap,
        ..PoolParams::new(collateral, decimals).with_nonce(nonce)
    };
    let group = script::create_liquidity_pool(deployer, &params).await.context("creating liquidity pool")?;
    println!("{}", "Liquidity pool created".bold().green());
    println!("    Liquidity pool: {}", group.liquidity_pool);
    println!("    Governor:       {}", group.governor);
    Ok(())
}

pub(crate) async fn upgrade_proxy(
    deployer: &mut Deployer<Chain>,
    component: Component,
    implementation: Address,
    data: Bytes,
) -> anyhow::Result<()> {
    let contract = Upgradeable::try_from(component)?;
    deployer
        .upgrade_as_upgradeable(contract, implementation, data)
        .await
        .with_context(|| format!("upgrading {component}"))?;
    println!("{} {component} -> {implementation}", "Upgraded".bold().green());
    Ok(())
}
