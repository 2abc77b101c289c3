pub mod args;
mod deploy;
mod governance;
mod inspect;

use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::client::RpcClient,
    signers::local::PrivateKeySigner,
    transports::layers::{RetryBackoffLayer, ThrottleLayer},
};
use anyhow::Context;
use args::{Cli, Commands};
use perp_deploy::{
    artifact::ArtifactStore,
    chain::RpcChain,
    component::Component,
    config::NetworkConfig,
    deployer::{CodeCheck, Deployer},
    env::{self, Environment, Mode, Overrides},
    upgrade::{DEFAULT_EXECUTION_DELAY_BLOCKS, UpgradeOrchestrator},
};

type Chain = RpcChain<DynProvider>;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = if let Some(throttle) = cli.rpc_throttle {
        RpcClient::builder()
            .layer(ThrottleLayer::new(throttle))
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .connect(&cli.rpc)
            .await
            .context("connecting to RPC")?
    } else {
        RpcClient::builder()
            .layer(RetryBackoffLayer::new(10, 100, 200))
            .connect(&cli.rpc)
            .await
            .context("connecting to RPC")?
    };
    client.set_poll_interval(Duration::from_millis(500));

    let signer = cli
        .private_key
        .as_deref()
        .map(str::parse::<PrivateKeySigner>)
        .transpose()
        .context("parsing private key")?;
    if signer.is_none() && cli.command.is_mutating() {
        anyhow::bail!("this command sends transactions, provide `--private-key` or PRIVATE_KEY");
    }
    let sender = signer.as_ref().map_or(Address::ZERO, |s| s.address());
    let provider = match signer {
        Some(signer) => ProviderBuilder::new().wallet(EthereumWallet::from(signer)).connect_client(client).erased(),
        None => ProviderBuilder::new().connect_client(client).erased(),
    };

    let network = match &cli.network {
        Some(network) => network.clone(),
        None => env::network_name(provider.get_chain_id().await.context("fetching chain id")?),
    };
    let config = cli
        .config
        .as_ref()
        .map(NetworkConfig::load)
        .transpose()
        .context("loading network config")?;
    let mode = if cli.command.is_mutating() { Mode::Restorable } else { Mode::ReadOnly };
    let overrides = config.as_ref().map(|c| c.overrides.clone()).unwrap_or_else(Overrides::new);
    let environment = Environment::resolve(&network, &cli.deployments_dir, overrides, mode)
        .with_context(|| format!("loading deployment records of {network}"))?;

    let artifacts = match &cli.command {
        Commands::Deploy | Commands::DeployVersion { .. } => {
            ArtifactStore::load(&cli.artifacts).context("loading artifacts")?
        },
        _ => ArtifactStore::default(),
    };
    let chain = RpcChain::new(provider, sender).with_confirmations(cli.confirmations);
    let code_check = if cli.trust_records { CodeCheck::TrustRecord } else { CodeCheck::Verify };
    let mut deployer = Deployer::new(environment, artifacts, chain).with_code_check(code_check);

    match &cli.command {
        Commands::Deploy => {
            let config = config.context("`deploy` needs `--config`")?;
            deploy::exchange(&mut deployer, &config).await?
        },
        Commands::DeployVersion { schema, note } => deploy::version(&mut deployer, *schema, note).await?,
        Commands::CreatePool { collateral, decimals, nonce, fast_creation, liquidity_cap } => {
            deploy::pool(&deployer, *collateral, *decimals, *nonce, *fast_creation, *liquidity_cap).await?
        },
        Commands::UpgradeProxy { component, implementation, data } => {
            deploy::upgrade_proxy(&mut deployer, *component, *implementation, data.clone().unwrap_or_default())
                .await?
        },
        Commands::Propose { group, version, pool_data, governor_data, description } => {
            governance::propose(
                &deployer,
                orchestrator(&deployer, config.as_ref())?,
                group,
                *version,
                [pool_data.clone().unwrap_or_default(), governor_data.clone().unwrap_or_default()],
                description,
            )
            .await?
        },
        Commands::Execute { group, id } => {
            let orchestrator = orchestrator(&deployer, config.as_ref())?;
            governance::execute(&mut deployer, orchestrator, group, *id).await?
        },
        Commands::Proposal { group, id } => {
            governance::show(&deployer, orchestrator(&deployer, config.as_ref())?, group, *id).await?
        },
        Commands::Inspect { contract, role } => inspect::render(&deployer, *contract, role).await?,
    }

    Ok(())
}

fn orchestrator(deployer: &Deployer<Chain>, config: Option<&NetworkConfig>) -> anyhow::Result<UpgradeOrchestrator> {
    let pool_creator = deployer
        .address_of(Component::PoolCreator)
        .context("looking up the pool creator")?;
    let delay = config.map_or(DEFAULT_EXECUTION_DELAY_BLOCKS, |c| c.execution_delay_blocks);
    Ok(UpgradeOrchestrator::new(pool_creator).with_execution_delay(delay))
}
