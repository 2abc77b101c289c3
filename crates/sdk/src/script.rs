//! Network deployment script.
//!
//! Every step checks the chain before acting, so running the script again,
//! or after an interruption, only performs what is still missing.

use alloy::{
    primitives::{Address, B256, Bytes, I256, U256},
    sol_types::SolValue,
};
use tracing::info;

use crate::{
    abi::{IPoolCreator, ISymbolService},
    chain::{ChainClient, ChainClientExt},
    component::{Component, Plain, Upgradeable},
    config::NetworkConfig,
    deployer::Deployer,
    error::{ChainError, DeployError},
    upgrade::{ProxyGroup, UpgradeOrchestrator, VersionEntry},
};

/// Addresses of the core contracts after [`deploy_exchange`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeDeployment {
    pub symbol_service: Address,
    pub pool_creator: Address,
    pub reader: Address,
    pub version_key: B256,
}

/// Deploys and wires the exchange contracts of a network:
///
/// 1. standalone contracts (broker, oracle creators, inverse state service)
/// 2. symbol service proxy, initialized with the reserved symbol range
/// 3. pool creator proxy, initialized with the vault and its fee rate
/// 4. pool creator whitelisted on the symbol service, keepers and guardians
///    registered
/// 5. first liquidity pool version registered
/// 6. reader
pub async fn deploy_exchange<C: ChainClient>(
    deployer: &mut Deployer<C>,
    config: &NetworkConfig,
) -> Result<ExchangeDeployment, DeployError> {
    for contract in [
        Plain::Broker,
        Plain::OracleRouterCreator,
        Plain::UniswapV3OracleAdaptorCreator,
        Plain::UniswapV3Tool,
        Plain::InverseStateService,
    ] {
        deployer.deploy_or_skip(contract).await?;
    }

    let symbol_service =
        deployer.deploy_as_upgradeable(Upgradeable::SymbolService, config.upgrade_admin).await?.address();
    if deployer.client().view(symbol_service, ISymbolService::ownerCall {}).await?.is_zero() {
        deployer
            .client()
            .transact(
                symbol_service,
                ISymbolService::initializeCall { reservedSymbolCount: U256::from(config.symbol_base) },
            )
            .await?;
        info!(%symbol_service, symbol_base = config.symbol_base, "symbol service initialized");
    }

    let pool_creator = deployer.deploy_as_upgradeable(Upgradeable::PoolCreator, config.upgrade_admin).await?.address();
    if deployer.client().view(pool_creator, IPoolCreator::ownerCall {}).await?.is_zero() {
        deployer
            .client()
            .transact(
                pool_creator,
                IPoolCreator::initializeCall {
                    symbolService: symbol_service,
                    globalVault: config.vault,
                    globalVaultFeeRate: config.vault_fee_rate,
                },
            )
            .await?;
        info!(%pool_creator, vault = %config.vault, fee_rate = %config.vault_fee_rate, "pool creator initialized");
    }

    let client = deployer.client();
    if !client.view(symbol_service, ISymbolService::isWhitelistedFactoryCall { factory: pool_creator }).await? {
        client.transact(symbol_service, ISymbolService::addWhitelistedFactoryCall { factory: pool_creator }).await?;
        info!(%pool_creator, "factory whitelisted");
    }
    for keeper in &config.keepers {
        if !client.view(pool_creator, IPoolCreator::isKeeperCall { keeper: *keeper }).await? {
            client.transact(pool_creator, IPoolCreator::addKeeperCall { keeper: *keeper }).await?;
            info!(%keeper, "keeper added");
        }
    }
    for guardian in &config.guardians {
        if !client.view(pool_creator, IPoolCreator::isGuardianCall { guardian: *guardian }).await? {
            client.transact(pool_creator, IPoolCreator::addGuardianCall { guardian: *guardian }).await?;
            info!(%guardian, "guardian added");
        }
    }

    let version = deploy_version(deployer, 0, "initial version").await?;

    let inverse_state_service = deployer.address_of(Component::InverseStateService)?;
    let reader = deployer.deploy_or_skip(Plain::Reader { pool_creator, inverse_state_service }).await?.address();

    info!(%symbol_service, %pool_creator, %reader, version = %version.key(), "exchange deployed");
    Ok(ExchangeDeployment { symbol_service, pool_creator, reader, version_key: version.key() })
}

/// Deploys (or reuses) the liquidity pool, its hop module and governor
/// implementations and registers them as a version with the pool creator.
pub async fn deploy_version<C: ChainClient>(
    deployer: &mut Deployer<C>,
    schema_version: u64,
    note: &str,
) -> Result<VersionEntry, DeployError> {
    let pool = deployer.deploy_or_skip(Plain::LiquidityPool).await?.address();
    let hop = deployer.deploy_or_skip(Plain::LiquidityPoolHop1).await?.address();
    let governor = deployer.deploy_or_skip(Plain::LpGovernor).await?.address();
    let version = VersionEntry::new(vec![pool, hop], governor, schema_version);

    let pool_creator = deployer.address_of(Component::PoolCreator)?;
    UpgradeOrchestrator::new(pool_creator).add_version(deployer.client(), &version, note).await?;
    Ok(version)
}

/// Parameters of a new liquidity pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolParams {
    pub collateral: Address,
    pub collateral_decimals: u8,
    /// Distinguishes pools of the same operator and collateral.
    pub nonce: I256,
    /// Let the operator run the pool before it is funded.
    pub is_fast_creation_enabled: bool,
    pub insurance_fund_cap: I256,
    /// Zero for unlimited.
    pub liquidity_cap: U256,
    /// Seconds shares stay locked after adding liquidity.
    pub add_liquidity_delay: U256,
}

impl PoolParams {
    pub fn new(collateral: Address, collateral_decimals: u8) -> Self {
        Self {
            collateral,
            collateral_decimals,
            nonce: I256::ZERO,
            is_fast_creation_enabled: false,
            insurance_fund_cap: I256::ZERO,
            liquidity_cap: U256::ZERO,
            add_liquidity_delay: U256::ZERO,
        }
    }

    pub fn with_nonce(mut self, nonce: I256) -> Self {
        self.nonce = nonce;
        self
    }

    /// `abi.encode(isFastCreationEnabled, insuranceFundCap, liquidityCap, addLiquidityDelay)`
    pub fn init_data(&self) -> Bytes {
        (self.is_fast_creation_enabled, self.insurance_fund_cap, self.liquidity_cap, self.add_liquidity_delay)
            .abi_encode_params()
            .into()
    }
}

/// Creates a liquidity pool and its governor from the latest registered
/// version. The sender becomes the pool operator.
pub async fn create_liquidity_pool<C: ChainClient>(
    deployer: &Deployer<C>,
    params: &PoolParams,
) -> Result<ProxyGroup, DeployError> {
    let pool_creator = deployer.address_of(Component::PoolCreator)?;
    let call = IPoolCreator::createLiquidityPoolCall {
        collateral: params.collateral,
        collateralDecimals: U256::from(params.collateral_decimals),
        nonce: params.nonce,
        initData: params.init_data(),
    };
    let confirmed = deployer.client().transact(pool_creator, call).await?;
    let Some(created) = confirmed.events::<IPoolCreator::CreateLiquidityPool>(pool_creator)?.pop() else {
        return Err(ChainError::Inconsistent(format!(
            "createLiquidityPool transaction {} emitted no CreateLiquidityPool event",
            confirmed.tx_hash
        ))
        .into());
    };
    info!(
        liquidity_pool = %created.liquidityPool,
        governor = %created.governor,
        collateral = %params.collateral,
        block = confirmed.block,
        "liquidity pool created"
    );
    Ok(ProxyGroup { liquidity_pool: created.liquidityPool, governor: created.governor })
}
