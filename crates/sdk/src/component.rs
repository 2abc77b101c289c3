//! Typed registry of the contracts making up an exchange deployment.
//!
//! [`Component`] names a deployment record, [`Plain`] and [`Upgradeable`]
//! describe how to deploy one, carrying the constructor arguments where the
//! contract takes any.

use std::{fmt, str::FromStr};

use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolValue,
};

use crate::error::DeployError;

/// Named component of the exchange, key of deployment records and overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Broker,
    OracleRouterCreator,
    UniswapV3OracleAdaptorCreator,
    UniswapV3Tool,
    InverseStateService,
    Reader,
    SymbolService,
    PoolCreator,
    PoolCreatorModule,
    LiquidityPool,
    LiquidityPoolHop1,
    LpGovernor,
    ProxyAdmin,
    UpgradeableBeacon,
    BeaconProxy,
    McdexMultiOracle,
    McdexSingleOracle,
    TunableOracleRegister,
    /// Externally deployed tokens, only ever present as presets.
    Weth9,
    Busd,
    Usdc,
}

impl Component {
    pub const ALL: [Component; 21] = [
        Component::Broker,
        Component::OracleRouterCreator,
        Component::UniswapV3OracleAdaptorCreator,
        Component::UniswapV3Tool,
        Component::InverseStateService,
        Component::Reader,
        Component::SymbolService,
        Component::PoolCreator,
        Component::PoolCreatorModule,
        Component::LiquidityPool,
        Component::LiquidityPoolHop1,
        Component::LpGovernor,
        Component::ProxyAdmin,
        Component::UpgradeableBeacon,
        Component::BeaconProxy,
        Component::McdexMultiOracle,
        Component::McdexSingleOracle,
        Component::TunableOracleRegister,
        Component::Weth9,
        Component::Busd,
        Component::Usdc,
    ];

    /// Record name, also the artifact `contractName`.
    pub fn name(self) -> &'static str {
        match self {
            Component::Broker => "Broker",
            Component::OracleRouterCreator => "OracleRouterCreator",
            Component::UniswapV3OracleAdaptorCreator => "UniswapV3OracleAdaptorCreator",
            Component::UniswapV3Tool => "UniswapV3Tool",
            Component::InverseStateService => "InverseStateService",
            Component::Reader => "Reader",
            Component::SymbolService => "SymbolService",
            Component::PoolCreator => "PoolCreator",
            Component::PoolCreatorModule => "PoolCreatorModule",
            Component::LiquidityPool => "LiquidityPool",
            Component::LiquidityPoolHop1 => "LiquidityPoolHop1",
            Component::LpGovernor => "LpGovernor",
            Component::ProxyAdmin => "ProxyAdmin",
            Component::UpgradeableBeacon => "UpgradeableBeacon",
            Component::BeaconProxy => "BeaconProxy",
            Component::McdexMultiOracle => "MCDEXMultiOracle",
            Component::McdexSingleOracle => "MCDEXSingleOracle",
            Component::TunableOracleRegister => "TunableOracleRegister",
            Component::Weth9 => "WETH9",
            Component::Busd => "BUSD",
            Component::Usdc => "USDC",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for Component {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DeployError::Config(format!("unknown component {s}")))
    }
}

/// Contract deployed directly, its constructor arguments included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plain {
    Broker,
    OracleRouterCreator,
    UniswapV3OracleAdaptorCreator,
    UniswapV3Tool,
    InverseStateService,
    PoolCreatorModule,
    LiquidityPool,
    LiquidityPoolHop1,
    LpGovernor,
    ProxyAdmin,
    McdexSingleOracle,
    Reader { pool_creator: Address, inverse_state_service: Address },
    UpgradeableBeacon { implementation: Address },
    BeaconProxy { beacon: Address, data: Bytes },
}

impl Plain {
    pub fn component(&self) -> Component {
        match self {
            Plain::Broker => Component::Broker,
            Plain::OracleRouterCreator => Component::OracleRouterCreator,
            Plain::UniswapV3OracleAdaptorCreator => Component::UniswapV3OracleAdaptorCreator,
            Plain::UniswapV3Tool => Component::UniswapV3Tool,
            Plain::InverseStateService => Component::InverseStateService,
            Plain::PoolCreatorModule => Component::PoolCreatorModule,
            Plain::LiquidityPool => Component::LiquidityPool,
            Plain::LiquidityPoolHop1 => Component::LiquidityPoolHop1,
            Plain::LpGovernor => Component::LpGovernor,
            Plain::ProxyAdmin => Component::ProxyAdmin,
            Plain::McdexSingleOracle => Component::McdexSingleOracle,
            Plain::Reader { .. } => Component::Reader,
            Plain::UpgradeableBeacon { .. } => Component::UpgradeableBeacon,
            Plain::BeaconProxy { .. } => Component::BeaconProxy,
        }
    }

    /// ABI-encoded constructor arguments appended to the creation code.
    pub fn constructor_args(&self) -> Bytes {
        match self {
            Plain::Reader { pool_creator, inverse_state_service } => {
                (*pool_creator, *inverse_state_service).abi_encode_params().into()
            },
            Plain::UpgradeableBeacon { implementation } => implementation.abi_encode().into(),
            Plain::BeaconProxy { beacon, data } => (*beacon, data.clone()).abi_encode_params().into(),
            _ => Bytes::new(),
        }
    }

    /// Argument-less contract a creation code may link against.
    pub fn library(name: &str) -> Result<Self, DeployError> {
        match Component::from_str(name)? {
            Component::PoolCreatorModule => Ok(Plain::PoolCreatorModule),
            Component::LiquidityPoolHop1 => Ok(Plain::LiquidityPoolHop1),
            Component::InverseStateService => Ok(Plain::InverseStateService),
            Component::UniswapV3Tool => Ok(Plain::UniswapV3Tool),
            other => Err(DeployError::Artifact(format!("{other} cannot be linked as a library"))),
        }
    }
}

/// Contract deployed behind a transparent proxy and initialized separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upgradeable {
    SymbolService,
    PoolCreator,
    McdexMultiOracle,
    TunableOracleRegister,
}

impl Upgradeable {
    pub fn component(self) -> Component {
        match self {
            Upgradeable::SymbolService => Component::SymbolService,
            Upgradeable::PoolCreator => Component::PoolCreator,
            Upgradeable::McdexMultiOracle => Component::McdexMultiOracle,
            Upgradeable::TunableOracleRegister => Component::TunableOracleRegister,
        }
    }
}

impl TryFrom<Component> for Upgradeable {
    type Error = DeployError;

    fn try_from(component: Component) -> Result<Self, Self::Error> {
        match component {
            Component::SymbolService => Ok(Upgradeable::SymbolService),
            Component::PoolCreator => Ok(Upgradeable::PoolCreator),
            Component::McdexMultiOracle => Ok(Upgradeable::McdexMultiOracle),
            Component::TunableOracleRegister => Ok(Upgradeable::TunableOracleRegister),
            other => Err(DeployError::Config(format!("{other} is not upgradeable"))),
        }
    }
}
