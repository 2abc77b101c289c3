use std::path::PathBuf;

use alloy::primitives::{Address, B256, Bytes, I256, U256};
use clap::{Args, Parser, Subcommand};
use perp_deploy::component::Component;

pub(crate) const DEFAULT_RPC_PROVIDER: &str = "http://localhost:8545";

#[derive(Parser, Debug)]
#[command(name = "perp-deploy", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// RPC endpoint to connect to
    #[arg(long, global = true, env = "RPC_URL", default_value_t = DEFAULT_RPC_PROVIDER.to_string())]
    pub rpc: String,

    /// RPC throttling (req/sec) [default: none]
    #[arg(long, global = true)]
    pub rpc_throttle: Option<u32>,

    /// Private key of the account sending transactions, required by
    /// commands that write to the chain
    #[arg(long, global = true, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Network name selecting the deployment record file [default: derived
    /// from the chain id]
    #[arg(long, global = true)]
    pub network: Option<String>,

    /// Directory of deployment record files
    #[arg(long, global = true, default_value = "deployments")]
    pub deployments_dir: PathBuf,

    /// Directory of compilation artifacts
    #[arg(long, global = true, default_value = "artifacts/contracts")]
    pub artifacts: PathBuf,

    /// Network config file (JSON), required by `deploy`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Confirmations to wait for on every transaction
    #[arg(long, global = true, default_value_t = 1)]
    pub confirmations: u64,

    /// Reuse recorded contracts without checking their code is still there
    #[arg(long, global = true, default_value_t = false)]
    pub trust_records: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the exchange contracts missing from the deployment records
    Deploy,
    /// Deploy a new liquidity pool implementation set and register it as a
    /// version
    DeployVersion {
        /// Storage schema version of the implementation set
        #[arg(long)]
        schema: u64,

        /// Note stored along with the version
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Create a liquidity pool from the latest version, operated by the
    /// sender
    CreatePool {
        /// Collateral token
        #[arg(long)]
        collateral: Address,

        /// Collateral token decimals
        #[arg(long, default_value_t = 18)]
        decimals: u8,

        /// Distinguishes pools of the same operator and collateral
        #[arg(long, default_value_t = I256::ZERO, allow_hyphen_values = true)]
        nonce: I256,

        /// Let the operator run the pool before it is funded
        #[arg(long, default_value_t = false)]
        fast_creation: bool,

        /// Liquidity cap (0 = unlimited)
        #[arg(long, default_value_t = U256::ZERO)]
        liquidity_cap: U256,
    },
    /// Upgrade a recorded upgradeable contract through its proxy admin
    UpgradeProxy {
        /// Record name, e.g. `PoolCreator`
        component: Component,

        /// New implementation
        implementation: Address,

        /// Call made on the new implementation through the proxy
        #[arg(long)]
        data: Option<Bytes>,
    },
    /// Propose upgrading a liquidity pool and its governor to a registered
    /// version
    Propose {
        #[command(flatten)]
        group: GroupArgs,

        /// Target version key
        #[arg(long)]
        version: B256,

        /// Call made on the new liquidity pool implementation
        #[arg(long)]
        pool_data: Option<Bytes>,

        /// Call made on the new governor implementation
        #[arg(long)]
        governor_data: Option<Bytes>,

        #[arg(long, default_value = "")]
        description: String,
    },
    /// Execute a proposal once its delay has passed
    Execute {
        #[command(flatten)]
        group: GroupArgs,

        /// Proposal ID
        id: u64,
    },
    /// Show the state of a proposal
    Proposal {
        #[command(flatten)]
        group: GroupArgs,

        /// Proposal ID
        id: u64,
    },
    /// Compare deployment records with the chain and show the deployed
    /// exchange
    Inspect {
        /// AccessControl contract to list role members of
        #[arg(long)]
        contract: Option<Address>,

        /// Role to list members of, e.g. `DEFAULT_ADMIN_ROLE`
        #[arg(long, requires = "contract")]
        role: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct GroupArgs {
    /// Liquidity pool proxy
    #[arg(long)]
    pub liquidity_pool: Address,

    /// Governor proxy of the liquidity pool
    #[arg(long)]
    pub governor: Address,
}

impl Commands {
    /// Whether the command sends transactions or writes records.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Commands::Proposal { .. } | Commands::Inspect { .. })
    }
}
