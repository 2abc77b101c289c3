//! Governed upgrades of liquidity pools.
//!
//! A liquidity pool and its governor are a group of proxies that must always
//! run implementations of the same version. Versions are registered with the
//! pool creator under a key derived from their content; upgrading a group
//! goes through a proposal on its governor, executable once the delay
//! window has passed, that switches every proxy of the group in one
//! transaction.

use alloy::primitives::{Address, B256, Bytes, U256, keccak256};
use tracing::{info, warn};

use crate::{
    abi::{ILpGovernor, IPoolCreator},
    chain::{ChainClient, ChainClientExt},
    deployer::Deployer,
    error::{ChainError, DeployError},
};

/// Blocks between a proposal and its earliest execution.
pub const DEFAULT_EXECUTION_DELAY_BLOCKS: u64 = 40;

/// Key of a version: `keccak256(abi.encodePacked(implementations, governor))`,
/// where each array element is padded to 32 bytes and the governor is not.
pub fn version_key(implementations: &[Address], governor_implementation: Address) -> B256 {
    let mut packed = Vec::with_capacity(implementations.len() * 32 + 20);
    for implementation in implementations {
        packed.extend_from_slice(implementation.into_word().as_slice());
    }
    packed.extend_from_slice(governor_implementation.as_slice());
    keccak256(packed)
}

/// Implementation set registered with the pool creator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionEntry {
    /// Liquidity pool implementation first, then its companion modules.
    implementations: Vec<Address>,
    governor_implementation: Address,
    schema_version: u64,
}

impl VersionEntry {
    pub fn new(implementations: Vec<Address>, governor_implementation: Address, schema_version: u64) -> Self {
        Self { implementations, governor_implementation, schema_version }
    }

    pub fn implementations(&self) -> &[Address] { &self.implementations }

    pub fn governor_implementation(&self) -> Address { self.governor_implementation }

    pub fn schema_version(&self) -> u64 { self.schema_version }

    pub fn key(&self) -> B256 { version_key(&self.implementations, self.governor_implementation) }

    pub fn pool_implementation(&self) -> Option<Address> { self.implementations.first().copied() }
}

/// Proxies upgraded together by one proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyGroup {
    pub liquidity_pool: Address,
    pub governor: Address,
}

impl ProxyGroup {
    /// Each proxy of the group paired with the implementation `version`
    /// assigns to it.
    pub fn targets(&self, version: &VersionEntry) -> Result<[(Address, Address); 2], DeployError> {
        let pool = version
            .pool_implementation()
            .ok_or_else(|| DeployError::Config(format!("version {} has no implementations", version.key())))?;
        Ok([(self.liquidity_pool, pool), (self.governor, version.governor_implementation)])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalState {
    /// Inside the delay window.
    Pending,
    Executable,
    Executed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeProposal {
    pub id: u64,
    pub group: ProxyGroup,
    pub proposer: Address,
    pub target_version_key: B256,
    /// Calls made on the new implementations of the pool and the governor,
    /// empty for none.
    pub call_data: [Bytes; 2],
    pub created_at_block: u64,
    pub executable_at_block: u64,
    pub state: ProposalState,
}

/// Result of [`UpgradeOrchestrator::add_version`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRegistration {
    pub key: B256,
    /// `false` when the version was already registered.
    pub added: bool,
}

/// Drives version registration and the proposal lifecycle against a pool
/// creator.
#[derive(Clone, Copy, Debug)]
pub struct UpgradeOrchestrator {
    pool_creator: Address,
    execution_delay: u64,
}

impl UpgradeOrchestrator {
    pub fn new(pool_creator: Address) -> Self {
        Self { pool_creator, execution_delay: DEFAULT_EXECUTION_DELAY_BLOCKS }
    }

    pub fn with_execution_delay(mut self, blocks: u64) -> Self {
        self.execution_delay = blocks;
        self
    }

    pub fn pool_creator(&self) -> Address { self.pool_creator }

    pub fn execution_delay(&self) -> u64 { self.execution_delay }

    /// Registers `version` with the pool creator. Registering a version whose
    /// key is already known sends nothing.
    pub async fn add_version<C: ChainClient>(
        &self,
        client: &C,
        version: &VersionEntry,
        note: &str,
    ) -> Result<VersionRegistration, DeployError> {
        let key = version.key();
        if client.view(self.pool_creator, IPoolCreator::isVersionKeyValidCall { versionKey: key }).await? {
            info!(%key, "version already registered");
            return Ok(VersionRegistration { key, added: false });
        }
        client
            .transact(
                self.pool_creator,
                IPoolCreator::addVersionCall {
                    implementations: version.implementations.clone(),
                    governor: version.governor_implementation,
                    compatibility: U256::from(version.schema_version),
                    note: note.to_owned(),
                },
            )
            .await?;
        info!(%key, implementations = ?version.implementations, governor = %version.governor_implementation, "version registered");
        Ok(VersionRegistration { key, added: true })
    }

    /// Version registered under `key`.
    pub async fn version<C: ChainClient>(&self, client: &C, key: B256) -> Result<VersionEntry, DeployError> {
        if !client.view(self.pool_creator, IPoolCreator::isVersionKeyValidCall { versionKey: key }).await? {
            return Err(DeployError::UnknownVersion(key));
        }
        let version = client.view(self.pool_creator, IPoolCreator::getVersionCall { versionKey: key }).await?;
        Ok(VersionEntry::new(version.implementations, version.governor, version.compatibility.saturating_to()))
    }

    /// Proposes upgrading `group` to the version registered under
    /// `version_key`, calling `call_data` on the new pool and governor
    /// implementations. The proposer is the client's sender.
    pub async fn propose_to_upgrade_and_call<C: ChainClient>(
        &self,
        client: &C,
        group: ProxyGroup,
        version_key: B256,
        call_data: [Bytes; 2],
        description: &str,
    ) -> Result<UpgradeProposal, DeployError> {
        self.version(client, version_key).await?;

        let proposer = client.sender();
        let votes = client.view(group.governor, ILpGovernor::balanceOfCall { account: proposer }).await?;
        let threshold = client.view(group.governor, ILpGovernor::proposalThresholdCall {}).await?;
        if votes < threshold {
            return Err(DeployError::NotAuthorized { governor: group.governor, proposer });
        }

        let [data_for_pool, data_for_governor] = call_data.clone();
        let confirmed = client
            .transact(
                group.governor,
                ILpGovernor::proposeToUpgradeAndCallCall {
                    targetVersionKey: version_key,
                    dataForLiquidityPool: data_for_pool,
                    dataForGovernor: data_for_governor,
                    description: description.to_owned(),
                },
            )
            .await?;
        let id: u64 = match confirmed.events::<ILpGovernor::ProposalCreated>(group.governor)?.as_slice() {
            [created] => created.id.saturating_to(),
            events => {
                return Err(ChainError::Inconsistent(format!(
                    "proposal transaction {} emitted {} ProposalCreated events",
                    confirmed.tx_hash,
                    events.len()
                ))
                .into());
            },
        };
        info!(
            id,
            governor = %group.governor,
            %version_key,
            block = confirmed.block,
            executable_at = confirmed.block + self.execution_delay,
            "upgrade proposed"
        );
        Ok(UpgradeProposal {
            id,
            group,
            proposer,
            target_version_key: version_key,
            call_data,
            created_at_block: confirmed.block,
            executable_at_block: confirmed.block + self.execution_delay,
            state: ProposalState::Pending,
        })
    }

    /// Reads proposal `id` of `group` from its governor.
    pub async fn proposal<C: ChainClient>(
        &self,
        client: &C,
        group: ProxyGroup,
        id: u64,
    ) -> Result<UpgradeProposal, DeployError> {
        let count: u64 = client.view(group.governor, ILpGovernor::proposalCountCall {}).await?.saturating_to();
        if id == 0 || id > count {
            return Err(DeployError::Config(format!("governor {} has no proposal {id}", group.governor)));
        }
        let raw = client.view(group.governor, ILpGovernor::getProposalCall { proposalId: U256::from(id) }).await?;
        let created_at_block: u64 = raw.startBlock.saturating_to();
        let executable_at_block = created_at_block + self.execution_delay;
        let state = if raw.canceled {
            ProposalState::Cancelled
        } else if raw.executed {
            ProposalState::Executed
        } else if client.block_number().await? >= executable_at_block {
            ProposalState::Executable
        } else {
            ProposalState::Pending
        };
        Ok(UpgradeProposal {
            id,
            group,
            proposer: raw.proposer,
            target_version_key: raw.versionKey,
            call_data: [raw.dataForLiquidityPool, raw.dataForGovernor],
            created_at_block,
            executable_at_block,
            state,
        })
    }

    /// Executes proposal `id`, switching every proxy of `group` to the target
    /// version, then checks each proxy reports its new implementation and
    /// records it.
    pub async fn execute<C: ChainClient>(
        &self,
        deployer: &mut Deployer<C>,
        group: ProxyGroup,
        id: u64,
    ) -> Result<UpgradeProposal, DeployError> {
        deployer.env().ensure_writable()?;
        let mut proposal = self.proposal(deployer.client(), group, id).await?;
        match proposal.state {
            ProposalState::Executed | ProposalState::Cancelled => return Err(DeployError::ProposalClosed(id)),
            ProposalState::Pending => {
                return Err(DeployError::TooEarly {
                    proposal_id: id,
                    head: deployer.client().block_number().await?,
                    executable_at: proposal.executable_at_block,
                });
            },
            ProposalState::Executable => (),
        }
        let version = self.version(deployer.client(), proposal.target_version_key).await?;
        let targets = group.targets(&version)?;

        let confirmed =
            deployer.client().transact(group.governor, ILpGovernor::executeCall { proposalId: U256::from(id) }).await?;
        info!(id, governor = %group.governor, block = confirmed.block, "upgrade executed");

        let mut mismatches = Vec::new();
        for (proxy, expected) in targets {
            let actual = deployer.get_implementation(proxy).await?;
            if actual != expected {
                warn!(%proxy, %expected, %actual, "proxy did not switch implementation");
                mismatches.push(format!("{proxy} points at {actual}, expected {expected}"));
            }
        }
        if !mismatches.is_empty() {
            return Err(ChainError::Inconsistent(format!(
                "proposal {id} executed but {}",
                mismatches.join(", ")
            ))
            .into());
        }
        for (proxy, implementation) in targets {
            deployer.record_upgrade(proxy, implementation)?;
        }
        proposal.state = ProposalState::Executed;
        Ok(proposal)
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;

        match self {
            ProposalState::Pending => write!(f, "{}", "pending".yellow()),
            ProposalState::Executable => write!(f, "{}", "executable".green()),
            ProposalState::Executed => write!(f, "{}", "executed".blue()),
            ProposalState::Cancelled => write!(f, "{}", "cancelled".red()),
        }
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for UpgradeProposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = |d: &Bytes| if d.is_empty() { "-".to_string() } else { d.to_string() };
        writeln!(f, "Proposal #{} on governor {}: {}", self.id, self.group.governor, self.state)?;
        writeln!(f, "    Liquidity pool: {}", self.group.liquidity_pool)?;
        writeln!(f, "    Proposer: {} | Target version: {}", self.proposer, self.target_version_key)?;
        writeln!(f, "    Created at block: {} | Executable at block: {}", self.created_at_block, self.executable_at_block)?;
        write!(f, "    Pool call: {} | Governor call: {}", data(&self.call_data[0]), data(&self.call_data[1]))
    }
}
