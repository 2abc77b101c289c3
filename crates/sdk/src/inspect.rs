//! Read-only inspection of a deployment: record-vs-chain reconciliation,
//! proxy slots, role membership and event-derived state.
//!
//! Differences between records and the chain are reported as [`Drift`],
//! never repaired and never fatal; only failed chain reads are errors.

use alloy::{
    primitives::{Address, B256, I256, U256, keccak256},
    sol_types::SolEvent,
};
use tracing::{debug, warn};

use crate::{
    abi::{IAccessControl, IPoolCreator, ISymbolService},
    batch::{DEFAULT_BATCH_SIZE, try_join_bounded},
    chain::{ADMIN_SLOT, BEACON_SLOT, ChainClient, ChainClientExt, IMPLEMENTATION_SLOT, LogQuery},
    component::Component,
    deployer::Deployer,
    error::{ChainError, DeployError},
    record::{DeploymentRecord, RecordKind},
};

/// Widest block range of a single log query.
pub const FILTER_LOG_STEP: u64 = 5000;

const LIST_PAGE: u64 = 100;

/// AccessControl role id of `name`; the default admin role is the zero hash.
pub fn role_id(name: &str) -> B256 {
    match name {
        "DEFAULT_ADMIN_ROLE" => B256::ZERO,
        _ => keccak256(name),
    }
}

/// Inclusive `[from, to]` windows of at most `step` blocks covering the range.
pub fn block_windows(from: u64, to: u64, step: u64) -> impl Iterator<Item = (u64, u64)> {
    let step = step.max(1);
    let mut next = (from <= to).then_some(from);
    std::iter::from_fn(move || {
        let start = next?;
        let end = start.saturating_add(step - 1).min(to);
        next = end.checked_add(1).filter(|n| *n <= to);
        Some((start, end))
    })
}

/// Decoded `E` events emitted by `address` within `[from_block, to_block]`,
/// queried window by window, each with its `(block, log index)` position.
pub async fn scan_events<E: SolEvent, C: ChainClient>(
    client: &C,
    address: Address,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<((u64, u64), E)>, DeployError> {
    let mut events = Vec::new();
    for (from, to) in block_windows(from_block, to_block, FILTER_LOG_STEP) {
        let query = LogQuery { address, topic0: E::SIGNATURE_HASH, from_block: from, to_block: to };
        let logs = client.logs(&query).await?;
        debug!(event = E::SIGNATURE, from, to, count = logs.len(), "logs scanned");
        for log in logs {
            events.push((log.position(), log.decode::<E>()?));
        }
    }
    Ok(events)
}

/// Members of `role` on an AccessControl contract, read in bounded batches.
pub async fn role_members<C: ChainClient>(client: &C, contract: Address, role: B256) -> Result<Vec<Address>, DeployError> {
    let count: u64 = client.view(contract, IAccessControl::getRoleMemberCountCall { role }).await?.saturating_to();
    let members = try_join_bounded(0..count, DEFAULT_BATCH_SIZE, |index| {
        client.view(contract, IAccessControl::getRoleMemberCall { role, index: U256::from(index) })
    })
    .await?;
    Ok(members)
}

/// EIP-1967 slots of a proxy, zero where unset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyFacts {
    pub implementation: Address,
    pub admin: Address,
    pub beacon: Address,
}

pub async fn proxy_facts<C: ChainClient>(client: &C, proxy: Address) -> Result<ProxyFacts, DeployError> {
    let (implementation, admin, beacon) = futures::try_join!(
        client.slot_address(proxy, IMPLEMENTATION_SLOT),
        client.slot_address(proxy, ADMIN_SLOT),
        client.slot_address(proxy, BEACON_SLOT),
    )?;
    Ok(ProxyFacts { implementation, admin, beacon })
}

/// Disagreement between a record and the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drift {
    /// Recorded address has no code.
    MissingCode,
    Implementation { recorded: Address, actual: Address },
    Admin { recorded: Address, actual: Address },
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Drift::MissingCode => write!(f, "no code at recorded address"),
            Drift::Implementation { recorded, actual } => {
                write!(f, "implementation is {actual}, recorded {recorded}")
            },
            Drift::Admin { recorded, actual } => write!(f, "admin is {actual}, recorded {recorded}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordCheck {
    pub record: DeploymentRecord,
    pub drift: Vec<Drift>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InspectionReport {
    pub network: String,
    pub head: u64,
    pub checks: Vec<RecordCheck>,
}

impl InspectionReport {
    pub fn drifted(&self) -> impl Iterator<Item = &RecordCheck> { self.checks.iter().filter(|c| !c.drift.is_empty()) }

    pub fn is_consistent(&self) -> bool { self.drifted().next().is_none() }
}

/// Compares every record of the deployer's environment with the chain.
pub async fn reconcile<C: ChainClient>(deployer: &Deployer<C>) -> Result<InspectionReport, DeployError> {
    let client = deployer.client();
    let head = client.block_number().await?;
    let records: Vec<_> = deployer.env().store().records().cloned().collect();
    let checks = try_join_bounded(records, DEFAULT_BATCH_SIZE, |record| check_record(client, record)).await?;
    for check in &checks {
        for drift in &check.drift {
            warn!(name = check.record.name.as_str(), address = %check.record.address, %drift, "record drift");
        }
    }
    Ok(InspectionReport { network: deployer.env().network().to_owned(), head, checks })
}

async fn check_record<C: ChainClient>(client: &C, record: DeploymentRecord) -> Result<RecordCheck, ChainError> {
    let mut drift = Vec::new();
    if client.code_at(record.address).await?.is_empty() {
        drift.push(Drift::MissingCode);
    }
    if let (RecordKind::Upgradeable, Some(deps)) = (record.kind, record.dependencies) {
        let implementation = client.slot_address(record.address, IMPLEMENTATION_SLOT).await?;
        if implementation != deps.implementation {
            drift.push(Drift::Implementation { recorded: deps.implementation, actual: implementation });
        }
        let admin = client.slot_address(record.address, ADMIN_SLOT).await?;
        if admin != deps.admin {
            drift.push(Drift::Admin { recorded: deps.admin, actual: admin });
        }
    }
    Ok(RecordCheck { record, drift })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolCreatorFacts {
    pub address: Address,
    pub proxy: ProxyFacts,
    pub owner: Address,
    /// Proxy admin of every liquidity pool and governor the creator deploys.
    pub upgrade_admin: Address,
    pub vault: Address,
    pub vault_fee_rate: I256,
    pub latest_version: B256,
    pub liquidity_pools: Vec<Address>,
    pub keepers: Vec<Address>,
    /// Current guardians, replayed from guardian events. `None` when the
    /// pool creator has no recorded deployment block to scan from.
    pub guardians: Option<Vec<Address>>,
}

pub async fn inspect_pool_creator<C: ChainClient>(deployer: &Deployer<C>) -> Result<PoolCreatorFacts, DeployError> {
    let client = deployer.client();
    let address = deployer.address_of(Component::PoolCreator)?;
    let proxy = proxy_facts(client, address).await?;
    let owner = client.view(address, IPoolCreator::ownerCall {}).await?;
    let upgrade_admin = client.view(address, IPoolCreator::upgradeAdminCall {}).await?;
    let vault = client.view(address, IPoolCreator::getVaultCall {}).await?;
    let vault_fee_rate = client.view(address, IPoolCreator::getVaultFeeRateCall {}).await?;
    let latest_version = client.view(address, IPoolCreator::getLatestVersionCall {}).await?;

    let pool_count: u64 = client.view(address, IPoolCreator::getLiquidityPoolCountCall {}).await?.saturating_to();
    let mut liquidity_pools = Vec::new();
    for begin in (0..pool_count).step_by(LIST_PAGE as usize) {
        let end = (begin + LIST_PAGE).min(pool_count);
        let page = IPoolCreator::listLiquidityPoolsCall { begin: U256::from(begin), end: U256::from(end) };
        liquidity_pools.extend(client.view(address, page).await?);
    }

    let mut keepers = Vec::new();
    loop {
        let begin = keepers.len() as u64;
        let page = IPoolCreator::listKeepersCall { begin: U256::from(begin), end: U256::from(begin + LIST_PAGE) };
        let page = client.view(address, page).await?;
        let full = page.len() as u64 == LIST_PAGE;
        keepers.extend(page);
        if !full {
            break;
        }
    }

    let head = client.block_number().await?;
    let guardians = match scan_start(deployer, Component::PoolCreator) {
        Some(from_block) => Some(guardians(client, address, from_block, head).await?),
        None => None,
    };

    Ok(PoolCreatorFacts {
        address,
        proxy,
        owner,
        upgrade_admin,
        vault,
        vault_fee_rate,
        latest_version,
        liquidity_pools,
        keepers,
        guardians,
    })
}

/// Guardian set of a pool creator after replaying its guardian events.
pub async fn guardians<C: ChainClient>(
    client: &C,
    pool_creator: Address,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<Address>, DeployError> {
    let mut changes: Vec<Change> = Vec::new();
    changes.extend(
        scan_events::<IPoolCreator::AddGuardian, _>(client, pool_creator, from_block, to_block)
            .await?
            .into_iter()
            .map(|(position, e)| (position, None, Some(e.guardian))),
    );
    changes.extend(
        scan_events::<IPoolCreator::TransferGuardian, _>(client, pool_creator, from_block, to_block)
            .await?
            .into_iter()
            .map(|(position, e)| (position, Some(e.oldGuardian), Some(e.newGuardian))),
    );
    changes.extend(
        scan_events::<IPoolCreator::RenounceGuardian, _>(client, pool_creator, from_block, to_block)
            .await?
            .into_iter()
            .map(|(position, e)| (position, Some(e.oldGuardian), None)),
    );
    Ok(replay(changes))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolServiceFacts {
    pub address: Address,
    pub proxy: ProxyFacts,
    pub owner: Address,
    /// Factories currently whitelisted, replayed from whitelist events.
    /// `None` when the symbol service has no recorded deployment block.
    pub whitelisted_factories: Option<Vec<Address>>,
}

pub async fn inspect_symbol_service<C: ChainClient>(deployer: &Deployer<C>) -> Result<SymbolServiceFacts, DeployError> {
    let client = deployer.client();
    let address = deployer.address_of(Component::SymbolService)?;
    let proxy = proxy_facts(client, address).await?;
    let owner = client.view(address, ISymbolService::ownerCall {}).await?;

    let head = client.block_number().await?;
    let whitelisted_factories = match scan_start(deployer, Component::SymbolService) {
        Some(from_block) => Some(whitelisted_factories(client, address, from_block, head).await?),
        None => None,
    };
    Ok(SymbolServiceFacts { address, proxy, owner, whitelisted_factories })
}

async fn whitelisted_factories<C: ChainClient>(
    client: &C,
    symbol_service: Address,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<Address>, DeployError> {
    let mut changes: Vec<Change> = Vec::new();
    changes.extend(
        scan_events::<ISymbolService::AddWhitelistedFactory, _>(client, symbol_service, from_block, to_block)
            .await?
            .into_iter()
            .map(|(position, e)| (position, None, Some(e.factory))),
    );
    changes.extend(
        scan_events::<ISymbolService::RemoveWhitelistedFactory, _>(client, symbol_service, from_block, to_block)
            .await?
            .into_iter()
            .map(|(position, e)| (position, Some(e.factory), None)),
    );
    Ok(replay(changes))
}

/// Block the event scan of `component` starts at: the block its record was
/// deployed at.
fn scan_start<C: ChainClient>(deployer: &Deployer<C>, component: Component) -> Option<u64> {
    let start = deployer.env().store().find(component.name()).and_then(|record| record.deployed_at);
    if start.is_none() {
        warn!(%component, "no deployment block recorded, skipping event scan");
    }
    start
}

/// `((block, log index), removed, added)`
type Change = ((u64, u64), Option<Address>, Option<Address>);

/// Members left after applying `changes` in emission order.
fn replay(mut changes: Vec<Change>) -> Vec<Address> {
    changes.sort_by_key(|(position, ..)| *position);
    let mut members: Vec<Address> = Vec::new();
    for (_, removed, added) in changes {
        if let Some(removed) = removed {
            members.retain(|m| *m != removed);
        }
        if let Some(added) = added
            && !members.contains(&added)
        {
            members.push(added);
        }
    }
    members
}

#[cfg(feature = "display")]
impl tabled::Tabled for RecordCheck {
    const LENGTH: usize = 5;

    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        use colored::Colorize;

        let or_dash = |a: Option<Address>| a.map_or_else(|| "-".to_string(), |a| a.to_string());
        vec![
            self.record.name.as_str().into(),
            format!("{:?}", self.record.kind).to_lowercase().into(),
            self.record.address.to_string().into(),
            or_dash(self.record.implementation()).into(),
            if self.drift.is_empty() {
                "ok".green().to_string().into()
            } else {
                self.drift.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ").red().to_string().into()
            },
        ]
    }

    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["Name".into(), "Type".into(), "Address".into(), "Implementation".into(), "Status".into()]
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;
        use tabled::{Table, settings::Style};

        writeln!(f, "{} at block {}", self.network.blue(), self.head)?;
        let mut table = Table::new(&self.checks);
        table.with(Style::sharp());
        writeln!(f, "{table}")?;
        let drifted = self.drifted().count();
        if drifted > 0 {
            write!(f, "{}", format!("{drifted} record(s) drifted").yellow())
        } else {
            write!(f, "{}", "all records match the chain".green())
        }
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for PoolCreatorFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;

        let list = |items: &[Address]| items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        let scanned = |items: &Option<Vec<Address>>| items.as_deref().map_or_else(|| "unknown".dimmed().to_string(), list);
        writeln!(f, "{} {}", "PoolCreator".blue(), self.address)?;
        writeln!(f, "    Implementation: {} | Proxy admin: {}", self.proxy.implementation, self.proxy.admin)?;
        writeln!(f, "    Owner: {} | Upgrade admin: {}", self.owner, self.upgrade_admin)?;
        writeln!(f, "    Vault: {} | Vault fee rate: {}", self.vault, self.vault_fee_rate)?;
        writeln!(f, "    Latest version: {}", self.latest_version)?;
        writeln!(f, "    Liquidity pools ({}): {}", self.liquidity_pools.len(), list(&self.liquidity_pools))?;
        writeln!(f, "    Keepers: {}", list(&self.keepers))?;
        write!(f, "    Guardians: {}", scanned(&self.guardians))
    }
}

#[cfg(feature = "display")]
impl std::fmt::Display for SymbolServiceFacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use colored::Colorize;

        writeln!(f, "{} {}", "SymbolService".blue(), self.address)?;
        writeln!(f, "    Implementation: {} | Proxy admin: {}", self.proxy.implementation, self.proxy.admin)?;
        writeln!(f, "    Owner: {}", self.owner)?;
        let factories = match &self.whitelisted_factories {
            Some(factories) => factories.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            None => "unknown".dimmed().to_string(),
        };
        write!(f, "    Whitelisted factories: {factories}")
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[test]
    fn windows_cover_range_inclusively() {
        let windows: Vec<_> = block_windows(100, 12_000, FILTER_LOG_STEP).collect();
        assert_eq!(windows, vec![(100, 5099), (5100, 10_099), (10_100, 12_000)]);
        assert_eq!(block_windows(7, 7, FILTER_LOG_STEP).collect::<Vec<_>>(), vec![(7, 7)]);
        assert_eq!(block_windows(8, 7, FILTER_LOG_STEP).count(), 0);
    }

    #[test]
    fn role_ids() {
        assert_eq!(role_id("DEFAULT_ADMIN_ROLE"), B256::ZERO);
        assert_eq!(role_id("PRICE_SETTER_ROLE"), keccak256("PRICE_SETTER_ROLE"));
    }

    #[test]
    fn replay_applies_changes_in_order() {
        let a = address!("0x00000000000000000000000000000000000000a1");
        let b = address!("0x00000000000000000000000000000000000000b2");
        let c = address!("0x00000000000000000000000000000000000000c3");
        let members = replay(vec![
            ((1, 0), None, Some(a)),
            ((2, 0), None, Some(b)),
            ((2, 1), None, Some(a)),
            ((3, 0), Some(a), Some(c)),
            ((4, 0), Some(b), None),
        ]);
        assert_eq!(members, vec![c]);
    }

    #[test]
    fn replay_orders_changes_within_a_block() {
        let a = address!("0x00000000000000000000000000000000000000a1");
        // removed then added again in block 5, listed add-first as separate
        // log queries return them
        let members = replay(vec![((1, 0), None, Some(a)), ((5, 3), None, Some(a)), ((5, 2), Some(a), None)]);
        assert_eq!(members, vec![a]);
        let members = replay(vec![((1, 0), None, Some(a)), ((5, 2), None, Some(a)), ((5, 3), Some(a), None)]);
        assert!(members.is_empty());
    }
}
