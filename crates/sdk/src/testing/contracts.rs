use std::collections::{BTreeMap, HashMap};

use alloy::{
    primitives::{Address, B256, Bytes, I256, LogData, U256, keccak256},
    sol_types::{SolEvent, SolInterface, SolValue},
};

use super::artifacts::{self, PROXY};
use crate::{
    abi::{IAccessControl, ILpGovernor, IPoolCreator, IProxyAdmin, ISymbolService, IUpgradeableBeacon},
    chain::{ADMIN_SLOT, BEACON_SLOT, EventLog, IMPLEMENTATION_SLOT},
    upgrade::{DEFAULT_EXECUTION_DELAY_BLOCKS, version_key},
};

type Revert = String;

fn require(condition: bool, reason: &str) -> Result<(), Revert> {
    if condition { Ok(()) } else { Err(reason.to_owned()) }
}

#[derive(Clone, Debug)]
pub(super) struct Version {
    pub implementations: Vec<Address>,
    pub governor: Address,
    pub compatibility: U256,
}

#[derive(Clone, Debug)]
pub(super) struct Proposal {
    pub proposer: Address,
    pub version_key: B256,
    pub data_for_pool: Bytes,
    pub data_for_governor: Bytes,
    pub start_block: u64,
    pub executed: bool,
    pub canceled: bool,
}

/// Storage of every modelled contract; each model uses its own fields.
#[derive(Clone, Debug, Default)]
pub(super) struct ContractState {
    pub initialized: bool,
    pub owner: Address,
    pub implementation: Address,
    // symbol service
    pub reserved_symbols: U256,
    pub whitelisted: Vec<Address>,
    // pool creator
    pub symbol_service: Address,
    pub upgrade_admin: Address,
    pub vault: Address,
    pub vault_fee_rate: I256,
    pub versions: BTreeMap<B256, Version>,
    pub latest_version: B256,
    pub pools: Vec<Address>,
    pub keepers: Vec<Address>,
    pub guardians: Vec<Address>,
    // governor
    pub pool_creator: Address,
    pub liquidity_pool: Address,
    pub proposals: Vec<Proposal>,
    pub votes: HashMap<Address, U256>,
    pub proposal_threshold: U256,
    // access control
    pub roles: BTreeMap<B256, Vec<Address>>,
    /// Calls made on the proxy by upgrades.
    pub migrations: Vec<Bytes>,
}

#[derive(Clone, Debug)]
pub(super) struct Account {
    pub contract: String,
    pub code: Bytes,
    pub storage: HashMap<B256, B256>,
    pub state: ContractState,
}

#[derive(Clone, Debug)]
pub(super) struct SimState {
    pub block: u64,
    pub transactions: u64,
    pub log_queries: u64,
    pub execution_delay: u64,
    pub revert_next: Option<String>,
    /// `(from, to, input)` mined right after the next transaction.
    pub after_next: Vec<(Address, Address, Bytes)>,
    pub accounts: HashMap<Address, Account>,
    pub logs: Vec<EventLog>,
    next_address: u64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            block: 1,
            transactions: 0,
            log_queries: 0,
            execution_delay: DEFAULT_EXECUTION_DELAY_BLOCKS,
            revert_next: None,
            after_next: Vec::new(),
            accounts: HashMap::new(),
            logs: Vec::new(),
            next_address: 0,
        }
    }
}

impl SimState {
    pub fn slot(&self, address: Address, slot: B256) -> B256 {
        self.accounts.get(&address).and_then(|a| a.storage.get(&slot).copied()).unwrap_or_default()
    }

    fn slot_address(&self, address: Address, slot: B256) -> Address { Address::from_word(self.slot(address, slot)) }

    fn set_slot(&mut self, address: Address, slot: B256, value: Address) {
        if let Some(account) = self.accounts.get_mut(&address) {
            account.storage.insert(slot, value.into_word());
        }
    }

    pub fn state_mut(&mut self, address: Address) -> Result<&mut ContractState, Revert> {
        self.accounts.get_mut(&address).map(|a| &mut a.state).ok_or_else(|| format!("no contract at {address}"))
    }

    fn state(&self, address: Address) -> Result<&ContractState, Revert> {
        self.accounts.get(&address).map(|a| &a.state).ok_or_else(|| format!("no contract at {address}"))
    }

    fn has_code(&self, address: Address) -> bool { self.accounts.get(&address).is_some_and(|a| !a.code.is_empty()) }

    fn emit<E: SolEvent>(&mut self, address: Address, event: &E) {
        let data: LogData = event.encode_log_data();
        let log_index = self.logs.iter().filter(|log| log.block_number == self.block).count() as u64;
        self.logs.push(EventLog { block_number: self.block, log_index, address, data });
    }

    fn create(&mut self, contract: &str) -> Address {
        self.next_address += 1;
        let mut bytes = [0u8; 20];
        bytes[0] = 0xca;
        bytes[12..].copy_from_slice(&self.next_address.to_be_bytes());
        let address = Address::from(bytes);
        self.accounts.insert(
            address,
            Account {
                contract: contract.to_owned(),
                code: artifacts::runtime_code(contract),
                storage: HashMap::new(),
                state: ContractState::default(),
            },
        );
        address
    }

    fn create_proxy(&mut self, implementation: Address, admin: Address) -> Address {
        let proxy = self.create(PROXY);
        self.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        self.set_slot(proxy, ADMIN_SLOT, admin);
        proxy
    }

    /// Runs a contract creation, constructor included.
    pub fn deploy(&mut self, from: Address, init_code: &[u8]) -> Result<Address, Revert> {
        let (contract, libraries, args) = artifacts::parse_init_code(init_code)?;
        for library in libraries {
            require(self.has_code(library), "linked library has no code")?;
        }
        let address = self.create(&contract);
        match contract.as_str() {
            PROXY => {
                let (logic, admin, data) =
                    <(Address, Address, Bytes)>::abi_decode_params(args).map_err(|e| e.to_string())?;
                require(self.has_code(logic), "ERC1967: new implementation is not a contract")?;
                self.set_slot(address, IMPLEMENTATION_SLOT, logic);
                self.set_slot(address, ADMIN_SLOT, admin);
                if !data.is_empty() {
                    self.delegate(logic, from, address, &data)?;
                }
            },
            "BeaconProxy" => {
                let (beacon, data) = <(Address, Bytes)>::abi_decode_params(args).map_err(|e| e.to_string())?;
                let implementation = self.state(beacon)?.implementation;
                self.set_slot(address, BEACON_SLOT, beacon);
                if !data.is_empty() {
                    self.delegate(implementation, from, address, &data)?;
                }
            },
            "UpgradeableBeacon" => {
                let implementation = Address::abi_decode(args).map_err(|e| e.to_string())?;
                require(self.has_code(implementation), "UpgradeableBeacon: implementation is not a contract")?;
                let state = self.state_mut(address)?;
                state.implementation = implementation;
                state.owner = from;
            },
            "ProxyAdmin" => self.state_mut(address)?.owner = from,
            _ => (),
        }
        Ok(address)
    }

    /// Message call as seen by the contract at `to`.
    pub fn call(&mut self, from: Address, to: Address, input: &[u8]) -> Result<Bytes, Revert> {
        let Some(contract) = self.accounts.get(&to).map(|a| a.contract.clone()) else {
            // plain account
            return Ok(Bytes::new());
        };
        match contract.as_str() {
            PROXY => {
                require(
                    from != self.slot_address(to, ADMIN_SLOT),
                    "TransparentUpgradeableProxy: admin cannot fallback to proxy target",
                )?;
                let implementation = self.slot_address(to, IMPLEMENTATION_SLOT);
                self.delegate(implementation, from, to, input)
            },
            "BeaconProxy" => {
                let beacon = self.slot_address(to, BEACON_SLOT);
                let implementation = self.state(beacon)?.implementation;
                self.delegate(implementation, from, to, input)
            },
            _ => self.delegate(to, from, to, input),
        }
    }

    /// Runs the code of `code_address` against the storage of `this`.
    fn delegate(&mut self, code_address: Address, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        let model = self
            .accounts
            .get(&code_address)
            .map(|a| a.contract.clone())
            .ok_or_else(|| format!("no code at {code_address}"))?;
        match model.as_str() {
            "SymbolService" => self.symbol_service(from, this, input),
            "PoolCreator" => self.pool_creator(from, this, input),
            "LpGovernor" => self.governor(from, this, input),
            "ProxyAdmin" => self.proxy_admin(from, this, input),
            "UpgradeableBeacon" => self.beacon(this, input),
            "MCDEXMultiOracle" | "TunableOracleRegister" => self.access_control(from, this, input),
            other => Err(format!("{other}: unsupported call")),
        }
    }

    fn upgrade(&mut self, proxy: Address, implementation: Address, data: &Bytes) -> Result<(), Revert> {
        require(self.has_code(implementation), "ERC1967: new implementation is not a contract")?;
        self.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        if !data.is_empty() {
            self.state_mut(proxy)?.migrations.push(data.clone());
        }
        Ok(())
    }

    fn symbol_service(&mut self, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use ISymbolService::ISymbolServiceCalls as Call;

        let call = Call::abi_decode(input).map_err(|e| e.to_string())?;
        let state = self.state_mut(this)?;
        match call {
            Call::initialize(c) => {
                require(!state.initialized, "Initializable: contract is already initialized")?;
                state.initialized = true;
                state.owner = from;
                state.reserved_symbols = c.reservedSymbolCount;
                Ok(Bytes::new())
            },
            Call::owner(_) => Ok(state.owner.abi_encode().into()),
            Call::addWhitelistedFactory(c) => {
                require(state.owner == from, "Ownable: caller is not the owner")?;
                require(!state.whitelisted.contains(&c.factory), "factory already exists")?;
                state.whitelisted.push(c.factory);
                self.emit(this, &ISymbolService::AddWhitelistedFactory { factory: c.factory });
                Ok(Bytes::new())
            },
            Call::removeWhitelistedFactory(c) => {
                require(state.owner == from, "Ownable: caller is not the owner")?;
                require(state.whitelisted.contains(&c.factory), "factory not found")?;
                state.whitelisted.retain(|f| *f != c.factory);
                self.emit(this, &ISymbolService::RemoveWhitelistedFactory { factory: c.factory });
                Ok(Bytes::new())
            },
            Call::isWhitelistedFactory(c) => Ok(state.whitelisted.contains(&c.factory).abi_encode().into()),
        }
    }

    fn pool_creator(&mut self, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use IPoolCreator::IPoolCreatorCalls as Call;

        let call = Call::abi_decode(input).map_err(|e| e.to_string())?;
        let owner = self.state(this)?.owner;
        let only_owner = || require(owner == from, "Ownable: caller is not the owner");
        match call {
            Call::initialize(c) => {
                require(!self.state(this)?.initialized, "Initializable: contract is already initialized")?;
                let upgrade_admin = self.create("ProxyAdmin");
                self.state_mut(upgrade_admin)?.owner = this;
                let state = self.state_mut(this)?;
                state.initialized = true;
                state.owner = from;
                state.symbol_service = c.symbolService;
                state.vault = c.globalVault;
                state.vault_fee_rate = c.globalVaultFeeRate;
                state.upgrade_admin = upgrade_admin;
                Ok(Bytes::new())
            },
            Call::owner(_) => Ok(owner.abi_encode().into()),
            Call::upgradeAdmin(_) => Ok(self.state(this)?.upgrade_admin.abi_encode().into()),
            Call::getVault(_) => Ok(self.state(this)?.vault.abi_encode().into()),
            Call::getVaultFeeRate(_) => Ok(self.state(this)?.vault_fee_rate.abi_encode().into()),
            Call::addVersion(c) => {
                only_owner()?;
                require(!c.implementations.is_empty(), "no implementation")?;
                for implementation in c.implementations.iter().chain([&c.governor]) {
                    require(self.has_code(*implementation), "implementation must be contract")?;
                }
                let key = version_key(&c.implementations, c.governor);
                let state = self.state_mut(this)?;
                require(!state.versions.contains_key(&key), "implementation is already existed")?;
                state.versions.insert(
                    key,
                    Version {
                        implementations: c.implementations,
                        governor: c.governor,
                        compatibility: c.compatibility,
                    },
                );
                state.latest_version = key;
                Ok(Bytes::new())
            },
            Call::isVersionKeyValid(c) => {
                Ok(self.state(this)?.versions.contains_key(&c.versionKey).abi_encode().into())
            },
            Call::getVersion(c) => {
                let version = self.state(this)?.versions.get(&c.versionKey).ok_or("invalid version")?;
                Ok((version.implementations.clone(), version.governor, version.compatibility).abi_encode_params().into())
            },
            Call::getLatestVersion(_) => Ok(self.state(this)?.latest_version.abi_encode().into()),
            Call::createLiquidityPool(c) => {
                let state = self.state(this)?;
                let version_key = state.latest_version;
                let version = state.versions.get(&version_key).cloned().ok_or("no version")?;
                let upgrade_admin = state.upgrade_admin;
                let pool = self.create_proxy(version.implementations[0], upgrade_admin);
                let governor = self.create_proxy(version.governor, upgrade_admin);
                let governor_state = self.state_mut(governor)?;
                governor_state.pool_creator = this;
                governor_state.liquidity_pool = pool;
                self.state_mut(this)?.pools.push(pool);
                self.emit(
                    this,
                    &IPoolCreator::CreateLiquidityPool {
                        versionKey: version_key,
                        liquidityPool: pool,
                        governor,
                        operator: from,
                        collateral: c.collateral,
                        collateralDecimals: c.collateralDecimals,
                        initData: c.initData,
                    },
                );
                Ok((pool, governor).abi_encode_params().into())
            },
            Call::getLiquidityPoolCount(_) => Ok(U256::from(self.state(this)?.pools.len()).abi_encode().into()),
            Call::listLiquidityPools(c) => Ok(page(&self.state(this)?.pools, c.begin, c.end).abi_encode().into()),
            Call::addKeeper(c) => {
                only_owner()?;
                let state = self.state_mut(this)?;
                require(!state.keepers.contains(&c.keeper), "keeper is already added")?;
                state.keepers.push(c.keeper);
                Ok(Bytes::new())
            },
            Call::isKeeper(c) => Ok(self.state(this)?.keepers.contains(&c.keeper).abi_encode().into()),
            Call::listKeepers(c) => Ok(page(&self.state(this)?.keepers, c.begin, c.end).abi_encode().into()),
            Call::addGuardian(c) => {
                only_owner()?;
                let state = self.state_mut(this)?;
                require(!state.guardians.contains(&c.guardian), "guardian is already added")?;
                state.guardians.push(c.guardian);
                self.emit(this, &IPoolCreator::AddGuardian { guardian: c.guardian });
                Ok(Bytes::new())
            },
            Call::isGuardian(c) => Ok(self.state(this)?.guardians.contains(&c.guardian).abi_encode().into()),
        }
    }

    fn governor(&mut self, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use ILpGovernor::ILpGovernorCalls as Call;

        let call = Call::abi_decode(input).map_err(|e| e.to_string())?;
        let block = self.block;
        let delay = self.execution_delay;
        match call {
            Call::proposeToUpgradeAndCall(c) => {
                let state = self.state(this)?;
                let valid = self.state(state.pool_creator)?.versions.contains_key(&c.targetVersionKey);
                require(valid, "invalid version")?;
                let votes = state.votes.get(&from).copied().unwrap_or_default();
                require(votes >= state.proposal_threshold, "proposer votes below proposal threshold")?;
                let state = self.state_mut(this)?;
                state.proposals.push(Proposal {
                    proposer: from,
                    version_key: c.targetVersionKey,
                    data_for_pool: c.dataForLiquidityPool,
                    data_for_governor: c.dataForGovernor,
                    start_block: block,
                    executed: false,
                    canceled: false,
                });
                let id = U256::from(state.proposals.len());
                self.emit(
                    this,
                    &ILpGovernor::ProposalCreated {
                        id,
                        proposer: from,
                        versionKey: c.targetVersionKey,
                        startBlock: U256::from(block),
                        endBlock: U256::from(block + delay),
                        description: c.description,
                    },
                );
                Ok(id.abi_encode().into())
            },
            Call::execute(c) => {
                let state = self.state(this)?;
                let index = proposal_index(c.proposalId, state.proposals.len())?;
                let proposal = state.proposals[index].clone();
                require(!proposal.executed && !proposal.canceled, "proposal is not active")?;
                require(block > proposal.start_block + delay, "proposal is still in its delay window")?;
                let version =
                    self.state(state.pool_creator)?.versions.get(&proposal.version_key).cloned().ok_or("invalid version")?;
                let pool = state.liquidity_pool;
                self.upgrade(pool, version.implementations[0], &proposal.data_for_pool)?;
                self.upgrade(this, version.governor, &proposal.data_for_governor)?;
                self.state_mut(this)?.proposals[index].executed = true;
                Ok(Bytes::new())
            },
            Call::getProposal(c) => {
                let state = self.state(this)?;
                let p = &state.proposals[proposal_index(c.proposalId, state.proposals.len())?];
                Ok((
                    p.proposer,
                    p.version_key,
                    p.data_for_pool.clone(),
                    p.data_for_governor.clone(),
                    U256::from(p.start_block),
                    p.executed,
                    p.canceled,
                )
                    .abi_encode_params()
                    .into())
            },
            Call::proposalCount(_) => Ok(U256::from(self.state(this)?.proposals.len()).abi_encode().into()),
            Call::proposalThreshold(_) => Ok(self.state(this)?.proposal_threshold.abi_encode().into()),
            Call::balanceOf(c) => {
                Ok(self.state(this)?.votes.get(&c.account).copied().unwrap_or_default().abi_encode().into())
            },
        }
    }

    fn proxy_admin(&mut self, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use IProxyAdmin::IProxyAdminCalls as Call;

        let call = Call::abi_decode(input).map_err(|e| e.to_string())?;
        let owner = self.state(this)?.owner;
        let authorize = |state: &SimState, proxy: Address| {
            require(owner == from, "Ownable: caller is not the owner")?;
            require(state.slot_address(proxy, ADMIN_SLOT) == this, "ProxyAdmin: not the admin of proxy")
        };
        match call {
            Call::owner(_) => Ok(owner.abi_encode().into()),
            Call::getProxyImplementation(c) => {
                Ok(self.slot_address(c.proxy, IMPLEMENTATION_SLOT).abi_encode().into())
            },
            Call::getProxyAdmin(c) => Ok(self.slot_address(c.proxy, ADMIN_SLOT).abi_encode().into()),
            Call::upgrade(c) => {
                authorize(self, c.proxy)?;
                require(self.has_code(c.implementation), "ERC1967: new implementation is not a contract")?;
                self.set_slot(c.proxy, IMPLEMENTATION_SLOT, c.implementation);
                Ok(Bytes::new())
            },
            Call::upgradeAndCall(c) => {
                authorize(self, c.proxy)?;
                require(self.has_code(c.implementation), "ERC1967: new implementation is not a contract")?;
                self.set_slot(c.proxy, IMPLEMENTATION_SLOT, c.implementation);
                self.delegate(c.implementation, this, c.proxy, &c.data)?;
                Ok(Bytes::new())
            },
        }
    }

    fn beacon(&mut self, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use IUpgradeableBeacon::IUpgradeableBeaconCalls as Call;

        let state = self.state(this)?;
        match Call::abi_decode(input).map_err(|e| e.to_string())? {
            Call::owner(_) => Ok(state.owner.abi_encode().into()),
            Call::implementation(_) => Ok(state.implementation.abi_encode().into()),
        }
    }

    fn access_control(&mut self, from: Address, this: Address, input: &[u8]) -> Result<Bytes, Revert> {
        use IAccessControl::IAccessControlCalls as Call;

        let call = Call::abi_decode(input).map_err(|e| e.to_string())?;
        let state = self.state_mut(this)?;
        match call {
            Call::getRoleMemberCount(c) => {
                Ok(U256::from(state.roles.get(&c.role).map_or(0, Vec::len)).abi_encode().into())
            },
            Call::getRoleMember(c) => {
                let members = state.roles.get(&c.role).map(Vec::as_slice).unwrap_or_default();
                let index = usize::try_from(c.index).ok().filter(|i| *i < members.len()).ok_or("index out of bounds")?;
                Ok(members[index].abi_encode().into())
            },
            Call::grantRole(c) => {
                let admins = state.roles.get(&B256::ZERO).map(Vec::as_slice).unwrap_or_default();
                require(admins.is_empty() || admins.contains(&from), "AccessControl: sender must be an admin")?;
                let members = state.roles.entry(c.role).or_default();
                if !members.contains(&c.account) {
                    members.push(c.account);
                }
                Ok(Bytes::new())
            },
        }
    }
}

fn proposal_index(id: U256, count: usize) -> Result<usize, Revert> {
    usize::try_from(id)
        .ok()
        .filter(|id| (1..=count).contains(id))
        .map(|id| id - 1)
        .ok_or_else(|| "invalid proposal id".to_owned())
}

/// Elements `[begin, end)` with `end` clamped to the list length.
fn page(items: &[Address], begin: U256, end: U256) -> Vec<Address> {
    let end = usize::try_from(end).unwrap_or(usize::MAX).min(items.len());
    let begin = usize::try_from(begin).unwrap_or(usize::MAX).min(end);
    items[begin..end].to_vec()
}

pub(super) fn tx_hash(index: u64) -> B256 { keccak256(index.to_be_bytes()) }
