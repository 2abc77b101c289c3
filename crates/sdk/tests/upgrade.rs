use std::path::Path;

use alloy::{
    primitives::{Address, Bytes, U256, address, bytes},
    sol_types::SolCall,
};
use perp_deploy::{
    abi::{ILpGovernor, IPoolCreator},
    chain::ChainClientExt,
    component::{Component, Plain},
    config::NetworkConfig,
    deployer::Deployer,
    env::{Environment, Overrides},
    error::{ChainError, DeployError},
    record::{DeploymentRecord, RecordStore},
    script::{self, PoolParams},
    testing::{self, SimulatedChain},
    upgrade::{ProposalState, ProxyGroup, UpgradeOrchestrator, VersionEntry, version_key},
};

const NETWORK: &str = "localhost";
const DELAY: u64 = 40;
const BUSD: Address = address!("0xe9e7cea3dedca5984780bafc599bd69add087d56");

fn deployer(chain: &SimulatedChain, dir: &Path) -> Deployer<SimulatedChain> {
    let env = Environment::restorable(NETWORK, dir, Overrides::new().with(Component::Busd, BUSD)).unwrap();
    Deployer::new(env, testing::artifacts(), chain.clone())
}

/// Deployed exchange with one liquidity pool, and a second version to
/// upgrade it to.
struct Fixture {
    chain: SimulatedChain,
    deployer: Deployer<SimulatedChain>,
    orchestrator: UpgradeOrchestrator,
    group: ProxyGroup,
    v1: VersionEntry,
    v2: VersionEntry,
}

impl Fixture {
    async fn new(dir: &Path) -> Self {
        let chain = SimulatedChain::new();
        let mut deployer = deployer(&chain, dir);
        let admin = deployer.deploy_or_skip(Plain::ProxyAdmin).await.unwrap().address();
        let config = NetworkConfig {
            upgrade_admin: admin,
            vault: address!("0x00000000000000000000000000000000000a0a17"),
            vault_fee_rate: Default::default(),
            symbol_base: 10000,
            keepers: vec![],
            guardians: vec![],
            overrides: Overrides::new(),
            execution_delay_blocks: DELAY,
        };
        let exchange = script::deploy_exchange(&mut deployer, &config).await.unwrap();
        let orchestrator = UpgradeOrchestrator::new(exchange.pool_creator).with_execution_delay(DELAY);
        let v1 = orchestrator.version(deployer.client(), exchange.version_key).await.unwrap();

        let group = script::create_liquidity_pool(&deployer, &PoolParams::new(BUSD, 18)).await.unwrap();

        let pool = deployer.deploy(Plain::LiquidityPool).await.unwrap().address();
        let hop = deployer.deploy(Plain::LiquidityPoolHop1).await.unwrap().address();
        let governor = deployer.deploy(Plain::LpGovernor).await.unwrap().address();
        let v2 = VersionEntry::new(vec![pool, hop], governor, 1);
        orchestrator.add_version(deployer.client(), &v2, "hop module split").await.unwrap();

        Self { chain, deployer, orchestrator, group, v1, v2 }
    }

    async fn implementations(&self) -> [Address; 2] {
        [
            self.deployer.get_implementation(self.group.liquidity_pool).await.unwrap(),
            self.deployer.get_implementation(self.group.governor).await.unwrap(),
        ]
    }

    async fn propose(&self) -> u64 {
        self.orchestrator
            .propose_to_upgrade_and_call(
                self.deployer.client(),
                self.group,
                self.v2.key(),
                [Bytes::new(), Bytes::new()],
                "upgrade to v2",
            )
            .await
            .unwrap()
            .id
    }
}

/// Tests registering a version twice sends one transaction, and keys are
/// content hashes.
#[tokio::test]
async fn test_add_version_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let f = Fixture::new(dir.path()).await;
    let client = f.deployer.client();

    let sent = f.chain.transaction_count();
    let again = f.orchestrator.add_version(client, &f.v2, "again").await.unwrap();
    assert!(!again.added);
    assert_eq!(again.key, version_key(f.v2.implementations(), f.v2.governor_implementation()));
    assert_eq!(f.chain.transaction_count(), sent);

    let registered = f.orchestrator.version(client, f.v2.key()).await.unwrap();
    assert_eq!(registered, f.v2);
    assert_eq!(client.view(f.orchestrator.pool_creator(), IPoolCreator::getLatestVersionCall {}).await.unwrap(), f.v2.key());
}

/// Tests proposals against unknown versions or without voting power fail
/// before sending anything.
#[tokio::test]
async fn test_propose_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let f = Fixture::new(dir.path()).await;
    let client = f.deployer.client();
    let sent = f.chain.transaction_count();

    let unknown = version_key(&[f.v2.governor_implementation()], f.v1.governor_implementation());
    let err = f
        .orchestrator
        .propose_to_upgrade_and_call(client, f.group, unknown, Default::default(), "bogus")
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::UnknownVersion(key) if key == unknown));

    f.chain.set_proposal_threshold(f.group.governor, U256::from(100));
    f.chain.set_votes(f.group.governor, testing::DEPLOYER, U256::from(99));
    let err = f
        .orchestrator
        .propose_to_upgrade_and_call(client, f.group, f.v2.key(), Default::default(), "v2")
        .await
        .unwrap_err();
    assert!(
        matches!(err, DeployError::NotAuthorized { governor, proposer } if governor == f.group.governor && proposer == testing::DEPLOYER)
    );
    assert_eq!(f.chain.transaction_count(), sent);

    f.chain.set_votes(f.group.governor, testing::DEPLOYER, U256::from(100));
    let proposal = f
        .orchestrator
        .propose_to_upgrade_and_call(client, f.group, f.v2.key(), Default::default(), "v2")
        .await
        .unwrap();
    assert_eq!(proposal.id, 1);
    assert_eq!(proposal.state, ProposalState::Pending);
    assert_eq!(proposal.executable_at_block, proposal.created_at_block + DELAY);
}

/// Tests the returned proposal is the one created by the proposer's own
/// transaction when another proposal is mined right after it.
#[tokio::test]
async fn test_propose_returns_own_proposal() {
    let dir = tempfile::tempdir().unwrap();
    let f = Fixture::new(dir.path()).await;
    let client = f.deployer.client();
    let other = Address::repeat_byte(0x0b);
    let competing = ILpGovernor::proposeToUpgradeAndCallCall {
        targetVersionKey: f.v1.key(),
        dataForLiquidityPool: Bytes::new(),
        dataForGovernor: Bytes::new(),
        description: "competing".to_owned(),
    };
    f.chain.mine_after_next(other, f.group.governor, competing.abi_encode().into());

    let id = f.propose().await;
    assert_eq!(id, 1);
    assert_eq!(client.view(f.group.governor, ILpGovernor::proposalCountCall {}).await.unwrap(), U256::from(2));
    let own = f.orchestrator.proposal(client, f.group, id).await.unwrap();
    assert_eq!(own.proposer, testing::DEPLOYER);
    assert_eq!(own.target_version_key, f.v2.key());
    let theirs = f.orchestrator.proposal(client, f.group, 2).await.unwrap();
    assert_eq!(theirs.proposer, other);
    assert_eq!(theirs.target_version_key, f.v1.key());
    assert_eq!(theirs.created_at_block, own.created_at_block);
}

/// Tests execution is refused one block before the delay elapses and
/// succeeds at it, switching both proxies and running the migrations.
#[tokio::test]
async fn test_execute_after_delay() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = Fixture::new(dir.path()).await;
    let migrate = bytes!("0x8129fc1c");
    let proposal = f
        .orchestrator
        .propose_to_upgrade_and_call(f.deployer.client(), f.group, f.v2.key(), [migrate.clone(), Bytes::new()], "v2")
        .await
        .unwrap();

    f.chain.mine(DELAY - 1);
    assert_eq!(f.chain.head(), proposal.created_at_block + DELAY - 1);
    let err = f.orchestrator.execute(&mut f.deployer, f.group, proposal.id).await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::TooEarly { proposal_id: 1, head, executable_at } if head + 1 == executable_at
    ));
    assert_eq!(f.implementations().await, [f.v1.implementations()[0], f.v1.governor_implementation()]);

    f.chain.mine(1);
    let state = f.orchestrator.proposal(f.deployer.client(), f.group, proposal.id).await.unwrap().state;
    assert_eq!(state, ProposalState::Executable);
    let executed = f.orchestrator.execute(&mut f.deployer, f.group, proposal.id).await.unwrap();
    assert_eq!(executed.state, ProposalState::Executed);
    assert_eq!(f.implementations().await, [f.v2.implementations()[0], f.v2.governor_implementation()]);
    assert_eq!(f.chain.migrations(f.group.liquidity_pool), vec![migrate]);
    assert!(f.chain.migrations(f.group.governor).is_empty());

    let err = f.orchestrator.execute(&mut f.deployer, f.group, proposal.id).await.unwrap_err();
    assert!(matches!(err, DeployError::ProposalClosed(1)));
}

/// Tests a failing execution leaves every proxy of the group on the old
/// version, and the proposal can be executed afterwards.
#[tokio::test]
async fn test_execute_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = Fixture::new(dir.path()).await;
    let id = f.propose().await;
    f.chain.mine(DELAY);
    let before = f.implementations().await;

    f.chain.revert_next("execution reverted");
    let err = f.orchestrator.execute(&mut f.deployer, f.group, id).await.unwrap_err();
    assert!(matches!(err, DeployError::Chain(ChainError::Rejected(_))));
    assert_eq!(f.implementations().await, before);
    let state = f.orchestrator.proposal(f.deployer.client(), f.group, id).await.unwrap().state;
    assert_eq!(state, ProposalState::Executable);

    f.orchestrator.execute(&mut f.deployer, f.group, id).await.unwrap();
    assert_eq!(f.implementations().await, [f.v2.implementations()[0], f.v2.governor_implementation()]);
}

/// Tests a cancelled proposal cannot be executed.
#[tokio::test]
async fn test_cancelled_proposal_closed() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = Fixture::new(dir.path()).await;
    let id = f.propose().await;
    f.chain.mine(DELAY);
    f.chain.cancel_proposal(f.group.governor, id);

    let proposal = f.orchestrator.proposal(f.deployer.client(), f.group, id).await.unwrap();
    assert_eq!(proposal.state, ProposalState::Cancelled);
    assert!(matches!(f.orchestrator.execute(&mut f.deployer, f.group, id).await, Err(DeployError::ProposalClosed(_))));
    assert!(matches!(f.orchestrator.proposal(f.deployer.client(), f.group, 7).await, Err(DeployError::Config(_))));
}

/// Tests executing records the new implementations of recorded proxies, and
/// that a read-only environment refuses to execute.
#[tokio::test]
async fn test_execute_updates_records() {
    let dir = tempfile::tempdir().unwrap();
    let f = Fixture::new(dir.path()).await;
    let id = f.propose().await;
    f.chain.mine(DELAY);

    let upgrade_admin = f.deployer.get_admin_of_upgradable_contract(f.group.liquidity_pool).await.unwrap();
    let [pool_implementation, governor_implementation] = f.implementations().await;
    let mut env = Environment::restorable(NETWORK, dir.path(), Overrides::new()).unwrap();
    env.record(DeploymentRecord::upgradeable(
        "LiquidityPool-BUSD",
        f.group.liquidity_pool,
        upgrade_admin,
        pool_implementation,
        1,
    ))
    .unwrap();
    env.record(DeploymentRecord::upgradeable(
        "LpGovernor-BUSD",
        f.group.governor,
        upgrade_admin,
        governor_implementation,
        1,
    ))
    .unwrap();

    let env = Environment::read_only(NETWORK, dir.path()).unwrap();
    let mut read_only = Deployer::new(env, testing::artifacts(), f.chain.clone());
    assert!(matches!(f.orchestrator.execute(&mut read_only, f.group, id).await, Err(DeployError::ReadOnly(_))));

    let mut deployer = deployer(&f.chain, dir.path());
    f.orchestrator.execute(&mut deployer, f.group, id).await.unwrap();

    let store = RecordStore::open(dir.path(), NETWORK).unwrap();
    assert_eq!(store.get("LiquidityPool-BUSD").unwrap().implementation(), Some(f.v2.implementations()[0]));
    assert_eq!(store.get("LpGovernor-BUSD").unwrap().implementation(), Some(f.v2.governor_implementation()));
    assert_eq!(store.get("LpGovernor-BUSD").unwrap().admin(), Some(upgrade_admin));
}
