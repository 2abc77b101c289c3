//! In-memory chain for exercising deployment scripts and upgrades without a
//! node.
//!
//! [`SimulatedChain`] models the exchange contracts (proxies, proxy admin,
//! symbol service, pool creator, governors, access control) closely enough
//! for the deployer, the orchestrator and the inspection to run unchanged.
//! Every transaction mines one block; a failing transaction changes nothing
//! but the block number.

mod artifacts;
mod contracts;

use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, B256, Bytes, U256, address};
pub use artifacts::{artifact, artifacts};
use contracts::SimState;

use crate::{
    chain::{ChainClient, Confirmed, EventLog, LogQuery},
    error::ChainError,
};

/// Default sender of a [`SimulatedChain`].
pub const DEPLOYER: Address = address!("0x000000000000000000000000000000000000de10");

#[derive(Clone, Debug)]
pub struct SimulatedChain {
    state: Arc<Mutex<SimState>>,
    sender: Address,
}

impl Default for SimulatedChain {
    fn default() -> Self { Self::new() }
}

impl SimulatedChain {
    pub fn new() -> Self { Self { state: Arc::new(Mutex::new(SimState::default())), sender: DEPLOYER } }

    /// Same chain, transactions sent from `sender`.
    pub fn connect(&self, sender: Address) -> Self { Self { state: self.state.clone(), sender } }

    fn state(&self) -> MutexGuard<'_, SimState> { self.state.lock().unwrap() }

    pub fn head(&self) -> u64 { self.state().block }

    /// Mines `blocks` empty blocks.
    pub fn mine(&self, blocks: u64) { self.state().block += blocks; }

    /// Transactions sent so far, reverted ones included.
    pub fn transaction_count(&self) -> u64 { self.state().transactions }

    /// `eth_getLogs` queries answered so far.
    pub fn log_queries(&self) -> u64 { self.state().log_queries }

    /// Makes the next transaction revert with `reason`.
    pub fn revert_next(&self, reason: &str) { self.state().revert_next = Some(reason.to_owned()); }

    pub fn set_execution_delay(&self, blocks: u64) { self.state().execution_delay = blocks; }

    /// Wipes the code of `address`, as a restarted development node would.
    pub fn clear_code(&self, address: Address) {
        if let Some(account) = self.state().accounts.get_mut(&address) {
            account.code = Bytes::new();
        }
    }

    pub fn set_storage(&self, address: Address, slot: B256, value: B256) {
        if let Some(account) = self.state().accounts.get_mut(&address) {
            account.storage.insert(slot, value);
        }
    }

    /// Voting power of `account` on `governor`.
    pub fn set_votes(&self, governor: Address, account: Address, votes: U256) {
        self.state().state_mut(governor).unwrap().votes.insert(account, votes);
    }

    pub fn set_proposal_threshold(&self, governor: Address, threshold: U256) {
        self.state().state_mut(governor).unwrap().proposal_threshold = threshold;
    }

    pub fn cancel_proposal(&self, governor: Address, id: u64) {
        self.state().state_mut(governor).unwrap().proposals[id as usize - 1].canceled = true;
    }

    /// Sends `input` from `from` to `to` in the same block as the next
    /// successful transaction, right after it. A failing queued transaction
    /// is dropped.
    pub fn mine_after_next(&self, from: Address, to: Address, input: Bytes) {
        self.state().after_next.push((from, to, input));
    }

    /// Calls the upgrades of `proxy` made on its new implementations.
    pub fn migrations(&self, proxy: Address) -> Vec<Bytes> {
        self.state().state_mut(proxy).map(|s| s.migrations.clone()).unwrap_or_default()
    }

    fn mine_transaction<T>(&self, run: impl FnOnce(&mut SimState) -> Result<T, String>) -> Result<Confirmed<T>, ChainError> {
        let mut state = self.state();
        state.block += 1;
        state.transactions += 1;
        let tx_hash = contracts::tx_hash(state.transactions);
        if let Some(reason) = state.revert_next.take() {
            return Err(ChainError::Rejected(reason));
        }
        let mut next = state.clone();
        let value = run(&mut next).map_err(ChainError::Rejected)?;
        for (from, to, input) in std::mem::take(&mut next.after_next) {
            next.transactions += 1;
            let mut queued = next.clone();
            if queued.call(from, to, &input).is_ok() {
                next = queued;
            }
        }
        let block = next.block;
        *state = next;
        Ok(Confirmed { value, block, tx_hash })
    }
}

impl ChainClient for SimulatedChain {
    fn sender(&self) -> Address { self.sender }

    async fn block_number(&self) -> Result<u64, ChainError> { Ok(self.head()) }

    async fn deploy(&self, init_code: Bytes) -> Result<Confirmed<Address>, ChainError> {
        let sender = self.sender;
        self.mine_transaction(|state| state.deploy(sender, &init_code))
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.state().accounts.get(&address).map(|a| a.code.clone()).unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        Ok(self.state().slot(address, slot))
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError> {
        let mut scratch = self.state().clone();
        scratch.block += 1;
        scratch.call(self.sender, to, &input).map_err(ChainError::Rejected)
    }

    async fn send(&self, to: Address, input: Bytes) -> Result<Confirmed<Vec<EventLog>>, ChainError> {
        let sender = self.sender;
        self.mine_transaction(|state| {
            let emitted = state.logs.len();
            state.call(sender, to, &input)?;
            Ok(state.logs[emitted..].to_vec())
        })
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<EventLog>, ChainError> {
        let mut state = self.state();
        state.log_queries += 1;
        let logs = state
            .logs
            .iter()
            .filter(|log| {
                log.address == query.address
                    && log.data.topics().first() == Some(&query.topic0)
                    && (query.from_block..=query.to_block).contains(&log.block_number)
            })
            .cloned()
            .collect();
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{abi::IProxyAdmin, chain::ChainClientExt};

    #[tokio::test]
    async fn failed_transaction_only_mines_a_block() {
        let chain = SimulatedChain::new();
        let code = artifacts().get("ProxyAdmin").unwrap().creation_code(|_| unreachable!()).unwrap();
        let admin = chain.deploy(code).await.unwrap().value;
        assert_eq!(chain.view(admin, IProxyAdmin::ownerCall {}).await.unwrap(), DEPLOYER);

        let stranger = chain.connect(Address::repeat_byte(7));
        let head = chain.head();
        let err = stranger
            .transact(admin, IProxyAdmin::upgradeCall { proxy: admin, implementation: admin })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Rejected(reason) if reason.contains("not the owner")));
        assert_eq!(chain.head(), head + 1);
        assert_eq!(chain.transaction_count(), 2);
    }

    #[tokio::test]
    async fn injected_revert_discards_the_transaction() {
        let chain = SimulatedChain::new();
        let code = artifacts().get("Broker").unwrap().creation_code(|_| unreachable!()).unwrap();
        chain.revert_next("out of gas");
        assert!(matches!(chain.deploy(code.clone()).await, Err(ChainError::Rejected(r)) if r == "out of gas"));
        let broker = chain.deploy(code).await.unwrap();
        assert!(!chain.code_at(broker.value).await.unwrap().is_empty());
        assert_eq!(broker.block, 3);
    }
}
