//! Chain access used by deployment, upgrade and inspection.
//!
//! [`ChainClient`] is the narrow surface the rest of the crate needs: deploy
//! creation code, send and simulate calls, read code, storage and logs. It is
//! implemented over an alloy [`Provider`] by [`RpcChain`] and in memory by
//! `testing::SimulatedChain`.

use alloy::{
    network::{ReceiptResponse, TransactionBuilder},
    primitives::{Address, B256, Bytes, LogData, TxHash, U256, b256},
    providers::Provider,
    rpc::types::{Filter, TransactionRequest},
    sol_types::{SolCall, SolEvent},
};
use tracing::{debug, info};

use crate::error::ChainError;

/// EIP-1967 `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// EIP-1967 `bytes32(uint256(keccak256("eip1967.proxy.admin")) - 1)`.
pub const ADMIN_SLOT: B256 =
    b256!("0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// EIP-1967 `bytes32(uint256(keccak256("eip1967.proxy.beacon")) - 1)`.
pub const BEACON_SLOT: B256 =
    b256!("0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50");

/// Value produced by a mined transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Confirmed<T> {
    pub value: T,
    pub block: u64,
    pub tx_hash: TxHash,
}

/// Single-address, single-topic log query over an inclusive block range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventLog {
    pub block_number: u64,
    /// Index of the log within its block.
    pub log_index: u64,
    pub address: Address,
    pub data: LogData,
}

impl EventLog {
    pub fn decode<E: SolEvent>(&self) -> Result<E, ChainError> { Ok(E::decode_log_data(&self.data)?) }

    /// `(block, log index)`, the order logs were emitted in.
    pub fn position(&self) -> (u64, u64) { (self.block_number, self.log_index) }

    fn is<E: SolEvent>(&self, address: Address) -> bool {
        self.address == address && self.data.topics().first() == Some(&E::SIGNATURE_HASH)
    }
}

impl Confirmed<Vec<EventLog>> {
    /// `E` events `address` emitted in this transaction, in emission order.
    pub fn events<E: SolEvent>(&self, address: Address) -> Result<Vec<E>, ChainError> {
        self.value.iter().filter(|log| log.is::<E>(address)).map(EventLog::decode).collect()
    }
}

fn event_log(log: alloy::rpc::types::Log) -> Result<EventLog, ChainError> {
    let pending = ChainError::MissingBlock(log.transaction_hash.unwrap_or_default());
    let (Some(block_number), Some(log_index)) = (log.block_number, log.log_index) else {
        return Err(pending);
    };
    Ok(EventLog { block_number, log_index, address: log.inner.address, data: log.inner.data })
}

#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// Account transactions are sent from.
    fn sender(&self) -> Address;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Sends a contract creation transaction and waits for it to be mined.
    async fn deploy(&self, init_code: Bytes) -> Result<Confirmed<Address>, ChainError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError>;

    /// Simulates a call against the latest state without sending it.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError>;

    /// Sends a call and waits for it to be mined, returning the logs of its
    /// receipt. A reverted transaction is an error.
    async fn send(&self, to: Address, input: Bytes) -> Result<Confirmed<Vec<EventLog>>, ChainError>;

    async fn logs(&self, query: &LogQuery) -> Result<Vec<EventLog>, ChainError>;
}

/// Typed contract calls on top of [`ChainClient`].
#[allow(async_fn_in_trait)]
pub trait ChainClientExt: ChainClient {
    async fn view<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, ChainError> {
        let output = self.call(to, call.abi_encode().into()).await?;
        Ok(C::abi_decode_returns(&output)?)
    }

    async fn transact<C: SolCall>(&self, to: Address, call: C) -> Result<Confirmed<Vec<EventLog>>, ChainError> {
        debug!(%to, function = C::SIGNATURE, "sending");
        self.send(to, call.abi_encode().into()).await
    }

    /// Address stored in an EIP-1967 proxy slot.
    async fn slot_address(&self, proxy: Address, slot: B256) -> Result<Address, ChainError> {
        Ok(Address::from_word(self.storage_at(proxy, slot).await?))
    }
}

impl<T: ChainClient> ChainClientExt for T {}

/// [`ChainClient`] over an alloy provider with a wallet for `sender`.
#[derive(Clone, Debug)]
pub struct RpcChain<P> {
    provider: P,
    sender: Address,
    confirmations: u64,
}

impl<P: Provider> RpcChain<P> {
    pub fn new(provider: P, sender: Address) -> Self { Self { provider, sender, confirmations: 1 } }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn provider(&self) -> &P { &self.provider }

    async fn submit(&self, tx: TransactionRequest) -> Result<Mined, ChainError> {
        let receipt = self
            .provider
            .send_transaction(tx)
            .await?
            .with_required_confirmations(self.confirmations)
            .get_receipt()
            .await?;
        let tx_hash = receipt.transaction_hash();
        if !receipt.status() {
            return Err(ChainError::Reverted(tx_hash));
        }
        let block = receipt.block_number().ok_or(ChainError::MissingBlock(tx_hash))?;
        info!(%tx_hash, block, gas_used = receipt.gas_used(), "transaction mined");
        let logs = receipt.inner.logs().iter().cloned().map(event_log).collect::<Result<_, _>>()?;
        Ok(Mined { tx_hash, block, contract_address: receipt.contract_address(), logs })
    }
}

struct Mined {
    tx_hash: TxHash,
    block: u64,
    contract_address: Option<Address>,
    logs: Vec<EventLog>,
}

impl<P: Provider> ChainClient for RpcChain<P> {
    fn sender(&self) -> Address { self.sender }

    async fn block_number(&self) -> Result<u64, ChainError> { Ok(self.provider.get_block_number().await?) }

    async fn deploy(&self, init_code: Bytes) -> Result<Confirmed<Address>, ChainError> {
        let tx = TransactionRequest::default().with_from(self.sender).with_deploy_code(init_code);
        let Mined { tx_hash, block, contract_address, .. } = self.submit(tx).await?;
        let value = contract_address.ok_or(ChainError::MissingContractAddress(tx_hash))?;
        Ok(Confirmed { value, block, tx_hash })
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.provider.get_code_at(address).await?)
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
        let value = self.provider.get_storage_at(address, U256::from_be_slice(slot.as_slice())).await?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default().with_from(self.sender).with_to(to).with_input(input);
        Ok(self.provider.call(tx).await?)
    }

    async fn send(&self, to: Address, input: Bytes) -> Result<Confirmed<Vec<EventLog>>, ChainError> {
        let tx = TransactionRequest::default().with_from(self.sender).with_to(to).with_input(input);
        let Mined { tx_hash, block, logs, .. } = self.submit(tx).await?;
        Ok(Confirmed { value: logs, block, tx_hash })
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<EventLog>, ChainError> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);
        self.provider.get_logs(&filter).await?.into_iter().map(event_log).collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::types::Log;

    use super::*;

    #[test]
    fn pending_log_has_no_position() {
        let tx_hash = TxHash::repeat_byte(1);
        let pending = Log { transaction_hash: Some(tx_hash), block_number: None, ..Default::default() };
        assert!(matches!(event_log(pending), Err(ChainError::MissingBlock(hash)) if hash == tx_hash));

        let mined = Log { block_number: Some(12), log_index: Some(3), ..Default::default() };
        assert_eq!(event_log(mined).unwrap().position(), (12, 3));
    }
}
