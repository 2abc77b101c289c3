use std::path::PathBuf;

use alloy::{
    primitives::{Address, B256, TxHash},
    transports::TransportError,
};
use thiserror::Error;

/// Failure at the chain RPC boundary.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport: {0}")]
    Transport(#[from] TransportError),

    #[error("pending transaction: {0}")]
    Pending(#[from] alloy::providers::PendingTransactionError),

    #[error("abi: {0}")]
    Abi(#[from] alloy::sol_types::Error),

    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    #[error("transaction reverted: {0}")]
    Rejected(String),

    #[error("receipt of {0} carries no contract address")]
    MissingContractAddress(TxHash),

    #[error("receipt of {0} carries no block number")]
    MissingBlock(TxHash),

    #[error("inconsistent chain state: {0}")]
    Inconsistent(String),
}

/// Errors of deployment, upgrade and inspection operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Malformed override, address or configuration value.
    #[error("config: {0}")]
    Config(String),

    /// Lookup of a name that has no deployment record.
    #[error("{0} is not deployed")]
    NotDeployed(String),

    /// Proposal against a version key never registered with the pool creator.
    #[error("unknown version {0}")]
    UnknownVersion(B256),

    /// Proposer lacks proposal rights on the governor.
    #[error("{proposer} is not authorized to propose on governor {governor}")]
    NotAuthorized { governor: Address, proposer: Address },

    /// Execution attempted before the delay window elapsed.
    #[error("proposal {proposal_id} is executable at block {executable_at}, head is {head}")]
    TooEarly { proposal_id: u64, head: u64, executable_at: u64 },

    /// Execution attempted on an executed or cancelled proposal.
    #[error("proposal {0} is closed")]
    ProposalClosed(u64),

    /// Mutation attempted in a read-only environment.
    #[error("environment {0} is read-only")]
    ReadOnly(String),

    #[error("artifact: {0}")]
    Artifact(String),

    #[error("deployment store {path}: {reason}")]
    Store { path: PathBuf, reason: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl DeployError {
    pub(crate) fn store(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Store { path: path.into(), reason: reason.to_string() }
    }
}
