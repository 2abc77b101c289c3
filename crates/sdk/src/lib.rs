//! Deployment state reconciliation and upgrade orchestration for the
//! perpetual exchange contracts.
//!
//! # Overview
//!
//! Deployments are tracked per network in a JSON record file (see
//! [`record`]) that scripts consult before acting: contracts already
//! recorded are reused, so a script interrupted halfway resumes where it
//! stopped when run again.
//!
//! Use [`env::Environment`] to load the records of a network together with
//! addresses fixed from outside, then [`deployer::Deployer`] to deploy plain
//! and upgradeable contracts against it. [`script::deploy_exchange`] wires a
//! complete exchange.
//!
//! Liquidity pools are upgraded through their governors:
//! [`upgrade::UpgradeOrchestrator`] registers versions, proposes and
//! executes upgrades, and keeps records in sync with the proxies.
//!
//! [`inspect`] compares records with the chain and reads back proxy slots,
//! role members and event-derived state without writing anything.
//!
//! # Features
//!
//! | Feature | Default | Description |
//! | --- | --- | --- |
//! | `display` | yes | Enables [`std::fmt::Display`] implementation for inspection reports. |
//! | `testing` | yes | Enables [`testing`] module. |
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory chain modelling the exchange
//! contracts, with stand-in artifacts for all of them.
//!
//! See `./tests` for examples.

pub mod abi;
pub mod artifact;
pub mod batch;
pub mod chain;
pub mod component;
pub mod config;
pub mod deployer;
pub mod env;
pub mod error;
pub mod inspect;
pub mod record;
pub mod script;
#[cfg(feature = "testing")]
pub mod testing;
pub mod upgrade;
