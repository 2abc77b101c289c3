//! Per-network deployment parameters, read from a JSON file.
//!
//! ```json
//! {
//!   "upgradeAdmin": "0x...",
//!   "vault": "0x...",
//!   "vaultFeeRate": "0.00015",
//!   "symbolBase": 10000,
//!   "keepers": ["0x..."],
//!   "guardians": ["0x..."],
//!   "addressOverride": { "BUSD": "0x..." },
//!   "executionDelayBlocks": 40
//! }
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use alloy::primitives::{Address, I256, utils::parse_ether};
use serde::Deserialize;

use crate::{env::Overrides, error::DeployError, upgrade::DEFAULT_EXECUTION_DELAY_BLOCKS};

fn default_symbol_base() -> u64 { 10000 }

fn default_execution_delay() -> u64 { DEFAULT_EXECUTION_DELAY_BLOCKS }

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNetworkConfig {
    upgrade_admin: String,
    vault: String,
    vault_fee_rate: String,
    #[serde(default = "default_symbol_base")]
    symbol_base: u64,
    #[serde(default)]
    keepers: Vec<String>,
    #[serde(default)]
    guardians: Vec<String>,
    #[serde(default)]
    address_override: BTreeMap<String, String>,
    #[serde(default = "default_execution_delay")]
    execution_delay_blocks: u64,
}

/// Validated network parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub upgrade_admin: Address,
    pub vault: Address,
    /// Global vault fee rate, 18 decimals fixed point.
    pub vault_fee_rate: I256,
    /// Symbols below this value are reserved.
    pub symbol_base: u64,
    pub keepers: Vec<Address>,
    pub guardians: Vec<Address>,
    pub overrides: Overrides,
    pub execution_delay_blocks: u64,
}

impl NetworkConfig {
    pub fn from_json(raw: &str) -> Result<Self, DeployError> {
        let raw: RawNetworkConfig =
            serde_json::from_str(raw).map_err(|err| DeployError::Config(format!("network config: {err}")))?;
        let vault_fee_rate = parse_ether(&raw.vault_fee_rate)
            .map_err(|err| DeployError::Config(format!("vaultFeeRate {}: {err}", raw.vault_fee_rate)))
            .and_then(|rate| {
                I256::try_from(rate)
                    .map_err(|err| DeployError::Config(format!("vaultFeeRate {}: {err}", raw.vault_fee_rate)))
            })?;
        Ok(Self {
            upgrade_admin: parse_address("upgradeAdmin", &raw.upgrade_admin)?,
            vault: parse_address("vault", &raw.vault)?,
            vault_fee_rate,
            symbol_base: raw.symbol_base,
            keepers: raw.keepers.iter().map(|k| parse_address("keepers", k)).collect::<Result<_, _>>()?,
            guardians: raw.guardians.iter().map(|g| parse_address("guardians", g)).collect::<Result<_, _>>()?,
            overrides: Overrides::parse(raw.address_override.iter().map(|(k, v)| (k.as_str(), v.as_str())))?,
            execution_delay_blocks: raw.execution_delay_blocks,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| DeployError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json(&raw)
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, DeployError> {
    raw.parse().map_err(|err| DeployError::Config(format!("{field} {raw}: {err}")))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{U256, address};

    use super::*;
    use crate::component::Component;

    #[test]
    fn parses_with_defaults() {
        let config = NetworkConfig::from_json(
            r#"{
                "upgradeAdmin": "0x1a3F275b9Af71d597219899151140a0049DE6EFE",
                "vault": "0x0000000000000000000000000000000000000011",
                "vaultFeeRate": "0.00015",
                "keepers": ["0x0000000000000000000000000000000000000022"],
                "addressOverride": { "BUSD": "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.vault_fee_rate, I256::from_raw(U256::from(150_000_000_000_000u64)));
        assert_eq!(config.symbol_base, 10000);
        assert_eq!(config.execution_delay_blocks, 40);
        assert_eq!(config.keepers, vec![address!("0x0000000000000000000000000000000000000022")]);
        assert!(config.guardians.is_empty());
        assert_eq!(
            config.overrides.get(Component::Busd),
            Some(address!("0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56"))
        );
    }

    #[test]
    fn bad_values_are_config_errors() {
        let base = |vault: &str, rate: &str| {
            format!(r#"{{"upgradeAdmin":"0x1a3F275b9Af71d597219899151140a0049DE6EFE","vault":"{vault}","vaultFeeRate":"{rate}"}}"#)
        };
        assert!(matches!(
            NetworkConfig::from_json(&base("0xnothex", "0.1")),
            Err(DeployError::Config(_))
        ));
        assert!(matches!(
            NetworkConfig::from_json(&base("0x0000000000000000000000000000000000000011", "lots")),
            Err(DeployError::Config(_))
        ));
        assert!(matches!(NetworkConfig::from_json("{}"), Err(DeployError::Config(_))));
    }
}
