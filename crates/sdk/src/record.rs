//! Persistent per-network registry of deployed contracts.
//!
//! One JSON document per network, `<dir>/<network>.deployment.json`, mapping
//! a record name to its [`DeploymentRecord`]. The document is what operators
//! read and what previous runs resume from, so the field names and the
//! `plain` / `upgradeable` / `preset` kinds are kept stable.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DeployError;

/// How a record came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Deployed directly.
    Plain,
    /// Proxy in front of a separately deployed logic contract.
    Upgradeable,
    /// Address supplied from outside, never deployed nor redeployed.
    Preset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(with = "checksummed")]
    pub admin: Address,
    #[serde(with = "checksummed")]
    pub implementation: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub name: String,
    #[serde(with = "checksummed")]
    pub address: Address,
    /// Present for upgradeable records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Dependencies>,
    /// Block of the creation transaction; unknown for presets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<u64>,
}

impl DeploymentRecord {
    pub fn plain(name: impl Into<String>, address: Address, deployed_at: u64) -> Self {
        Self {
            kind: RecordKind::Plain,
            name: name.into(),
            address,
            dependencies: None,
            deployed_at: Some(deployed_at),
        }
    }

    pub fn upgradeable(
        name: impl Into<String>,
        proxy: Address,
        admin: Address,
        implementation: Address,
        deployed_at: u64,
    ) -> Self {
        Self {
            kind: RecordKind::Upgradeable,
            name: name.into(),
            address: proxy,
            dependencies: Some(Dependencies { admin, implementation }),
            deployed_at: Some(deployed_at),
        }
    }

    pub fn preset(name: impl Into<String>, address: Address) -> Self {
        Self { kind: RecordKind::Preset, name: name.into(), address, dependencies: None, deployed_at: None }
    }

    pub fn implementation(&self) -> Option<Address> { self.dependencies.map(|d| d.implementation) }

    pub fn admin(&self) -> Option<Address> { self.dependencies.map(|d| d.admin) }
}

/// Records of one network, backed by a JSON file.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: BTreeMap<String, DeploymentRecord>,
}

impl RecordStore {
    pub fn path_for(dir: impl AsRef<Path>, network: &str) -> PathBuf {
        dir.as_ref().join(format!("{network}.deployment.json"))
    }

    /// Loads the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| DeployError::store(&path, err))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no deployment records yet");
                BTreeMap::new()
            },
            Err(err) => return Err(DeployError::store(&path, err)),
        };
        Ok(Self { path, records })
    }

    pub fn open(dir: impl AsRef<Path>, network: &str) -> Result<Self, DeployError> {
        Self::load(Self::path_for(dir, network))
    }

    /// Writes the whole store, replacing the previous file atomically so a
    /// reader never observes a partially written document.
    pub fn save(&self) -> Result<(), DeployError> {
        let err = |e: std::io::Error| DeployError::store(&self.path, e);
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(err)?;
        }
        let json = serde_json::to_string_pretty(&self.records).map_err(|e| DeployError::store(&self.path, e))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(err)?;
        file.write_all(json.as_bytes()).map_err(err)?;
        file.write_all(b"\n").map_err(err)?;
        file.sync_all().map_err(err)?;
        fs::rename(&tmp, &self.path).map_err(err)?;
        info!(path = %self.path.display(), records = self.records.len(), "deployment records saved");
        Ok(())
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn get(&self, name: &str) -> Result<&DeploymentRecord, DeployError> {
        self.records.get(name).ok_or_else(|| DeployError::NotDeployed(name.to_owned()))
    }

    pub fn find(&self, name: &str) -> Option<&DeploymentRecord> { self.records.get(name) }

    pub fn find_by_address(&self, address: Address) -> Option<&DeploymentRecord> {
        self.records.values().find(|r| r.address == address)
    }

    pub fn upsert(&mut self, record: DeploymentRecord) -> Option<DeploymentRecord> {
        self.records.insert(record.name.clone(), record)
    }

    /// Points the upgradeable record of `proxy` at `implementation`. Returns
    /// the record name, `None` when `proxy` is not recorded as upgradeable.
    pub fn set_implementation(&mut self, proxy: Address, implementation: Address) -> Option<String> {
        let record = self
            .records
            .values_mut()
            .find(|r| r.address == proxy && r.kind == RecordKind::Upgradeable)?;
        if let Some(deps) = record.dependencies.as_mut() {
            deps.implementation = implementation;
        }
        Some(record.name.clone())
    }

    pub fn records(&self) -> impl Iterator<Item = &DeploymentRecord> { self.records.values() }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// Lowest creation block among records, the natural start of log scans.
    pub fn earliest_block(&self) -> Option<u64> { self.records.values().filter_map(|r| r.deployed_at).min() }
}

/// Addresses are stored EIP-55 checksummed, the way they are usually pasted
/// into these files by hand.
mod checksummed {
    use std::str::FromStr;

    use alloy::primitives::Address;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&address.to_checksum(None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_str(&raw).map_err(|err| D::Error::custom(format!("{raw}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const BSC_SAMPLE: &str = r#"{
  "Broker": {
    "type": "plain",
    "name": "Broker",
    "address": "0x01DE32c3F7F5a4bAf0dB4E5cc3d7c6Ed7AFcB6D9",
    "deployedAt": 9830345
  },
  "BUSD": {
    "type": "preset",
    "name": "BUSD",
    "address": "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56"
  },
  "SymbolService": {
    "type": "upgradeable",
    "name": "SymbolService",
    "address": "0x2842c0366dE1d4A9B3D5b8B3c1A9F3ecD1d3A4a2",
    "dependencies": {
      "admin": "0x1a3F275b9Af71d597219899151140a0049DE6EFE",
      "implementation": "0x6a2f6C6D9A1d5C9e5f1B0Cd0dD9F0e6A3fB4c1D5"
    },
    "deployedAt": 9830361
  }
}"#;

    #[test]
    fn reads_existing_network_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = RecordStore::path_for(dir.path(), "bsc");
        fs::write(&path, BSC_SAMPLE).unwrap();

        let store = RecordStore::load(&path).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("BUSD").unwrap().kind, RecordKind::Preset);
        assert_eq!(store.get("BUSD").unwrap().deployed_at, None);
        let symbol = store.get("SymbolService").unwrap();
        assert_eq!(symbol.kind, RecordKind::Upgradeable);
        assert_eq!(symbol.admin(), Some(address!("0x1a3F275b9Af71d597219899151140a0049DE6EFE")));
        assert_eq!(store.earliest_block(), Some(9830345));
        assert!(matches!(store.get("Reader"), Err(DeployError::NotDeployed(n)) if n == "Reader"));
    }

    #[test]
    fn save_keeps_field_names_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = RecordStore::path_for(dir.path(), "bsc");
        fs::write(&path, BSC_SAMPLE).unwrap();
        let store = RecordStore::load(&path).unwrap();
        store.save().unwrap();

        // Checksum casing may be normalized, structure may not change.
        let before: serde_json::Value = serde_json::from_str(&BSC_SAMPLE.to_lowercase()).unwrap();
        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap().to_lowercase()).unwrap();
        assert_eq!(before, after);
        assert_eq!(RecordStore::load(&path).unwrap().get("SymbolService").unwrap(), store.get("SymbolService").unwrap());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("nested"), "localhost").unwrap();
        assert!(store.is_empty());
        assert_eq!(store.earliest_block(), None);

        store.save().unwrap();
        assert!(dir.path().join("nested/localhost.deployment.json").exists());
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = RecordStore::path_for(dir.path(), "bsc");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RecordStore::load(&path), Err(DeployError::Store { .. })));
    }

    #[test]
    fn implementation_update_targets_upgradeable_records() {
        let proxy = address!("0x00000000000000000000000000000000000000a1");
        let admin = address!("0x00000000000000000000000000000000000000a2");
        let old = address!("0x00000000000000000000000000000000000000a3");
        let new = address!("0x00000000000000000000000000000000000000a4");
        let mut store = RecordStore::load("unused.json").unwrap();
        store.upsert(DeploymentRecord::upgradeable("PoolCreator", proxy, admin, old, 10));
        store.upsert(DeploymentRecord::plain("Broker", admin, 5));

        assert_eq!(store.set_implementation(proxy, new), Some("PoolCreator".to_owned()));
        assert_eq!(store.get("PoolCreator").unwrap().implementation(), Some(new));
        assert_eq!(store.set_implementation(admin, new), None);
    }
}
