//! Per-network execution environment: which record file is in use, which
//! addresses are fixed from outside, and whether records may be written.

use std::{collections::BTreeMap, path::Path, str::FromStr};

use alloy::primitives::Address;
use tracing::{info, warn};

use crate::{
    component::Component,
    error::DeployError,
    record::{DeploymentRecord, RecordStore},
};

/// Well-known chain ids and the network names their record files use.
const NETWORKS: [(u64, &str); 7] = [
    (1, "mainnet"),
    (56, "bsc"),
    (69, "optimismKovan"),
    (31337, "localhost"),
    (42161, "arb1"),
    (43114, "avalanche"),
    (421611, "arbRinkeby"),
];

/// Network name of a chain id, `chain-<id>` for chains without one.
pub fn network_name(chain_id: u64) -> String {
    NETWORKS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, name)| (*name).to_owned())
        .unwrap_or_else(|| format!("chain-{chain_id}"))
}

/// Whether the environment may write deployment records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Records are loaded and every change is persisted immediately.
    Restorable,
    /// Records are loaded and never written.
    ReadOnly,
}

/// Addresses fixed from outside, keyed by component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides(BTreeMap<Component, Address>);

impl Overrides {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, component: Component, address: Address) -> Self {
        self.0.insert(component, address);
        self
    }

    /// Validates raw `name -> address` pairs. Unknown names and malformed
    /// addresses are rejected.
    pub fn parse<'a>(raw: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, DeployError> {
        let mut overrides = Self::new();
        for (name, address) in raw {
            let component = Component::from_str(name)?;
            let address = Address::from_str(address)
                .map_err(|err| DeployError::Config(format!("override {name}={address}: {err}")))?;
            overrides.0.insert(component, address);
        }
        Ok(overrides)
    }

    pub fn get(&self, component: Component) -> Option<Address> { self.0.get(&component).copied() }

    pub fn iter(&self) -> impl Iterator<Item = (Component, Address)> + '_ {
        self.0.iter().map(|(c, a)| (*c, *a))
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Record store of one network together with its overrides and mode.
#[derive(Clone, Debug)]
pub struct Environment {
    network: String,
    mode: Mode,
    store: RecordStore,
    overrides: Overrides,
}

impl Environment {
    /// Loads the records of `network` from `dir` and applies `overrides`:
    /// every overridden component gets a preset record at the overriding
    /// address, replacing a record that points elsewhere. Read-only
    /// environments apply presets in memory only.
    pub fn resolve(
        network: &str,
        dir: impl AsRef<Path>,
        overrides: Overrides,
        mode: Mode,
    ) -> Result<Self, DeployError> {
        let mut store = RecordStore::open(dir, network)?;
        let mut changed = false;
        for (component, address) in overrides.iter() {
            match store.find(component.name()) {
                Some(record) if record.address == address => continue,
                Some(record) => warn!(
                    %component,
                    recorded = %record.address,
                    overridden = %address,
                    "override differs from the deployment record, replacing the record"
                ),
                None => (),
            }
            store.upsert(DeploymentRecord::preset(component.name(), address));
            changed = true;
        }
        if changed && mode == Mode::Restorable {
            store.save()?;
        }
        info!(network, ?mode, records = store.len(), path = %store.path().display(), "environment resolved");
        Ok(Self { network: network.to_owned(), mode, store, overrides })
    }

    pub fn restorable(network: &str, dir: impl AsRef<Path>, overrides: Overrides) -> Result<Self, DeployError> {
        Self::resolve(network, dir, overrides, Mode::Restorable)
    }

    pub fn read_only(network: &str, dir: impl AsRef<Path>) -> Result<Self, DeployError> {
        Self::resolve(network, dir, Overrides::new(), Mode::ReadOnly)
    }

    pub fn network(&self) -> &str { &self.network }

    pub fn mode(&self) -> Mode { self.mode }

    pub fn store(&self) -> &RecordStore { &self.store }

    pub fn overrides(&self) -> &Overrides { &self.overrides }

    pub fn override_for(&self, component: Component) -> Option<Address> { self.overrides.get(component) }

    /// Address `component` resolves to: the override if any, else its record.
    pub fn address_of(&self, component: Component) -> Result<Address, DeployError> {
        match self.override_for(component) {
            Some(address) => Ok(address),
            None => Ok(self.store.get(component.name())?.address),
        }
    }

    pub fn ensure_writable(&self) -> Result<(), DeployError> {
        match self.mode {
            Mode::Restorable => Ok(()),
            Mode::ReadOnly => Err(DeployError::ReadOnly(self.network.clone())),
        }
    }

    /// Inserts or replaces `record` and persists the store.
    pub fn record(&mut self, record: DeploymentRecord) -> Result<(), DeployError> {
        self.ensure_writable()?;
        self.store.upsert(record);
        self.store.save()
    }

    /// Points the record of `proxy` at `implementation` and persists the
    /// store. Returns the updated record name.
    pub fn record_implementation(
        &mut self,
        proxy: Address,
        implementation: Address,
    ) -> Result<Option<String>, DeployError> {
        self.ensure_writable()?;
        let updated = self.store.set_implementation(proxy, implementation);
        if updated.is_some() {
            self.store.save()?;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;
    use crate::record::RecordKind;

    const BUSD: Address = address!("0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56");

    #[test]
    fn known_and_unknown_networks() {
        assert_eq!(network_name(56), "bsc");
        assert_eq!(network_name(421611), "arbRinkeby");
        assert_eq!(network_name(31337), "localhost");
        assert_eq!(network_name(777), "chain-777");
    }

    #[test]
    fn malformed_override_is_a_config_error() {
        assert!(matches!(Overrides::parse([("BUSD", "0x1234")]), Err(DeployError::Config(_))));
        assert!(matches!(
            Overrides::parse([("Dai", "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56")]),
            Err(DeployError::Config(_))
        ));
        let overrides = Overrides::parse([("BUSD", "0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56")]).unwrap();
        assert_eq!(overrides.get(Component::Busd), Some(BUSD));
    }

    #[test]
    fn overrides_become_persisted_presets() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::restorable("bsc", dir.path(), Overrides::new().with(Component::Busd, BUSD)).unwrap();
        assert_eq!(env.address_of(Component::Busd).unwrap(), BUSD);

        let reloaded = RecordStore::open(dir.path(), "bsc").unwrap();
        let record = reloaded.get("BUSD").unwrap();
        assert_eq!(record.kind, RecordKind::Preset);
        assert_eq!(record.address, BUSD);
    }

    #[test]
    fn conflicting_override_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let recorded = address!("0x00000000000000000000000000000000000000aa");
        let overridden = address!("0x00000000000000000000000000000000000000bb");
        let mut store = RecordStore::open(dir.path(), "bsc").unwrap();
        store.upsert(DeploymentRecord::plain("PoolCreator", recorded, 7));
        store.save().unwrap();
        let overrides = Overrides::new().with(Component::PoolCreator, overridden);

        let env = Environment::resolve("bsc", dir.path(), overrides.clone(), Mode::ReadOnly).unwrap();
        assert_eq!(env.address_of(Component::PoolCreator).unwrap(), overridden);
        assert_eq!(env.store().get("PoolCreator").unwrap().address, overridden);
        assert_eq!(env.store().find_by_address(recorded), None);
        let on_disk = RecordStore::open(dir.path(), "bsc").unwrap();
        assert_eq!(on_disk.get("PoolCreator").unwrap().address, recorded);

        let env = Environment::restorable("bsc", dir.path(), overrides).unwrap();
        let record = env.store().get("PoolCreator").unwrap().clone();
        assert_eq!(record, DeploymentRecord::preset("PoolCreator", overridden));
        let on_disk = RecordStore::open(dir.path(), "bsc").unwrap();
        assert_eq!(on_disk.get("PoolCreator").unwrap(), &record);
    }

    #[test]
    fn read_only_environment_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut env =
            Environment::resolve("bsc", dir.path(), Overrides::new().with(Component::Busd, BUSD), Mode::ReadOnly)
                .unwrap();
        assert_eq!(env.store().get("BUSD").unwrap().address, BUSD);
        assert!(!RecordStore::path_for(dir.path(), "bsc").exists());

        let err = env.record(DeploymentRecord::plain("Broker", BUSD, 1)).unwrap_err();
        assert!(matches!(err, DeployError::ReadOnly(n) if n == "bsc"));
        assert!(matches!(env.address_of(Component::Broker), Err(DeployError::NotDeployed(_))));
    }
}
