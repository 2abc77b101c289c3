//! Hardhat compilation artifacts: creation code and library link references.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use alloy::primitives::{Address, Bytes, hex};
use serde::Deserialize;
use tracing::debug;

use crate::error::DeployError;

/// Byte range of a library address placeholder within the creation code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct LinkOffset {
    pub start: usize,
    pub length: usize,
}

/// Compiled contract as emitted by hardhat under `artifacts/contracts`.
#[derive(Clone, derive_more::Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    contract_name: String,
    #[debug("{} bytes", bytecode.len().saturating_sub(2) / 2)]
    bytecode: String,
    /// Source file -> library name -> placeholder offsets.
    #[serde(default)]
    link_references: BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>,
}

impl Artifact {
    pub fn new(contract_name: impl Into<String>, bytecode: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            bytecode: bytecode.into(),
            link_references: BTreeMap::new(),
        }
    }

    pub fn with_link(mut self, source: &str, library: &str, offset: LinkOffset) -> Self {
        self.link_references
            .entry(source.to_owned())
            .or_default()
            .entry(library.to_owned())
            .or_default()
            .push(offset);
        self
    }

    pub fn contract_name(&self) -> &str { &self.contract_name }

    /// Names of the libraries the creation code must be linked against.
    pub fn libraries(&self) -> BTreeSet<&str> {
        self.link_references.values().flat_map(|libs| libs.keys().map(String::as_str)).collect()
    }

    /// Creation code with every library placeholder replaced by the address
    /// `resolve` returns for it.
    pub fn creation_code(
        &self,
        mut resolve: impl FnMut(&str) -> Result<Address, DeployError>,
    ) -> Result<Bytes, DeployError> {
        let mut code = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode).as_bytes().to_vec();
        for libs in self.link_references.values() {
            for (library, offsets) in libs {
                let encoded = hex::encode(resolve(library)?);
                for offset in offsets {
                    let range = offset.start * 2..(offset.start + offset.length) * 2;
                    if offset.length != 20 || range.end > code.len() {
                        return Err(DeployError::Artifact(format!(
                            "{}: bad link reference to {library} at {}",
                            self.contract_name, offset.start
                        )));
                    }
                    code.splice(range, encoded.bytes());
                }
            }
        }
        if code.is_empty() {
            return Err(DeployError::Artifact(format!(
                "{} has no creation code (abstract contract or interface?)",
                self.contract_name
            )));
        }
        hex::decode(&code)
            .map(Bytes::from)
            .map_err(|err| DeployError::Artifact(format!("{}: {err}", self.contract_name)))
    }
}

/// Artifacts indexed by contract name.
#[derive(Clone, Debug, Default)]
pub struct ArtifactStore {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactStore {
    /// Loads every artifact under `dir`, skipping hardhat debug files.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, DeployError> {
        let mut store = Self::default();
        let mut pending = vec![dir.as_ref().to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir)
                .map_err(|err| DeployError::Artifact(format!("{}: {err}", dir.display())))?;
            for entry in entries {
                let path = entry
                    .map_err(|err| DeployError::Artifact(format!("{}: {err}", dir.display())))?
                    .path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !file_name.ends_with(".json") || file_name.ends_with(".dbg.json") {
                    continue;
                }
                let raw = fs::read_to_string(&path)
                    .map_err(|err| DeployError::Artifact(format!("{}: {err}", path.display())))?;
                let artifact: Artifact = serde_json::from_str(&raw)
                    .map_err(|err| DeployError::Artifact(format!("{}: {err}", path.display())))?;
                store.insert(artifact);
            }
        }
        debug!(dir = %dir.as_ref().display(), count = store.artifacts.len(), "artifacts loaded");
        Ok(store)
    }

    pub fn from_artifacts(artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        let mut store = Self::default();
        artifacts.into_iter().for_each(|a| store.insert(a));
        store
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.contract_name.clone(), artifact);
    }

    pub fn get(&self, name: &str) -> Result<&Artifact, DeployError> {
        self.artifacts.get(name).ok_or_else(|| DeployError::Artifact(format!("no artifact for {name}")))
    }

    /// Libraries `name` transitively links against, each listed after the
    /// libraries it links itself. `name` is not part of the result.
    pub fn link_order(&self, name: &str) -> Result<Vec<String>, DeployError> {
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        // (name, expanded)
        let mut stack = vec![(name.to_owned(), false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                visiting.remove(&current);
                done.insert(current.clone());
                if current != name {
                    order.push(current);
                }
                continue;
            }
            if done.contains(&current) {
                continue;
            }
            if !visiting.insert(current.clone()) {
                return Err(DeployError::Artifact(format!("library cycle through {current}")));
            }
            stack.push((current.clone(), true));
            for library in self.get(&current)?.libraries() {
                if !done.contains(library) {
                    if visiting.contains(library) {
                        return Err(DeployError::Artifact(format!("library cycle through {library}")));
                    }
                    stack.push((library.to_owned(), false));
                }
            }
        }
        Ok(order)
    }
}
