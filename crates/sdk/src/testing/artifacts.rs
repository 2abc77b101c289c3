//! Stand-in compilation artifacts understood by the simulated chain.
//!
//! Creation code is `"SIM\0" | len(name) | name | len(libraries) |
//! 20-byte library address per library`, followed by the constructor
//! arguments. Library slots are hardhat-style placeholders until linked.

use alloy::primitives::{Address, Bytes, hex, keccak256};

use crate::{
    artifact::{Artifact, ArtifactStore, LinkOffset},
    deployer::PROXY_ARTIFACT,
};

pub(super) const PROXY: &str = PROXY_ARTIFACT;

const MAGIC: &[u8; 4] = b"SIM\0";

/// Contracts [`artifacts`] provides, with the libraries each one links.
const CONTRACTS: [(&str, &[&str]); 19] = [
    (PROXY, &[]),
    ("ProxyAdmin", &[]),
    ("UpgradeableBeacon", &[]),
    ("BeaconProxy", &[]),
    ("Broker", &[]),
    ("OracleRouterCreator", &[]),
    ("UniswapV3OracleAdaptorCreator", &[]),
    ("UniswapV3Tool", &[]),
    ("InverseStateService", &[]),
    ("Reader", &[]),
    ("SymbolService", &[]),
    ("PoolCreator", &["PoolCreatorModule"]),
    ("PoolCreatorModule", &[]),
    ("LiquidityPool", &[]),
    ("LiquidityPoolHop1", &[]),
    ("LpGovernor", &[]),
    ("MCDEXMultiOracle", &[]),
    ("MCDEXSingleOracle", &[]),
    ("TunableOracleRegister", &[]),
];

/// Artifacts of every exchange contract for the simulated chain.
pub fn artifacts() -> ArtifactStore {
    ArtifactStore::from_artifacts(CONTRACTS.iter().map(|(name, libraries)| artifact(name, libraries)))
}

/// Artifact of `name` linking `libraries`.
pub fn artifact(name: &str, libraries: &[&str]) -> Artifact {
    let header = header(name, libraries.len());
    let mut bytecode = format!("0x{}", hex::encode(&header));
    for library in libraries {
        let hash = hex::encode(keccak256(library));
        bytecode.push_str(&format!("__${}$__", &hash[..34]));
    }
    let source = format!("contracts/{name}.sol");
    libraries.iter().enumerate().fold(Artifact::new(name, bytecode), |artifact, (i, library)| {
        artifact.with_link(&source, library, LinkOffset { start: header.len() + i * 20, length: 20 })
    })
}

fn header(name: &str, libraries: usize) -> Vec<u8> {
    let mut header = MAGIC.to_vec();
    header.push(name.len() as u8);
    header.extend_from_slice(name.as_bytes());
    header.push(libraries as u8);
    header
}

/// Code of a contract created by another contract.
pub(super) fn runtime_code(name: &str) -> Bytes { header(name, 0).into() }

/// Splits creation code into contract name, linked libraries and
/// constructor arguments.
pub(super) fn parse_init_code(code: &[u8]) -> Result<(String, Vec<Address>, &[u8]), String> {
    let malformed = || "malformed creation code".to_owned();
    let rest = code.strip_prefix(MAGIC.as_slice()).ok_or_else(malformed)?;
    let (&name_len, rest) = rest.split_first().ok_or_else(malformed)?;
    let name_len = name_len as usize;
    if rest.len() < name_len + 1 {
        return Err(malformed());
    }
    let name = std::str::from_utf8(&rest[..name_len]).map_err(|_| malformed())?.to_owned();
    let libraries = rest[name_len] as usize;
    let rest = &rest[name_len + 1..];
    if rest.len() < libraries * 20 {
        return Err(malformed());
    }
    let addresses = rest[..libraries * 20].chunks(20).map(Address::from_slice).collect();
    Ok((name, addresses, &rest[libraries * 20..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_creation_code_parses_back() {
        let library = Address::repeat_byte(0x42);
        let mut code = artifact("PoolCreator", &["PoolCreatorModule"]).creation_code(|_| Ok(library)).unwrap().to_vec();
        code.extend_from_slice(&[1, 2, 3]);

        let (name, libraries, args) = parse_init_code(&code).unwrap();
        assert_eq!(name, "PoolCreator");
        assert_eq!(libraries, vec![library]);
        assert_eq!(args, &[1, 2, 3]);
    }

    #[test]
    fn store_knows_link_order_and_rejects_foreign_code() {
        assert_eq!(artifacts().link_order("PoolCreator").unwrap(), vec!["PoolCreatorModule"]);
        assert!(parse_init_code(b"6080").is_err());
        assert!(parse_init_code(b"SIM\0\x20Reader").is_err());
    }
}
