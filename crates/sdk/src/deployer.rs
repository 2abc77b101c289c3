//! Idempotent contract deployment against a network's record store.
//!
//! [`Deployer::deploy_or_skip`] is the building block of every deployment
//! script: contracts already recorded (or overridden) are reused, everything
//! else is deployed and recorded as soon as its transaction is mined. A
//! script interrupted at any point resumes from where it stopped.

use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolValue,
};
use tracing::{info, warn};

use crate::{
    abi::IProxyAdmin,
    artifact::ArtifactStore,
    chain::{ADMIN_SLOT, BEACON_SLOT, ChainClient, ChainClientExt, IMPLEMENTATION_SLOT},
    component::{Component, Plain, Upgradeable},
    env::Environment,
    error::{ChainError, DeployError},
    record::{DeploymentRecord, RecordKind},
};

/// Artifact of the proxy upgradeable components are deployed behind.
pub const PROXY_ARTIFACT: &str = "TransparentUpgradeableProxy";

/// What to do with a plain record whose address has no code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodeCheck {
    /// Check the code and redeploy over a record pointing at an empty
    /// account, e.g. after a local node restart.
    #[default]
    Verify,
    /// Reuse records without touching the chain.
    TrustRecord,
}

/// A component bound to its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContractHandle {
    component: Component,
    address: Address,
}

impl ContractHandle {
    pub fn new(component: Component, address: Address) -> Self { Self { component, address } }

    pub fn component(&self) -> Component { self.component }

    pub fn address(&self) -> Address { self.address }
}

pub struct Deployer<C> {
    env: Environment,
    artifacts: ArtifactStore,
    client: C,
    code_check: CodeCheck,
}

impl<C: ChainClient> Deployer<C> {
    pub fn new(env: Environment, artifacts: ArtifactStore, client: C) -> Self {
        Self { env, artifacts, client, code_check: CodeCheck::default() }
    }

    pub fn with_code_check(mut self, code_check: CodeCheck) -> Self {
        self.code_check = code_check;
        self
    }

    pub fn env(&self) -> &Environment { &self.env }

    pub fn client(&self) -> &C { &self.client }

    pub fn artifacts(&self) -> &ArtifactStore { &self.artifacts }

    /// Returns the recorded or overridden contract, deploying and recording
    /// it first when there is none.
    pub async fn deploy_or_skip(&mut self, contract: Plain) -> Result<ContractHandle, DeployError> {
        if let Some(handle) = self.existing(contract.component()).await? {
            return Ok(handle);
        }
        self.deploy_libraries(contract.component()).await?;
        self.deploy_linked(contract).await
    }

    /// Deploys a new instance regardless of existing records and records it,
    /// replacing the previous record of the same name.
    pub async fn deploy(&mut self, contract: Plain) -> Result<ContractHandle, DeployError> {
        self.deploy_libraries(contract.component()).await?;
        self.deploy_linked(contract).await
    }

    /// Deploys the logic contract of `contract` and a transparent proxy in
    /// front of it administered by `admin`, unless it is already recorded.
    /// The proxy is not initialized.
    pub async fn deploy_as_upgradeable(
        &mut self,
        contract: Upgradeable,
        admin: Address,
    ) -> Result<ContractHandle, DeployError> {
        let component = contract.component();
        if let Some(address) = self.env.override_for(component) {
            info!(%component, %address, "using override");
            return Ok(ContractHandle::new(component, address));
        }
        if let Some(record) = self.env.store().find(component.name()) {
            if record.kind != RecordKind::Upgradeable {
                warn!(%component, kind = ?record.kind, "recorded without a proxy, reusing as is");
            }
            info!(%component, address = %record.address, "already deployed, skipping");
            return Ok(ContractHandle::new(component, record.address));
        }
        self.env.ensure_writable()?;

        self.deploy_libraries(component).await?;
        let logic_code = self.creation_code(component.name())?;
        let logic = self.client.deploy(logic_code).await?;
        info!(%component, address = %logic.value, tx = %logic.tx_hash, "logic deployed");

        let mut proxy_code = self.creation_code(PROXY_ARTIFACT)?.to_vec();
        proxy_code.extend_from_slice(&(logic.value, admin, Bytes::new()).abi_encode_params());
        let proxy = self.client.deploy(proxy_code.into()).await?;

        let implementation = self.client.slot_address(proxy.value, IMPLEMENTATION_SLOT).await?;
        if implementation != logic.value {
            return Err(ChainError::Inconsistent(format!(
                "{component} proxy {} points at {implementation}, deployed {}",
                proxy.value, logic.value
            ))
            .into());
        }
        info!(%component, proxy = %proxy.value, %admin, implementation = %logic.value, "upgradeable deployed");
        self.env.record(DeploymentRecord::upgradeable(
            component.name(),
            proxy.value,
            admin,
            logic.value,
            proxy.block,
        ))?;
        Ok(ContractHandle::new(component, proxy.value))
    }

    /// Address of a recorded or overridden component.
    pub fn address_of(&self, component: Component) -> Result<Address, DeployError> {
        self.env.address_of(component)
    }

    pub fn get_deployed_contract(&self, component: Component) -> Result<ContractHandle, DeployError> {
        Ok(ContractHandle::new(component, self.address_of(component)?))
    }

    /// Handle of `component` at an arbitrary address, recorded or not.
    pub fn get_contract_at(&self, component: Component, address: Address) -> ContractHandle {
        ContractHandle::new(component, address)
    }

    pub async fn get_implementation(&self, proxy: Address) -> Result<Address, DeployError> {
        Ok(self.client.slot_address(proxy, IMPLEMENTATION_SLOT).await?)
    }

    pub async fn get_admin_of_upgradable_contract(&self, proxy: Address) -> Result<Address, DeployError> {
        Ok(self.client.slot_address(proxy, ADMIN_SLOT).await?)
    }

    pub async fn get_beacon(&self, proxy: Address) -> Result<Address, DeployError> {
        Ok(self.client.slot_address(proxy, BEACON_SLOT).await?)
    }

    /// Records that `proxy` now delegates to `implementation`.
    pub fn record_upgrade(&mut self, proxy: Address, implementation: Address) -> Result<Option<String>, DeployError> {
        let updated = self.env.record_implementation(proxy, implementation)?;
        match &updated {
            Some(name) => info!(name, %proxy, %implementation, "implementation recorded"),
            None => info!(%proxy, %implementation, "proxy not recorded, nothing to update"),
        }
        Ok(updated)
    }

    /// Upgrades a recorded upgradeable component through its proxy admin,
    /// optionally calling `data` on the new implementation, and records the
    /// new implementation once the proxy reports it.
    pub async fn upgrade_as_upgradeable(
        &mut self,
        contract: Upgradeable,
        implementation: Address,
        data: Bytes,
    ) -> Result<(), DeployError> {
        self.env.ensure_writable()?;
        let component = contract.component();
        let record = self.env.store().get(component.name())?.clone();
        let admin = record
            .admin()
            .ok_or_else(|| DeployError::Config(format!("{component} is not recorded as upgradeable")))?;
        let proxy = record.address;
        let confirmed = if data.is_empty() {
            self.client.transact(admin, IProxyAdmin::upgradeCall { proxy, implementation }).await?
        } else {
            self.client.transact(admin, IProxyAdmin::upgradeAndCallCall { proxy, implementation, data }).await?
        };
        info!(%component, %proxy, %implementation, tx = %confirmed.tx_hash, "proxy upgraded");

        let actual = self.get_implementation(proxy).await?;
        if actual != implementation {
            return Err(ChainError::Inconsistent(format!(
                "{component} proxy {proxy} points at {actual} after upgrade to {implementation}"
            ))
            .into());
        }
        self.record_upgrade(proxy, implementation)?;
        Ok(())
    }

    /// Reusable instance of `component`: its override, else its record
    /// unless the code check finds the recorded address empty.
    async fn existing(&self, component: Component) -> Result<Option<ContractHandle>, DeployError> {
        if let Some(address) = self.env.override_for(component) {
            info!(%component, %address, "using override");
            return Ok(Some(ContractHandle::new(component, address)));
        }
        let Some(record) = self.env.store().find(component.name()) else {
            return Ok(None);
        };
        if !self.is_live(record).await? {
            warn!(%component, address = %record.address, "recorded address has no code, redeploying");
            return Ok(None);
        }
        info!(%component, address = %record.address, "already deployed, skipping");
        Ok(Some(ContractHandle::new(component, record.address)))
    }

    async fn deploy_libraries(&mut self, component: Component) -> Result<(), DeployError> {
        for library in self.artifacts.link_order(component.name())? {
            let library = Plain::library(&library)?;
            if self.existing(library.component()).await?.is_none() {
                self.deploy_linked(library).await?;
            }
        }
        Ok(())
    }

    /// Deploys `contract` assuming every library it links is available.
    async fn deploy_linked(&mut self, contract: Plain) -> Result<ContractHandle, DeployError> {
        self.env.ensure_writable()?;
        let component = contract.component();
        let mut code = self.creation_code(component.name())?.to_vec();
        code.extend_from_slice(&contract.constructor_args());
        let deployed = self.client.deploy(code.into()).await?;
        info!(%component, address = %deployed.value, block = deployed.block, tx = %deployed.tx_hash, "deployed");
        self.env.record(DeploymentRecord::plain(component.name(), deployed.value, deployed.block))?;
        Ok(ContractHandle::new(component, deployed.value))
    }

    async fn is_live(&self, record: &DeploymentRecord) -> Result<bool, DeployError> {
        if record.kind != RecordKind::Plain || self.code_check == CodeCheck::TrustRecord {
            return Ok(true);
        }
        Ok(!self.client.code_at(record.address).await?.is_empty())
    }

    fn creation_code(&self, name: &str) -> Result<Bytes, DeployError> {
        self.artifacts.get(name)?.creation_code(|library| self.env.address_of(library.parse()?))
    }
}
