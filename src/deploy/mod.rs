//! Deployment orchestration
//!
//! A `DeploymentPlan` is validated up front, then executed strictly in
//! order by the `Orchestrator`. Each deploy step adds an entry to the
//! `Deployment`, which later steps (and later runs) resolve `$contract`
//! placeholders against.

pub mod orchestrator;
pub mod plan;
pub mod topology;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{HarnessError, Result};
use crate::messages::refs::Resolver;
use crate::types::ContractId;

pub use orchestrator::{DeploymentReport, DeploymentRun, Orchestrator, StepRecord, StepState};
pub use plan::{DeploymentPlan, PlanStep, StepAction};
pub use topology::{standard_plan, ArtifactNames, ProtocolParams};

/// Outcome of deploying one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub code_id: u64,
    pub address: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub id: ContractId,
    #[serde(flatten)]
    pub contract: DeployedContract,
}

/// Contracts deployed on one network, in deploy order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub network: String,
    pub chain_id: String,
    pub deployer: String,
    pub deployed_at: DateTime<Utc>,
    #[serde(default)]
    pub contracts: Vec<DeploymentEntry>,
}

impl Deployment {
    pub fn new(network: impl Into<String>, chain_id: impl Into<String>, deployer: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            chain_id: chain_id.into(),
            deployer: deployer.into(),
            deployed_at: Utc::now(),
            contracts: Vec::new(),
        }
    }

    /// Record a contract; ids are unique within a deployment
    pub fn insert(&mut self, id: ContractId, contract: DeployedContract) -> Result<()> {
        if self.get(id.as_str()).is_some() {
            return Err(HarnessError::Config(format!("contract '{}' already recorded", id)));
        }
        self.contracts.push(DeploymentEntry { id, contract });
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DeployedContract> {
        self.contracts
            .iter()
            .find(|e| e.id.as_str() == id)
            .map(|e| &e.contract)
    }

    pub fn address(&self, id: &str) -> Option<&str> {
        self.get(id).map(|c| c.address.as_str())
    }

    /// Address of `id`, or a configuration error naming it
    pub fn require_address(&self, id: &str) -> Result<&str> {
        self.address(id)
            .ok_or_else(|| HarnessError::Config(format!("deployment has no contract '{}'", id)))
    }

    /// Replace the code id after a migration
    pub fn set_code_id(&mut self, id: &str, code_id: u64) -> Result<()> {
        let entry = self
            .contracts
            .iter_mut()
            .find(|e| e.id.as_str() == id)
            .ok_or_else(|| HarnessError::Config(format!("deployment has no contract '{}'", id)))?;
        entry.contract.code_id = code_id;
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContractId> {
        self.contracts.iter().map(|e| &e.id)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("failed to serialize deployment: {}", e)))?;
        std::fs::write(path, json).map_err(|e| HarnessError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| HarnessError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            HarnessError::Config(format!("invalid deployment file {}: {}", path.display(), e))
        })
    }
}

impl Resolver for Deployment {
    fn contract(&self, id: &str) -> Option<String> {
        self.address(id).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(address: &str) -> DeployedContract {
        DeployedContract {
            code_id: 1,
            address: address.to_string(),
            label: "test".to_string(),
        }
    }

    #[test]
    fn test_insert_keeps_order_and_rejects_duplicates() {
        let mut d = Deployment::new("localterra", "localterra", "terra1owner");
        d.insert(ContractId::new("vamm"), contract("terra1vamm")).unwrap();
        d.insert(ContractId::new("engine"), contract("terra1engine")).unwrap();
        assert!(d.insert(ContractId::new("vamm"), contract("terra1other")).is_err());

        let ids: Vec<&str> = d.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["vamm", "engine"]);
        assert_eq!(d.address("engine"), Some("terra1engine"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment.json");

        let mut d = Deployment::new("testnet", "bombay-12", "terra1owner");
        d.insert(ContractId::new("fee_pool"), contract("terra1pool")).unwrap();
        d.save(&path).unwrap();

        let loaded = Deployment::load(&path).unwrap();
        assert_eq!(loaded, d);

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["contracts"][0]["id"], "fee_pool");
        assert_eq!(raw["contracts"][0]["address"], "terra1pool");
    }

    #[test]
    fn test_set_code_id() {
        let mut d = Deployment::new("localterra", "localterra", "terra1owner");
        d.insert(ContractId::new("vamm"), contract("terra1vamm")).unwrap();
        d.set_code_id("vamm", 9).unwrap();
        assert_eq!(d.get("vamm").unwrap().code_id, 9);
        assert!(d.set_code_id("engine", 9).is_err());
    }
}
