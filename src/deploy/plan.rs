//! Declarative deployment plan and its static validation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::errors::{HarnessError, Result};
use crate::messages::refs::{placeholders, RefKind};
use crate::messages::{ExecMsg, InitMsg};
use crate::types::{Coin, ContractId};

/// What one plan step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepAction {
    /// Upload `artifact` and instantiate it as `id`
    Deploy {
        id: ContractId,
        /// Bytecode file name, relative to the artifacts directory
        artifact: String,
        label: String,
        init: Value,
        /// Defaults to the deployer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin: Option<String>,
    },
    /// Execute a configuration message on an already deployed contract
    Configure {
        target: ContractId,
        msg: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        funds: Vec<Coin>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub label: String,
    pub action: StepAction,
}

impl PlanStep {
    /// Contract ids this step's payload refers to
    pub fn contract_refs(&self) -> Vec<String> {
        self.payload_refs(RefKind::Contract)
    }

    fn payload(&self) -> &Value {
        match &self.action {
            StepAction::Deploy { init, .. } => init,
            StepAction::Configure { msg, .. } => msg,
        }
    }

    fn payload_refs(&self, kind: RefKind) -> Vec<String> {
        placeholders(self.payload())
            .into_iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.name)
            .collect()
    }
}

/// Ordered list of deploy and configure steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub steps: Vec<PlanStep>,
}

impl DeploymentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy(
        mut self,
        id: impl Into<ContractId>,
        artifact: impl Into<String>,
        init: impl Into<InitMsg>,
    ) -> Result<Self> {
        let id = id.into();
        let init = init.into().to_json()?;
        self.steps.push(PlanStep {
            label: format!("deploy {}", id),
            action: StepAction::Deploy {
                label: id.to_string(),
                id,
                artifact: artifact.into(),
                init,
                admin: None,
            },
        });
        Ok(self)
    }

    pub fn configure(
        mut self,
        label: impl Into<String>,
        target: impl Into<ContractId>,
        msg: impl Into<ExecMsg>,
    ) -> Result<Self> {
        self.steps.push(PlanStep {
            label: label.into(),
            action: StepAction::Configure {
                target: target.into(),
                msg: msg.into().to_json()?,
                funds: Vec::new(),
            },
        });
        Ok(self)
    }

    pub fn push(&mut self, step: PlanStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ids deployed by this plan, in order
    pub fn deployed_ids(&self) -> Vec<&ContractId> {
        self.steps
            .iter()
            .filter_map(|s| match &s.action {
                StepAction::Deploy { id, .. } => Some(id),
                StepAction::Configure { .. } => None,
            })
            .collect()
    }

    /// Check ordering before anything touches the network
    ///
    /// `existing` lists contracts already deployed by an earlier run. Every
    /// reference must point at one of those or at a strictly earlier deploy
    /// step; ids must be unique; configure targets must exist; plans carry
    /// no wallet or variable placeholders.
    pub fn validate<'a>(&self, existing: impl IntoIterator<Item = &'a ContractId>) -> Result<()> {
        let mut known: HashSet<String> = existing.into_iter().map(|id| id.to_string()).collect();
        let planned: HashSet<String> = self.deployed_ids().iter().map(|id| id.to_string()).collect();

        for (index, step) in self.steps.iter().enumerate() {
            for placeholder in placeholders(step.payload()) {
                match placeholder.kind {
                    RefKind::Contract if known.contains(&placeholder.name) => {}
                    RefKind::Contract if planned.contains(&placeholder.name) => {
                        return Err(sequencing(
                            index,
                            format!(
                                "'{}' references contract '{}' before the step that deploys it",
                                step.label, placeholder.name
                            ),
                        ));
                    }
                    RefKind::Contract => {
                        return Err(sequencing(
                            index,
                            format!("'{}' references unknown contract '{}'", step.label, placeholder.name),
                        ));
                    }
                    RefKind::Wallet | RefKind::Var => {
                        return Err(sequencing(
                            index,
                            format!("'{}' contains unsupported placeholder {}", step.label, placeholder),
                        ));
                    }
                }
            }

            match &step.action {
                StepAction::Deploy { id, artifact, .. } => {
                    if artifact.trim().is_empty() {
                        return Err(sequencing(index, format!("'{}' has no artifact", step.label)));
                    }
                    if !known.insert(id.to_string()) {
                        return Err(sequencing(index, format!("contract id '{}' deployed twice", id)));
                    }
                }
                StepAction::Configure { target, .. } => {
                    if !known.contains(target.as_str()) {
                        return Err(sequencing(
                            index,
                            format!("'{}' targets contract '{}' before it is deployed", step.label, target),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn sequencing(step: usize, reason: String) -> HarnessError {
    HarnessError::Sequencing { step, reason }
}
