//! Sequential plan execution

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info, Instrument};

use super::plan::{DeploymentPlan, PlanStep, StepAction};
use super::{DeployedContract, Deployment};
use crate::errors::{DeployError, HarnessError, Result};
use crate::executor::TxExecutor;
use crate::messages::refs::resolve;
use crate::observability::{CorrelationId, RunContext};

/// Lifecycle of one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub state: StepState,
    /// Last transaction of the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Summed over every transaction of the step
    pub gas_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Per-step outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub run_id: CorrelationId,
    pub steps: Vec<StepRecord>,
    #[serde(skip)]
    pub error: Option<DeployError>,
}

impl DeploymentReport {
    fn new(run_id: CorrelationId, plan: &DeploymentPlan) -> Self {
        let steps = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepRecord {
                index,
                label: step.label.clone(),
                state: StepState::Pending,
                tx_hash: None,
                gas_used: 0,
                address: None,
            })
            .collect();
        Self {
            run_id,
            steps,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn count(&self, state: StepState) -> usize {
        self.steps.iter().filter(|s| s.state == state).count()
    }

    pub fn total_gas(&self) -> u64 {
        self.steps.iter().map(|s| s.gas_used).sum()
    }
}

/// Deployment state after a run, complete or not
#[derive(Debug, Clone)]
pub struct DeploymentRun {
    pub deployment: Deployment,
    pub report: DeploymentReport,
}

impl DeploymentRun {
    /// Fail with the halting step's error, if any
    pub fn into_result(mut self) -> std::result::Result<Self, DeployError> {
        match self.report.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// What a successful step produced
struct StepOutcome {
    tx_hash: String,
    gas_used: u64,
    address: Option<String>,
}

/// Runs deployment plans one step at a time with a single signer
#[derive(Debug, Clone)]
pub struct Orchestrator {
    executor: TxExecutor,
    artifacts_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(executor: TxExecutor, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn executor(&self) -> &TxExecutor {
        &self.executor
    }

    /// Run `plan` from scratch
    pub async fn run(&self, plan: &DeploymentPlan) -> std::result::Result<DeploymentRun, DeployError> {
        let endpoint = self.executor.client().endpoint();
        let deployment = Deployment::new(
            self.executor.network(),
            endpoint.chain_id.clone(),
            self.executor.address(),
        );
        self.run_with(plan, deployment).await.into_result()
    }

    /// Run `plan` on top of an existing deployment
    ///
    /// Always returns the deployment as far as it got; a halted run carries
    /// its `DeployError` in the report.
    pub async fn run_with(&self, plan: &DeploymentPlan, deployment: Deployment) -> DeploymentRun {
        let ctx = RunContext::new("deploy", self.executor.network());
        let span = ctx.span();
        self.execute(plan, deployment, ctx).instrument(span).await
    }

    async fn execute(&self, plan: &DeploymentPlan, mut deployment: Deployment, ctx: RunContext) -> DeploymentRun {
        let mut report = DeploymentReport::new(ctx.run_id.clone(), plan);

        if let Err(err) = plan.validate(deployment.ids()) {
            let index = match &err {
                HarnessError::Sequencing { step, .. } => *step,
                _ => 0,
            };
            let label = plan.steps.get(index).map(|s| s.label.clone()).unwrap_or_default();
            error!(step = index, label = %label, error = %err, "Plan rejected before execution");
            report.error = Some(DeployError::new(index, label, err));
            return DeploymentRun { deployment, report };
        }

        info!(steps = plan.len(), existing = deployment.len(), "Starting deployment");

        for (index, step) in plan.steps.iter().enumerate() {
            report.steps[index].state = StepState::Submitted;
            info!(step = index, label = %step.label, "Submitting step");

            match self.execute_step(index, step, &mut deployment).await {
                Ok(outcome) => {
                    let record = &mut report.steps[index];
                    record.state = StepState::Confirmed;
                    record.tx_hash = Some(outcome.tx_hash);
                    record.gas_used = outcome.gas_used;
                    record.address = outcome.address;
                    info!(step = index, label = %step.label, gas_used = record.gas_used, "Step confirmed");
                }
                Err(err) => {
                    report.steps[index].state = StepState::Failed;
                    error!(
                        step = index,
                        label = %step.label,
                        error = %err,
                        raw_log = err.raw_log().unwrap_or(""),
                        "Step failed, halting plan"
                    );
                    report.error = Some(DeployError::new(index, step.label.clone(), err));
                    return DeploymentRun { deployment, report };
                }
            }
        }

        info!(
            contracts = deployment.len(),
            total_gas = report.total_gas(),
            elapsed_ms = ctx.elapsed_ms(),
            "Deployment complete"
        );
        DeploymentRun { deployment, report }
    }

    async fn execute_step(&self, index: usize, step: &PlanStep, deployment: &mut Deployment) -> Result<StepOutcome> {
        match &step.action {
            StepAction::Deploy {
                id,
                artifact,
                label,
                init,
                admin,
            } => {
                let init = resolve_payload(init, deployment, index, &step.label)?;
                let path = self.artifacts_dir.join(artifact);

                let (code_id, upload) = self.executor.upload_file(&path).await?;
                let (address, instantiate) = self
                    .executor
                    .instantiate(code_id, &init, label, admin.as_deref(), Vec::new())
                    .await?;

                deployment.insert(
                    id.clone(),
                    DeployedContract {
                        code_id,
                        address: address.clone(),
                        label: label.clone(),
                    },
                )?;

                Ok(StepOutcome {
                    tx_hash: instantiate.tx_hash,
                    gas_used: upload.gas_used + instantiate.gas_used,
                    address: Some(address),
                })
            }
            StepAction::Configure { target, msg, funds } => {
                let msg = resolve_payload(msg, deployment, index, &step.label)?;
                let contract = deployment.require_address(target.as_str())?.to_string();

                let result = self.executor.execute(&contract, &msg, funds.clone()).await?;
                Ok(StepOutcome {
                    tx_hash: result.tx_hash,
                    gas_used: result.gas_used,
                    address: None,
                })
            }
        }
    }
}

fn resolve_payload(payload: &Value, deployment: &Deployment, step: usize, label: &str) -> Result<Value> {
    resolve(payload, deployment).map_err(|p| HarnessError::Sequencing {
        step,
        reason: format!("'{}' has unresolved placeholder {}", label, p),
    })
}
