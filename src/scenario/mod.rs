//! Scenario runner
//!
//! A scenario is an ordered list of chain actions, each followed by checks
//! on the action's JSON output. Steps run strictly in order. A failed check
//! is recorded and the run continues; a step that errors makes every step
//! depending on it skip.

pub mod assertions;
pub mod open_position;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn, Instrument};

use crate::deploy::Deployment;
use crate::errors::{HarnessError, Result};
use crate::executor::TxExecutor;
use crate::messages::refs::{resolve, Resolver};
use crate::observability::{CorrelationId, RunContext};
use crate::types::{Coin, ContractId};

pub use assertions::{approx_equal, approx_equal_json, parse_integer, AssertionFailure};
pub use open_position::{open_position_scenario, TradeParams};

/// Name of the wallet used when a step names none
pub const DEFAULT_WALLET: &str = "owner";

/// One chain interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    Execute {
        contract: ContractId,
        msg: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        funds: Vec<Coin>,
    },
    Query {
        contract: ContractId,
        msg: Value,
    },
    /// Bank send; `to` is an address or a placeholder
    Transfer { to: Value, amount: Vec<Coin> },
    /// Native balance; output is `{"denom", "amount"}`
    Balance { address: Value, denom: String },
    /// Wait for `blocks` more blocks; output is `{"height", "time"}`
    WaitBlocks { blocks: u64 },
}

/// Expected value at a JSON pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    Approx { value: i128, tolerance: i128 },
    Exact(Value),
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    /// RFC 6901 pointer into the action output; empty for the whole output
    pub pointer: String,
    pub expect: Expect,
}

impl Check {
    pub fn approx(pointer: &str, value: i128, tolerance: i128) -> Self {
        Self {
            pointer: pointer.to_string(),
            expect: Expect::Approx { value, tolerance },
        }
    }

    pub fn exact(pointer: &str, value: Value) -> Self {
        Self {
            pointer: pointer.to_string(),
            expect: Expect::Exact(value),
        }
    }

    pub fn absent(pointer: &str) -> Self {
        Self {
            pointer: pointer.to_string(),
            expect: Expect::Absent,
        }
    }

    fn evaluate(&self, output: &Value) -> std::result::Result<(), AssertionFailure> {
        let found = output.pointer(&self.pointer);
        let result = match (&self.expect, found) {
            (Expect::Absent, None) => Ok(()),
            (Expect::Absent, Some(v)) => Err(AssertionFailure::new("", "absent", v)),
            (_, None) => Err(AssertionFailure::new("", self.expected_text(), "missing")),
            (Expect::Approx { value, tolerance }, Some(v)) => approx_equal_json(v, *value, *tolerance),
            (Expect::Exact(expected), Some(v)) if values_equal(v, expected) => Ok(()),
            (Expect::Exact(expected), Some(v)) => Err(AssertionFailure::new("", expected, v)),
        };
        result.map_err(|f| f.with_context(self.pointer.clone()))
    }

    fn expected_text(&self) -> String {
        match &self.expect {
            Expect::Approx { value, .. } => value.to_string(),
            Expect::Exact(v) => v.to_string(),
            Expect::Absent => "absent".to_string(),
        }
    }
}

/// Numbers and numeric strings compare by value; everything else structurally
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (parse_integer(actual), parse_integer(expected)) {
        (Some(a), Some(b)) if actual.is_number() != expected.is_number() => a == b,
        _ => actual == expected,
    }
}

/// Capture a value from the output for later steps (`{"$var": name}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub pointer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub label: String,
    /// Acting wallet; defaults to `owner`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    pub action: Action,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub bind: Vec<Binding>,
    /// Indices of earlier steps whose side effects this step needs
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Pass only if the chain rejects the transaction
    #[serde(default)]
    pub expect_failure: bool,
}

impl ScenarioStep {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            wallet: None,
            action,
            checks: Vec::new(),
            bind: Vec::new(),
            depends_on: Vec::new(),
            expect_failure: false,
        }
    }

    pub fn wallet(mut self, name: &str) -> Self {
        self.wallet = Some(name.to_string());
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn bind(mut self, name: &str, pointer: &str) -> Self {
        self.bind.push(Binding {
            name: name.to_string(),
            pointer: pointer.to_string(),
        });
        self
    }

    pub fn depends_on(mut self, step: usize) -> Self {
        self.depends_on.push(step);
        self
    }

    pub fn expect_failure(mut self) -> Self {
        self.expect_failure = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Load a scenario from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| HarnessError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| HarnessError::Config(format!("invalid scenario {}: {}", path.display(), e)))
    }
}

/// Outcome of one scenario step
#[derive(Debug, Clone)]
pub enum StepStatus {
    Passed,
    Failed(Vec<AssertionFailure>),
    Errored(HarnessError),
    /// A step this one depends on errored or was skipped
    Skipped { dependency: usize },
}

impl StepStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, StepStatus::Passed)
    }

    /// Whether dependents must be skipped
    fn blocks_dependents(&self) -> bool {
        matches!(self, StepStatus::Errored(_) | StepStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    pub output: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub run_id: CorrelationId,
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_passed())
    }

    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_passed()).count()
    }

    pub fn step(&self, label: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.label == label)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario '{}': {}/{} steps passed",
            self.name,
            self.passed(),
            self.steps.len()
        )?;
        for step in &self.steps {
            match &step.status {
                StepStatus::Passed => writeln!(f, "  [{}] {}: passed", step.index, step.label)?,
                StepStatus::Failed(failures) => {
                    writeln!(f, "  [{}] {}: FAILED", step.index, step.label)?;
                    for failure in failures {
                        writeln!(f, "      {}", failure)?;
                    }
                }
                StepStatus::Errored(err) => {
                    writeln!(f, "  [{}] {}: ERROR {}", step.index, step.label, err)?
                }
                StepStatus::Skipped { dependency } => writeln!(
                    f,
                    "  [{}] {}: skipped (step {} did not complete)",
                    step.index, step.label, dependency
                )?,
            }
        }
        Ok(())
    }
}

/// Placeholder values visible to a running scenario
struct ScenarioScope<'a> {
    deployment: &'a Deployment,
    wallets: &'a BTreeMap<String, TxExecutor>,
    vars: &'a HashMap<String, Value>,
}

impl Resolver for ScenarioScope<'_> {
    fn contract(&self, id: &str) -> Option<String> {
        self.deployment.address(id).map(str::to_string)
    }

    fn wallet(&self, name: &str) -> Option<String> {
        self.wallets.get(name).map(|w| w.address().to_string())
    }

    fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }
}

/// Runs scenarios against an existing deployment
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    wallets: BTreeMap<String, TxExecutor>,
    deployment: Deployment,
}

impl ScenarioRunner {
    /// `owner` becomes the default wallet
    pub fn new(owner: TxExecutor, deployment: Deployment) -> Self {
        let mut wallets = BTreeMap::new();
        wallets.insert(DEFAULT_WALLET.to_string(), owner);
        Self { wallets, deployment }
    }

    pub fn with_wallet(mut self, name: impl Into<String>, executor: TxExecutor) -> Self {
        self.wallets.insert(name.into(), executor);
        self
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let network = self
            .wallets
            .get(DEFAULT_WALLET)
            .map(|w| w.network().to_string())
            .unwrap_or_default();
        let ctx = RunContext::new("scenario", &network);
        let span = ctx.span();
        self.execute(scenario, ctx).instrument(span).await
    }

    async fn execute(&self, scenario: &Scenario, ctx: RunContext) -> ScenarioReport {
        info!(scenario = %scenario.name, steps = scenario.steps.len(), "Running scenario");

        let mut vars: HashMap<String, Value> = HashMap::new();
        let mut reports: Vec<StepReport> = Vec::with_capacity(scenario.steps.len());

        for (index, step) in scenario.steps.iter().enumerate() {
            let blocked = step
                .depends_on
                .iter()
                .copied()
                .find(|dep| reports.get(*dep).map_or(false, |r| r.status.blocks_dependents()));

            let (status, output) = if let Some(dependency) = blocked {
                warn!(step = index, label = %step.label, dependency, "Skipping step");
                (StepStatus::Skipped { dependency }, None)
            } else if let Some(dep) = step.depends_on.iter().copied().find(|d| *d >= index) {
                let err = HarnessError::Sequencing {
                    step: index,
                    reason: format!("'{}' depends on later step {}", step.label, dep),
                };
                (StepStatus::Errored(err), None)
            } else {
                self.run_step(index, step, &mut vars).await
            };

            match &status {
                StepStatus::Passed => info!(step = index, label = %step.label, "Step passed"),
                StepStatus::Failed(failures) => {
                    warn!(step = index, label = %step.label, failures = failures.len(), "Step failed")
                }
                StepStatus::Errored(err) => {
                    error!(step = index, label = %step.label, error = %err, "Step errored")
                }
                StepStatus::Skipped { .. } => {}
            }

            reports.push(StepReport {
                index,
                label: step.label.clone(),
                status,
                output,
            });
        }

        let report = ScenarioReport {
            name: scenario.name.clone(),
            run_id: ctx.run_id.clone(),
            steps: reports,
        };
        info!(
            scenario = %scenario.name,
            passed = report.passed(),
            total = report.steps.len(),
            elapsed_ms = ctx.elapsed_ms(),
            "Scenario finished"
        );
        report
    }

    async fn run_step(
        &self,
        index: usize,
        step: &ScenarioStep,
        vars: &mut HashMap<String, Value>,
    ) -> (StepStatus, Option<Value>) {
        let outcome = self.perform(index, step, vars).await;

        let output = match (outcome, step.expect_failure) {
            (Ok(output), false) => output,
            (Ok(output), true) => {
                let failure = AssertionFailure::new("chain result", "rejection", "success");
                return (StepStatus::Failed(vec![failure]), Some(output));
            }
            (Err(HarnessError::Chain { code, codespace, raw_log }), true) if !raw_log.is_empty() => {
                json!({ "code": code, "codespace": codespace, "raw_log": raw_log })
            }
            (Err(err), _) => return (StepStatus::Errored(err), None),
        };

        let mut failures: Vec<AssertionFailure> = step
            .checks
            .iter()
            .filter_map(|check| check.evaluate(&output).err())
            .collect();

        for binding in &step.bind {
            match output.pointer(&binding.pointer) {
                Some(value) => {
                    vars.insert(binding.name.clone(), value.clone());
                }
                None => failures.push(AssertionFailure::new(
                    binding.pointer.clone(),
                    format!("value to bind as '{}'", binding.name),
                    "missing",
                )),
            }
        }

        let status = if failures.is_empty() {
            StepStatus::Passed
        } else {
            StepStatus::Failed(failures)
        };
        (status, Some(output))
    }

    async fn perform(&self, index: usize, step: &ScenarioStep, vars: &HashMap<String, Value>) -> Result<Value> {
        let wallet_name = step.wallet.as_deref().unwrap_or(DEFAULT_WALLET);
        let executor = self
            .wallets
            .get(wallet_name)
            .ok_or_else(|| HarnessError::Config(format!("unknown wallet '{}'", wallet_name)))?;

        let scope = ScenarioScope {
            deployment: &self.deployment,
            wallets: &self.wallets,
            vars,
        };
        let resolve_in = |value: &Value| {
            resolve(value, &scope).map_err(|p| HarnessError::Sequencing {
                step: index,
                reason: format!("'{}' has unresolved placeholder {}", step.label, p),
            })
        };

        match &step.action {
            Action::Execute { contract, msg, funds } => {
                let address = self.deployment.require_address(contract.as_str())?;
                let msg = resolve_in(msg)?;
                let result = executor.execute(address, &msg, funds.clone()).await?;
                to_output(&result)
            }
            Action::Query { contract, msg } => {
                let address = self.deployment.require_address(contract.as_str())?;
                let msg = resolve_in(msg)?;
                executor.query(address, &msg).await
            }
            Action::Transfer { to, amount } => {
                let to = address_value(resolve_in(to)?, index)?;
                let result = executor.transfer(&to, amount.clone()).await?;
                to_output(&result)
            }
            Action::Balance { address, denom } => {
                let address = address_value(resolve_in(address)?, index)?;
                let amount = executor.balance(&address, denom).await?;
                Ok(json!({ "denom": denom, "amount": amount.to_string() }))
            }
            Action::WaitBlocks { blocks } => {
                let block = executor.wait_blocks(*blocks).await?;
                to_output(&block)
            }
        }
    }
}

fn to_output<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| HarnessError::Config(e.to_string()))
}

fn address_value(value: Value, step: usize) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(HarnessError::Sequencing {
            step,
            reason: format!("expected an address, got {}", other),
        }),
    }
}
