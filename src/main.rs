//! perp-deployer
//!
//! Deploys the perpetual-futures contract suite to a Cosmos LCD endpoint,
//! and runs integration scenarios against a deployment.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perp_deployer::config::AppConfig;
use perp_deployer::deploy::{standard_plan, Deployment, Orchestrator, StepState};
use perp_deployer::errors::{DeployError, HarnessError};
use perp_deployer::executor::TxExecutor;
use perp_deployer::gas_log::GasLogger;
use perp_deployer::metrics::metrics;
use perp_deployer::scenario::{open_position_scenario, Scenario, ScenarioRunner, TradeParams};
use perp_deployer::{ChainClient, LcdClient};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file; built-in defaults without one
    #[arg(short, long, env = "PERP_DEPLOYER_CONFIG")]
    config: Option<PathBuf>,

    /// Network to target, overriding the config and $NETWORK
    #[arg(short, long)]
    network: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Write Prometheus metrics to this file on exit
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Memo attached to every transaction
    #[arg(long, default_value = "")]
    memo: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy and wire the full contract suite
    Deploy {
        /// Write the resulting deployment (partial on failure) as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print gas statistics of every execute
        #[arg(long)]
        gas_report: bool,
    },

    /// Run a scenario against a deployment
    Scenario {
        /// Deployment JSON written by `deploy`
        #[arg(long, required_unless_present = "deploy")]
        deployment: Option<PathBuf>,

        /// Deploy first instead of loading a deployment
        #[arg(long)]
        deploy: bool,

        /// Scenario JSON; defaults to the built-in open-position scenario
        #[arg(long)]
        scenario: Option<PathBuf>,

        /// Where to write the deployment when `--deploy` is given
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        gas_report: bool,
    },

    /// Upload new code and migrate a deployed contract
    Migrate {
        #[arg(long)]
        deployment: PathBuf,

        /// Contract id within the deployment, e.g. `engine`
        #[arg(long)]
        contract: String,

        /// Path to the new bytecode
        #[arg(long)]
        artifact: PathBuf,

        /// Migrate message as JSON
        #[arg(long, default_value = "{}")]
        msg: String,
    },

    /// Change a contract's admin
    UpdateAdmin {
        #[arg(long)]
        contract: String,

        #[arg(long)]
        new_admin: String,
    },

    /// Smart-query a contract and print the response
    Query {
        #[arg(long)]
        contract: String,

        #[arg(long)]
        msg: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_json) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let outcome = run(&cli).await;

    if let Some(path) = &cli.metrics_out {
        if let Err(e) = write_metrics(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&err);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "perp_deployer=debug,info"
    } else {
        "perp_deployer=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(network) = &cli.network {
        config.network = network.clone();
        config.validate()?;
    }
    info!(
        network = %config.network,
        version = env!("CARGO_PKG_VERSION"),
        "Starting perp-deployer"
    );

    let gas_log = GasLogger::new();
    let executor = build_executor(&config, gas_log.clone())?.with_memo(cli.memo.as_str());
    info!(address = executor.address(), "Signer loaded");

    match &cli.command {
        Command::Deploy { output, gas_report } => {
            deploy(&config, &executor, output.as_deref()).await?;
            print_gas_report(&gas_log, *gas_report);
        }
        Command::Scenario {
            deployment,
            deploy: deploy_first,
            scenario,
            output,
            gas_report,
        } => {
            let deployment = match deployment {
                Some(path) if !*deploy_first => Deployment::load(path)
                    .with_context(|| format!("Failed to load deployment {}", path.display()))?,
                _ => deploy(&config, &executor, output.as_deref()).await?,
            };
            // report only the scenario's own executes
            let _ = gas_log.drain();
            run_scenario(&config, &executor, deployment, scenario.as_deref()).await?;
            print_gas_report(&gas_log, *gas_report);
        }
        Command::Migrate {
            deployment,
            contract,
            artifact,
            msg,
        } => {
            let mut record = Deployment::load(deployment)
                .with_context(|| format!("Failed to load deployment {}", deployment.display()))?;
            let address = record.require_address(contract)?.to_string();
            let msg: Value = serde_json::from_str(msg).context("--msg is not valid JSON")?;

            let (code_id, _) = executor.upload_file(artifact).await?;
            let result = executor.migrate(&address, code_id, &msg).await?;
            info!(contract = %contract, code_id, tx_hash = %result.tx_hash, "Contract migrated");

            record.set_code_id(contract, code_id)?;
            record.save(deployment)?;
        }
        Command::UpdateAdmin { contract, new_admin } => {
            let result = executor.update_admin(contract, new_admin).await?;
            info!(contract = %contract, new_admin = %new_admin, tx_hash = %result.tx_hash, "Admin updated");
        }
        Command::Query { contract, msg } => {
            let msg: Value = serde_json::from_str(msg).context("--msg is not valid JSON")?;
            let response = executor.query(contract, &msg).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn build_executor(config: &AppConfig, gas_log: GasLogger) -> Result<TxExecutor> {
    let endpoint = config.endpoint()?;
    let prefix = endpoint.address_prefix.clone();
    let client = LcdClient::new(endpoint, config.client_config())?;
    let wallet = config.wallet.load(&prefix).context("Failed to load deployer wallet")?;
    info!(lcd = %client.endpoint().url, chain_id = %client.endpoint().chain_id, "Chain client ready");

    Ok(TxExecutor::new(
        Arc::new(client),
        Arc::new(wallet),
        Arc::new(config.fee_policy()),
        config.network.clone(),
    )
    .with_gas_log(gas_log))
}

async fn deploy(config: &AppConfig, executor: &TxExecutor, output: Option<&Path>) -> Result<Deployment> {
    let plan = standard_plan(&config.deploy.params, &config.deploy.artifacts)?;
    let orchestrator = Orchestrator::new(executor.clone(), &config.deploy.artifacts_dir);
    let start = Deployment::new(
        config.network.clone(),
        executor.client().endpoint().chain_id.clone(),
        executor.address(),
    );

    let run = orchestrator.run_with(&plan, start).await;
    if let Some(path) = output {
        run.deployment
            .save(path)
            .with_context(|| format!("Failed to write deployment to {}", path.display()))?;
        info!(path = %path.display(), contracts = run.deployment.len(), "Deployment written");
    }

    let report = &run.report;
    println!(
        "Deployment {}: {}/{} steps confirmed, {} gas",
        report.run_id,
        report.count(StepState::Confirmed),
        report.steps.len(),
        report.total_gas()
    );
    for entry in &run.deployment.contracts {
        println!(
            "  {:<16} code {:>4}  {}",
            entry.id.as_str(), entry.contract.code_id, entry.contract.address
        );
    }

    Ok(run.into_result()?.deployment)
}

async fn run_scenario(
    config: &AppConfig,
    executor: &TxExecutor,
    deployment: Deployment,
    file: Option<&Path>,
) -> Result<()> {
    let scenario = match file {
        Some(path) => Scenario::load(path)?,
        None => open_position_scenario(&config.deploy.params, &TradeParams::from(&config.scenario.trade))?,
    };

    let prefix = &executor.client().endpoint().address_prefix;
    let mut runner = ScenarioRunner::new(executor.clone(), deployment);
    for (name, wallet) in &config.scenario.wallets {
        let signer = wallet
            .load(prefix)
            .with_context(|| format!("Failed to load scenario wallet '{}'", name))?;
        runner = runner.with_wallet(name.clone(), executor.with_signer(Arc::new(signer)));
    }

    let report = runner.run(&scenario).await;
    println!("{report}");
    if !report.is_success() {
        bail!(
            "scenario '{}' failed: {}/{} steps passed",
            report.name,
            report.passed(),
            report.steps.len()
        );
    }
    Ok(())
}

fn print_gas_report(gas_log: &GasLogger, enabled: bool) {
    if !enabled {
        return;
    }
    match gas_log.report() {
        Some(report) => println!("{report}"),
        None => println!("No execute transactions recorded"),
    }
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = metrics().export_text()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Print the failing step and the chain's verdict verbatim
fn report_failure(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    for cause in err.chain() {
        if let Some(deploy) = cause.downcast_ref::<DeployError>() {
            eprintln!("  step:      {}", deploy.step_index);
            eprintln!("  label:     {}", deploy.label);
        }
        if let Some(HarnessError::Chain {
            code,
            codespace,
            raw_log,
        }) = cause.downcast_ref::<HarnessError>()
        {
            eprintln!("  code:      {}", code);
            eprintln!("  codespace: {}", codespace.as_deref().unwrap_or("-"));
            eprintln!("  raw_log:   {}", raw_log);
        }
    }
}
