//! perp-deployer - deployment and integration-test harness for
//! perpetual-futures CosmWasm contracts
//!
//! The library drives a Cosmos LCD endpoint: it uploads and instantiates
//! the protocol's contracts in dependency order, wires them together, and
//! runs scenarios that check on-chain state against expected values.

pub mod amm;
pub mod chain;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod executor;
pub mod fees;
pub mod gas_log;
pub mod messages;
pub mod metrics;
pub mod observability;
pub mod scenario;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use chain::{ChainClient, ChainEndpoint, ClientConfig, LcdClient};
pub use deploy::{standard_plan, Deployment, DeploymentPlan, Orchestrator};
pub use errors::{DeployError, HarnessError, Result};
pub use executor::TxExecutor;
pub use fees::{FeePolicy, OperationKind};
pub use gas_log::GasLogger;
pub use scenario::{approx_equal, Scenario, ScenarioRunner};
pub use wallet::{Secp256k1Wallet, Signer};
