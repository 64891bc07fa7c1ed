//! Chain client adapter
//!
//! `ChainClient` is the only way the harness talks to a node. `LcdClient`
//! implements it over a Cosmos LCD REST endpoint; tests use the in-memory
//! `MockChain` from `test_utils`.

pub mod lcd;
pub mod retry;
pub mod tx;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;

use crate::errors::Result;
use retry::RetryPolicy;
use tx::{StdTx, TxResult};

pub use lcd::LcdClient;

/// Immutable descriptor of one target network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub chain_id: String,
    pub url: String,
    pub address_prefix: String,
}

impl ChainEndpoint {
    pub fn new(chain_id: impl Into<String>, url: impl Into<String>, address_prefix: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            url: url.into().trim_end_matches('/').to_string(),
            address_prefix: address_prefix.into(),
        }
    }
}

/// Per-client tuning, fixed at construction
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Pause after every broadcast so load-balanced read replicas catch up
    pub settle_delay: Duration,
    /// Multiplier applied to simulated gas on fee-less networks
    pub gas_adjustment: f64,
    pub request_timeout: Duration,
    /// Applies to reads only
    pub retry: RetryPolicy,
    /// Polling schedule while waiting for a block height
    pub block_wait: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            gas_adjustment: 1.2,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            block_wait: RetryPolicy::block_wait(),
        }
    }
}

impl ClientConfig {
    /// Gas limit for a simulated amount, rounded up
    pub fn adjusted_gas(&self, simulated: u64) -> u64 {
        (simulated as f64 * self.gas_adjustment).ceil() as u64
    }
}

/// Header of the latest committed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub time: DateTime<Utc>,
}

/// On-chain account state needed to sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Primitive chain operations
///
/// Reads may be retried by callers. `broadcast` must not be: it returns
/// `Ok` for included-but-failed transactions (check `TxResult::code`) and
/// `Err` only when the outcome is unknown or the node refused the request.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    fn endpoint(&self) -> &ChainEndpoint;

    fn config(&self) -> &ClientConfig;

    /// Current account number and sequence
    async fn account(&self, address: &str) -> Result<AccountInfo>;

    /// Gas the chain would consume for `tx`
    async fn simulate(&self, tx: &StdTx) -> Result<u64>;

    /// Submit a signed transaction and wait for inclusion
    async fn broadcast(&self, tx: &StdTx) -> Result<TxResult>;

    /// Read-only smart contract query
    async fn query_smart(&self, contract: &str, query: &Value) -> Result<Value>;

    /// Native balance of `address` in `denom`
    async fn balance(&self, address: &str, denom: &str) -> Result<u128>;

    /// Height and time of the latest block
    async fn latest_block(&self) -> Result<BlockInfo>;
}
