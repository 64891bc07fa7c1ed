//! Error taxonomy for chain interaction, deployment and scenarios
//!
//! Errors fall into two families that callers must treat differently:
//! - network-class errors (`Network`, `Decode`) mean the request may never
//!   have reached the chain, or its answer was lost. Reads can be retried,
//!   mutating calls must first be confirmed by a query.
//! - everything else is deterministic: the chain rejected the transaction,
//!   the plan is malformed, or an expectation did not hold.

use thiserror::Error;

use crate::scenario::AssertionFailure;

/// Result alias used throughout the harness
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors produced by the chain adapter, executor, orchestrator and scenario runner
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// Endpoint unreachable, timed out, throttled or returned a server error
    #[error("Network error: {message} (endpoint: {endpoint}, status: {status:?})")]
    Network {
        endpoint: String,
        message: String,
        status: Option<u16>,
    },

    /// The transaction (or query) reached the chain and was rejected
    #[error("Transaction failed: code {code}, codespace {codespace:?}: {raw_log}")]
    Chain {
        code: u32,
        codespace: Option<String>,
        raw_log: String,
    },

    /// A plan references a contract that no earlier step produces
    #[error("Sequencing error at step {step}: {reason}")]
    Sequencing { step: usize, reason: String },

    /// Scenario expectation did not hold
    #[error("Assertion failed: {0}")]
    Assertion(#[from] AssertionFailure),

    /// The endpoint answered but the payload could not be decoded
    #[error("Malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// A successful transaction did not carry an expected event attribute
    #[error("Missing attribute '{key}' in '{event}' event of tx {tx_hash}")]
    MissingAttribute {
        event: String,
        key: String,
        tx_hash: String,
    },

    /// Key material could not be loaded or used
    #[error("Signing error: {0}")]
    Signing(String),

    /// Contract bytecode could not be read
    #[error("Artifact error: {path}: {message}")]
    Artifact { path: String, message: String },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The chain did not reach a block height within the wait budget
    #[error("Timed out waiting for block height {target}, current block height: {current}")]
    BlockTimeout { target: u64, current: u64 },
}

impl HarnessError {
    /// Check if this error is potentially retryable
    ///
    /// Only network-class failures qualify. A `Chain` error is final for the
    /// request as submitted and needs a corrected request instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::Network { .. } => true,
            HarnessError::Decode { .. } => true,

            HarnessError::Chain { .. } => false,
            HarnessError::Sequencing { .. } => false,
            HarnessError::Assertion(_) => false,
            HarnessError::MissingAttribute { .. } => false,
            HarnessError::Signing(_) => false,
            HarnessError::Artifact { .. } => false,
            HarnessError::Config(_) => false,
            HarnessError::BlockTimeout { .. } => false,
        }
    }

    /// True when the chain itself rejected the request
    pub fn is_chain_rejection(&self) -> bool {
        matches!(self, HarnessError::Chain { .. })
    }

    /// Raw chain log for chain rejections, verbatim
    pub fn raw_log(&self) -> Option<&str> {
        match self {
            HarnessError::Chain { raw_log, .. } => Some(raw_log),
            _ => None,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            HarnessError::Network { endpoint, .. } => Some(endpoint),
            HarnessError::Decode { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Build a network error from a reqwest failure
    pub fn from_reqwest(err: reqwest::Error, endpoint: &str) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };

        HarnessError::Network {
            endpoint: endpoint.to_string(),
            message,
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// A deployment plan step failed; the plan halted at `step_index`
#[derive(Debug, Clone, Error)]
#[error("deployment step {step_index} ({label}) failed: {source}")]
pub struct DeployError {
    pub step_index: usize,
    pub label: String,
    #[source]
    pub source: HarnessError,
}

impl DeployError {
    pub fn new(step_index: usize, label: impl Into<String>, source: HarnessError) -> Self {
        Self {
            step_index,
            label: label.into(),
            source,
        }
    }
}
