//! Run correlation for logs and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// Correlation ID shared by every log line of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one deployment or scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: CorrelationId,
    /// `deploy`, `scenario`, `migrate`, ...
    pub operation: String,
    pub network: String,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(operation: &str, network: &str) -> Self {
        Self {
            run_id: CorrelationId::new(),
            operation: operation.to_string(),
            network: network.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Span to instrument the run's futures with
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "run",
            run_id = %self.run_id,
            operation = %self.operation,
            network = %self.network
        )
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}
