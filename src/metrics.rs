//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Process metrics for chain traffic
pub struct Metrics {
    registry: Registry,

    // Counters
    pub tx_submitted: IntCounter,
    pub tx_confirmed: IntCounter,
    pub tx_rejected: IntCounter,
    /// Broadcast messages by `Msg::kind`
    pub tx_messages: IntCounterVec,
    pub network_failures: IntCounter,
    pub read_retries: IntCounter,
    pub queries: IntCounter,

    // Histograms
    pub broadcast_latency: Histogram,
    pub gas_used: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Transactions handed to the chain for broadcast",
        ))?;

        let tx_confirmed = IntCounter::with_opts(Opts::new(
            "tx_confirmed_total",
            "Transactions included and executed successfully",
        ))?;

        let tx_rejected = IntCounter::with_opts(Opts::new(
            "tx_rejected_total",
            "Broadcast transactions rejected by the chain or lost in transport",
        ))?;

        let tx_messages = IntCounterVec::new(
            Opts::new("tx_messages_total", "Messages broadcast, by message kind"),
            &["kind"],
        )?;

        let network_failures = IntCounter::with_opts(Opts::new(
            "network_failures_total",
            "Requests that failed at the transport level",
        ))?;

        let read_retries = IntCounter::with_opts(Opts::new(
            "read_retries_total",
            "Read-only requests retried after a transient failure",
        ))?;

        let queries = IntCounter::with_opts(Opts::new(
            "contract_queries_total",
            "Smart contract queries issued",
        ))?;

        let broadcast_latency = Histogram::with_opts(
            HistogramOpts::new(
                "broadcast_latency_seconds",
                "Time from broadcast to inclusion, settling delay included",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        let gas_used = Histogram::with_opts(
            HistogramOpts::new("tx_gas_used", "Gas used per confirmed transaction").buckets(vec![
                100_000.0,
                250_000.0,
                500_000.0,
                1_000_000.0,
                2_500_000.0,
                5_000_000.0,
                10_000_000.0,
            ]),
        )?;

        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_rejected.clone()))?;
        registry.register(Box::new(tx_messages.clone()))?;
        registry.register(Box::new(network_failures.clone()))?;
        registry.register(Box::new(read_retries.clone()))?;
        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(broadcast_latency.clone()))?;
        registry.register(Box::new(gas_used.clone()))?;

        Ok(Self {
            registry,
            tx_submitted,
            tx_confirmed,
            tx_rejected,
            tx_messages,
            network_failures,
            read_retries,
            queries,
            broadcast_latency,
            gas_used,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn export_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_registered_metrics() {
        let m = Metrics::new().unwrap();
        m.tx_submitted.inc();
        m.gas_used.observe(150_000.0);
        m.tx_messages.with_label_values(&["store_code"]).inc();

        let text = m.export_text().unwrap();
        assert!(text.contains("tx_submitted_total 1"));
        assert!(text.contains("tx_messages_total{kind=\"store_code\"} 1"));
        assert!(text.contains("tx_gas_used_bucket"));
    }
}
