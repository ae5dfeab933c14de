//! # Prometheus Metrics
//!
//! Operational metrics for the custody node, scraped at `/metrics` on the
//! configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `custody` prefix so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Transactions committed.
    pub transactions_committed_total: IntCounter,
    /// Transactions rejected, labelled by wire reason.
    pub transactions_rejected_total: IntCounterVec,
    /// Vault deposits committed.
    pub deposits_total: IntCounter,
    /// Vault withdrawals committed.
    pub withdrawals_total: IntCounter,
    /// Transactions aborted by a fatal invariant check.
    pub invariant_breaches_total: IntCounter,
    /// Length of the event log.
    pub event_log_length: IntGauge,
    /// Wall time of `Chain::execute` plus persistence.
    pub transaction_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("custody".into()), None)
            .expect("failed to create prometheus registry");

        let transactions_committed_total = IntCounter::new(
            "transactions_committed_total",
            "Total number of committed transactions",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_committed_total.clone()))
            .expect("metric registration");

        let transactions_rejected_total = IntCounterVec::new(
            Opts::new(
                "transactions_rejected_total",
                "Total number of rejected transactions by reason",
            ),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_rejected_total.clone()))
            .expect("metric registration");

        let deposits_total = IntCounter::new("deposits_total", "Total number of vault deposits")
            .expect("metric creation");
        registry
            .register(Box::new(deposits_total.clone()))
            .expect("metric registration");

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of vault withdrawals")
                .expect("metric creation");
        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration");

        let invariant_breaches_total = IntCounter::new(
            "invariant_breaches_total",
            "Transactions aborted because tracked and physical balances disagreed",
        )
        .expect("metric creation");
        registry
            .register(Box::new(invariant_breaches_total.clone()))
            .expect("metric registration");

        let event_log_length = IntGauge::new("event_log_length", "Number of events in the log")
            .expect("metric creation");
        registry
            .register(Box::new(event_log_length.clone()))
            .expect("metric registration");

        let transaction_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transaction_latency_seconds",
                "Transaction execution and persistence latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(transaction_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            transactions_committed_total,
            transactions_rejected_total,
            deposits_total,
            withdrawals_total,
            invariant_breaches_total,
            event_log_length,
            transaction_latency_seconds,
        }
    }

    /// Records a rejected transaction.
    pub fn record_rejection(&self, reason: &str, fatal: bool) {
        self.transactions_rejected_total
            .with_label_values(&[reason])
            .inc();
        if fatal {
            self.invariant_breaches_total.inc();
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
