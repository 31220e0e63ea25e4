//! Prometheus Metrics Registry - Oracle Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers aggregation outcomes, per-source fetch health, round
//! submissions, and per-pair staleness.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the oracle.
///
/// All metrics follow the naming convention `price_oracle_*` and carry a
/// `pair` label where they are pair-scoped.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Aggregation outcomes (`accepted` or a rejection reason).
    pub aggregations: IntCounterVec,
    /// Per-source fetch outcomes (`ok` or a fetch error kind).
    pub source_fetches: IntCounterVec,
    /// Per-source fetch latency histogram (seconds).
    pub source_fetch_latency: HistogramVec,
    /// Backoff currently applied to a source (seconds, 0 = active).
    pub source_backoff_seconds: GaugeVec,
    /// Rounds committed to the ledger.
    pub rounds_submitted: IntCounterVec,
    /// Failed round submissions.
    pub submission_failures: IntCounterVec,
    /// Last accepted price.
    pub last_price: GaugeVec,
    /// Observations waiting for the next round.
    pub observations_buffered: IntGaugeVec,
    /// Seconds since the last accepted aggregation.
    pub seconds_since_accepted: GaugeVec,
    /// Seconds since the last committed round.
    pub seconds_since_submission: GaugeVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let aggregations = IntCounterVec::new(
            Opts::new(
                "price_oracle_aggregations_total",
                "Aggregation cycles by outcome",
            ),
            &["pair", "outcome"],
        )?;

        let source_fetches = IntCounterVec::new(
            Opts::new(
                "price_oracle_source_fetches_total",
                "Source fetches by outcome",
            ),
            &["pair", "source", "outcome"],
        )?;

        let source_fetch_latency = HistogramVec::new(
            HistogramOpts::new(
                "price_oracle_source_fetch_latency_seconds",
                "Source fetch latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["source"],
        )?;

        let source_backoff_seconds = GaugeVec::new(
            Opts::new(
                "price_oracle_source_backoff_seconds",
                "Backoff applied after the last source failure (0 = active)",
            ),
            &["pair", "source"],
        )?;

        let rounds_submitted = IntCounterVec::new(
            Opts::new(
                "price_oracle_rounds_submitted_total",
                "Rounds committed to the ledger",
            ),
            &["pair"],
        )?;

        let submission_failures = IntCounterVec::new(
            Opts::new(
                "price_oracle_submission_failures_total",
                "Round submissions that failed",
            ),
            &["pair"],
        )?;

        let last_price = GaugeVec::new(
            Opts::new("price_oracle_last_price", "Last accepted aggregated price"),
            &["pair"],
        )?;

        let observations_buffered = IntGaugeVec::new(
            Opts::new(
                "price_oracle_observations_buffered",
                "Accepted observations awaiting the next round",
            ),
            &["pair"],
        )?;

        let seconds_since_accepted = GaugeVec::new(
            Opts::new(
                "price_oracle_seconds_since_accepted",
                "Seconds since the last accepted aggregation",
            ),
            &["pair"],
        )?;

        let seconds_since_submission = GaugeVec::new(
            Opts::new(
                "price_oracle_seconds_since_submission",
                "Seconds since the last committed round",
            ),
            &["pair"],
        )?;

        // Register all metrics
        registry.register(Box::new(aggregations.clone()))?;
        registry.register(Box::new(source_fetches.clone()))?;
        registry.register(Box::new(source_fetch_latency.clone()))?;
        registry.register(Box::new(source_backoff_seconds.clone()))?;
        registry.register(Box::new(rounds_submitted.clone()))?;
        registry.register(Box::new(submission_failures.clone()))?;
        registry.register(Box::new(last_price.clone()))?;
        registry.register(Box::new(observations_buffered.clone()))?;
        registry.register(Box::new(seconds_since_accepted.clone()))?;
        registry.register(Box::new(seconds_since_submission.clone()))?;

        Ok(Self {
            registry,
            aggregations,
            source_fetches,
            source_fetch_latency,
            source_backoff_seconds,
            rounds_submitted,
            submission_failures,
            last_price,
            observations_buffered,
            seconds_since_accepted,
            seconds_since_submission,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics
            .aggregations
            .with_label_values(&["btc/usd", "accepted"])
            .inc();
        metrics.last_price.with_label_values(&["btc/usd"]).set(101.0);

        let body = metrics.render().unwrap();
        assert!(body.contains("price_oracle_aggregations_total"));
        assert!(body.contains("price_oracle_last_price{pair=\"btc/usd\"} 101"));
    }
}
