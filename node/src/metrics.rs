//! # Prometheus Metrics
//!
//! Operational metrics of the ledger node, scraped at `/metrics` on the
//! metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed with
//! `zchain`. Counters owned by the ledger itself (evictions, persist
//! failures) are mirrored from [`StatsSnapshot`] on every scrape.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use zchain_ledger::{Ledger, StatsSnapshot};

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

/// All Prometheus metric handles of the node.
pub struct LedgerMetrics {
    registry: Registry,
    pub blocks_appended_total: IntCounter,
    pub chains_registered_total: IntCounter,
    pub cache_evictions_total: IntCounter,
    pub persist_failures_total: IntCounter,
    pub cached_chains: IntGauge,
    /// Request-to-receipt latency of block appends.
    pub append_latency_seconds: Histogram,
    /// Ledger counters as of the previous sync.
    last: Mutex<StatsSnapshot>,
}

impl LedgerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("zchain".into()), None)?;

        let blocks_appended_total = register(
            &registry,
            IntCounter::new("blocks_appended_total", "Total number of blocks appended")?,
        )?;
        let chains_registered_total = register(
            &registry,
            IntCounter::new("chains_registered_total", "Total number of chains registered")?,
        )?;
        let cache_evictions_total = register(
            &registry,
            IntCounter::new(
                "cache_evictions_total",
                "Total number of chains evicted from the chain cache",
            )?,
        )?;
        let persist_failures_total = register(
            &registry,
            IntCounter::new(
                "persist_failures_total",
                "Total number of persists that left blocks unwritten",
            )?,
        )?;
        let cached_chains = register(
            &registry,
            IntGauge::new("cached_chains", "Number of chains currently cached")?,
        )?;
        let append_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "append_latency_seconds",
                    "Block append latency including persistence, in seconds",
                )
                .buckets(vec![
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
                ]),
            )?,
        )?;

        Ok(Self {
            registry,
            blocks_appended_total,
            chains_registered_total,
            cache_evictions_total,
            persist_failures_total,
            cached_chains,
            append_latency_seconds,
            last: Mutex::new(StatsSnapshot::default()),
        })
    }

    /// Brings the counters up to `stats`. Counters only ever move forward.
    pub fn sync(&self, stats: StatsSnapshot) {
        let mut last = self.last.lock();
        self.blocks_appended_total
            .inc_by(stats.blocks_appended.saturating_sub(last.blocks_appended));
        self.chains_registered_total
            .inc_by(stats.chains_registered.saturating_sub(last.chains_registered));
        self.cache_evictions_total
            .inc_by(stats.cache_evictions.saturating_sub(last.cache_evictions));
        self.persist_failures_total
            .inc_by(stats.persist_failures.saturating_sub(last.persist_failures));
        self.cached_chains.set(stats.cached_chains as i64);
        *last = stats;
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

pub type SharedMetrics = Arc<LedgerMetrics>;

/// State of the metrics server.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: SharedMetrics,
    pub ledger: Arc<Ledger>,
}

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state.metrics.sync(state.ledger.stats());
    match state.metrics.encode() {
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
