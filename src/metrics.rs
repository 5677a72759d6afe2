//! Prometheus exposition plus the series names used across the crate.
//!
//! Library code only talks to the `metrics` facade; without an installed
//! recorder every call is a no-op, which is what tests rely on.

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const REQUESTS_TOTAL: &str = "aq_requests_total";
pub const CACHE_HITS_TOTAL: &str = "aq_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "aq_cache_misses_total";
pub const PROVIDER_ATTEMPTS_TOTAL: &str = "aq_provider_attempts_total";
pub const PROVIDER_FAILURES_TOTAL: &str = "aq_provider_failures_total";
pub const PROVIDER_HEALTHY: &str = "aq_provider_healthy";
pub const FUSION_DEGRADED_TOTAL: &str = "aq_fusion_degraded_total";
pub const REQUEST_DURATION_MS: &str = "aq_request_duration_ms";
pub const RESPONSE_CACHE_TTL_SECS: &str = "aq_response_cache_ttl_secs";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(REQUESTS_TOTAL, "get_air_quality calls.");
        describe_counter!(CACHE_HITS_TOTAL, "Fused results served from cache.");
        describe_counter!(CACHE_MISSES_TOTAL, "Requests that had to fan out.");
        describe_counter!(
            PROVIDER_ATTEMPTS_TOTAL,
            "Adapter fetch attempts, retries included."
        );
        describe_counter!(
            PROVIDER_FAILURES_TOTAL,
            "Adapter fetch sequences that ended in failure, by error kind."
        );
        describe_gauge!(PROVIDER_HEALTHY, "1 when the provider is healthy, else 0.");
        describe_counter!(
            FUSION_DEGRADED_TOTAL,
            "Requests answered with degraded-no-data."
        );
        describe_histogram!(
            REQUEST_DURATION_MS,
            "End-to-end get_air_quality latency in milliseconds."
        );
        describe_gauge!(RESPONSE_CACHE_TTL_SECS, "Configured fused-result TTL.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the response cache TTL.
    pub fn init(response_ttl_secs: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        ensure_metrics_described();
        gauge!(RESPONSE_CACHE_TTL_SECS).set(response_ttl_secs as f64);

        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
