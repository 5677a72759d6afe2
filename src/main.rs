//! Air quality fusion service, binary entrypoint.
//! Loads config, wires the orchestrator and serves the HTTP surface.

use air_quality_fusion::{api, config, metrics::Metrics, telemetry, Orchestrator};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    telemetry::init_tracing();

    let cfg = config::load_default().map_err(anyhow::Error::from)?;
    let response_ttl = cfg.cache.response_ttl_secs;
    let orchestrator = Orchestrator::from_config(cfg)?;
    tracing::info!(
        adapters = orchestrator.health_snapshot().len(),
        "orchestrator ready"
    );

    let mut router = api::router(api::AppState::new(orchestrator));
    match Metrics::init(response_ttl) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "metrics exporter not installed"),
    }

    Ok(router.into())
}
