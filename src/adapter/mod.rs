// src/adapter/mod.rs
//! Provider adapters.
//!
//! Every provider implements [`AirQualityAdapter`]. The orchestrator holds a
//! `code -> Arc<dyn AirQualityAdapter>` map built once at start from the
//! `[adapters]` config table, and always calls through
//! [`retry::fetch_with_retry`].

pub mod fixture;
pub mod http;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AdapterSpec, FusionConfig};
use crate::error::{ConfigError, ProviderError};
use crate::model::{Coordinate, Reading};

pub use fixture::{FixtureAdapter, ScriptedAdapter};
pub use http::HttpRelayAdapter;
pub use retry::{fetch_with_retry, FetchReport, RetryPolicy};

/// Arguments of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchQuery {
    pub coordinate: Coordinate,
    pub radius_km: f64,
    /// Per-attempt budget. The retry wrapper enforces it as well.
    pub timeout: Duration,
}

#[async_trait::async_trait]
pub trait AirQualityAdapter: Send + Sync {
    /// Registry code this adapter serves (e.g. "EPA_AIRNOW").
    fn code(&self) -> &str;

    /// Readings near the query point, nearest first. An empty vec is a
    /// successful fetch with nothing to report.
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Reading>, ProviderError>;
}

pub type AdapterMap = HashMap<String, Arc<dyn AirQualityAdapter>>;

/// Resolve the `[adapters]` table into live adapters.
pub fn build_adapters(cfg: &FusionConfig) -> Result<AdapterMap, ConfigError> {
    let mut out: AdapterMap = HashMap::new();
    for (code, spec) in &cfg.adapters {
        let adapter: Arc<dyn AirQualityAdapter> = match spec {
            AdapterSpec::Fixture { readings } => {
                Arc::new(FixtureAdapter::from_specs(code.clone(), readings.clone()))
            }
            AdapterSpec::Http { url, api_key_env } => {
                let api_key = api_key_env.as_deref().and_then(|var| {
                    let key = std::env::var(var).ok();
                    if key.is_none() {
                        tracing::warn!(provider = %code, var, "api key env var not set");
                    }
                    key
                });
                let adapter = HttpRelayAdapter::new(code.clone(), url.clone(), api_key)
                    .map_err(|e| ConfigError::InvalidAdapter {
                        code: code.clone(),
                        reason: e.to_string(),
                    })?;
                Arc::new(adapter)
            }
        };
        out.insert(code.clone(), adapter);
    }
    tracing::info!(count = out.len(), "adapters registered");
    Ok(out)
}
