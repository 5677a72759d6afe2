//! # Orchestrator
//!
//! `get_air_quality`: cache check, region routing, bounded concurrent fan-out
//! with retry, health bookkeeping, fusion, optional forecast, cache write.
//!
//! Provider failures never fail a request; the worst case is a
//! `degraded-no-data` result. Fusion starts only once every dispatched fetch
//! has finished, failed or been abandoned.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    build_adapters, fetch_with_retry, AdapterMap, AirQualityAdapter, FetchQuery, FetchReport,
    RetryPolicy,
};
use crate::cache::ResultCache;
use crate::config::FusionConfig;
use crate::error::{ConfigError, ProviderError};
use crate::forecast::{build_forecast, DisabledForecast, ForecastData, ForecastProvider};
use crate::fusion::FusionEngine;
use crate::health::{HealthSnapshot, HealthTracker};
use crate::metrics::{
    ensure_metrics_described, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, FUSION_DEGRADED_TOTAL,
    PROVIDER_FAILURES_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_MS,
};
use crate::model::{Coordinate, FusedResult, LocationInfo, Reading};
use crate::region::RegionRouter;
use crate::registry::{DataSourceDescriptor, SourceRegistry};

/// One `get_air_quality` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirQualityRequest {
    pub coordinate: Coordinate,
    pub include_forecast: bool,
    /// `None` means the configured default radius.
    pub radius_km: Option<f64>,
    pub use_cache: bool,
}

impl AirQualityRequest {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            include_forecast: false,
            radius_km: None,
            use_cache: true,
        }
    }

    pub fn with_forecast(mut self, on: bool) -> Self {
        self.include_forecast = on;
        self
    }

    pub fn with_radius(mut self, km: f64) -> Self {
        self.radius_km = Some(km);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Registry entry joined with live health.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    #[serde(flatten)]
    pub descriptor: DataSourceDescriptor,
    pub has_adapter: bool,
    pub health: Option<HealthSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// `healthy`, or `degraded` when any adapter is unhealthy.
    pub status: &'static str,
    pub adapters: BTreeMap<String, HealthSnapshot>,
}

pub struct Orchestrator {
    cfg: Arc<FusionConfig>,
    registry: Arc<SourceRegistry>,
    router: RegionRouter,
    engine: FusionEngine,
    adapters: AdapterMap,
    health: Arc<HealthTracker>,
    cache: ResultCache,
    forecast: Arc<dyn ForecastProvider>,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Wire everything from an already-validated config and a set of adapters.
    /// Uses an in-memory cache, a fresh health tracker and no forecast.
    pub fn new(cfg: Arc<FusionConfig>, adapters: AdapterMap) -> Result<Self, ConfigError> {
        let registry = Arc::new(SourceRegistry::new(cfg.sources.iter().cloned()));
        let router = RegionRouter::new(&cfg)?;
        let engine = FusionEngine::new(&cfg, registry.clone());
        let health = Arc::new(HealthTracker::with_providers(
            cfg.health.clone(),
            adapters.keys().cloned(),
        ));
        let cache = ResultCache::in_memory(&cfg.cache);
        let retry = RetryPolicy::from_settings(&cfg.retry);
        ensure_metrics_described();

        Ok(Self {
            cfg,
            registry,
            router,
            engine,
            adapters,
            health,
            cache,
            forecast: Arc::new(DisabledForecast),
            retry,
        })
    }

    /// Build adapters and forecast from the config tables.
    pub fn from_config(cfg: FusionConfig) -> anyhow::Result<Self> {
        let adapters = build_adapters(&cfg)?;
        let forecast = build_forecast(&cfg.forecast)?;
        Ok(Self::new(Arc::new(cfg), adapters)?.with_forecast(forecast))
    }

    pub fn with_forecast(mut self, forecast: Arc<dyn ForecastProvider>) -> Self {
        self.forecast = forecast;
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    /// Share a tracker across orchestrators (or inspect it from tests).
    pub fn with_health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = health;
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn get_air_quality(&self, req: AirQualityRequest) -> FusedResult {
        self.get_air_quality_with_cancel(req, CancellationToken::new())
            .await
    }

    /// Same as [`get_air_quality`](Self::get_air_quality), abandoning in-flight
    /// fetches once `cancel` fires or the configured request deadline passes.
    pub async fn get_air_quality_with_cancel(
        &self,
        req: AirQualityRequest,
        cancel: CancellationToken,
    ) -> FusedResult {
        let started = Instant::now();
        counter!(REQUESTS_TOTAL).increment(1);

        let c = req.coordinate;
        let radius_km = self.cfg.search.effective_radius(req.radius_km);
        let key = self.cache.fused_key(c, radius_km, req.include_forecast);

        if req.use_cache {
            if let Some(mut hit) = self.cache.get_fused(&key).await {
                tracing::debug!(key = %key, "cache hit");
                counter!(CACHE_HITS_TOTAL).increment(1);
                hit.from_cache = true;
                return hit;
            }
        }
        tracing::debug!(key = %key, use_cache = req.use_cache, "cache miss");
        counter!(CACHE_MISSES_TOTAL).increment(1);

        let route = self.resolve_route(c).await;
        let selected = self.select(&route.providers);
        let penalized: HashSet<String> = selected
            .iter()
            .filter(|(_, _, healthy)| !healthy)
            .map(|(code, _, _)| code.clone())
            .collect();

        let query = FetchQuery {
            coordinate: c,
            radius_km,
            timeout: self.retry.attempt_timeout,
        };
        let deadline = self.cfg.fanout.request_deadline().map(|d| started + d);
        let readings = self.fan_out(selected, query, &cancel, deadline).await;
        let mut result =
            self.engine
                .fuse_with_penalties(&readings, &route, &penalized, c, Utc::now());

        if result.is_degraded() {
            counter!(FUSION_DEGRADED_TOTAL).increment(1);
            tracing::info!(region = %route.region, lat = c.lat, lon = c.lon, "no usable readings");
        }

        if req.include_forecast && !cancel.is_cancelled() {
            result = result.with_forecast(self.fetch_forecast(c).await);
        }

        // A caller that gave up gets a partial answer; the next one should not.
        if !result.is_degraded() && !cancel.is_cancelled() {
            self.cache.put_fused(&key, &result).await;
        }

        histogram!(REQUEST_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    pub fn health_snapshot(&self) -> BTreeMap<String, HealthSnapshot> {
        self.health.snapshot()
    }

    pub fn service_status(&self) -> ServiceStatus {
        let adapters = self.health.snapshot();
        let status = if adapters.values().all(|h| h.is_healthy) {
            "healthy"
        } else {
            "degraded"
        };
        ServiceStatus { status, adapters }
    }

    pub fn sources(&self) -> Vec<SourceStatus> {
        let snap = self.health.snapshot();
        self.registry
            .descriptors()
            .into_iter()
            .map(|d| SourceStatus {
                has_adapter: self.adapters.contains_key(&d.code),
                health: snap.get(&d.code).cloned(),
                descriptor: d.clone(),
            })
            .collect()
    }

    async fn resolve_route(&self, c: Coordinate) -> LocationInfo {
        if let Some(info) = self.cache.get_location(c).await {
            return info;
        }
        let info = self.router.route(c);
        self.cache.put_location(c, &info).await;
        info
    }

    /// Priority-ordered adapters, healthy first, unhealthy last. The flag is
    /// the health at selection time.
    fn select(&self, priority: &[String]) -> Vec<(String, Arc<dyn AirQualityAdapter>, bool)> {
        let mut seen = HashSet::new();
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for code in priority {
            if !seen.insert(code.as_str()) {
                continue;
            }
            if !self.registry.is_active(code) {
                tracing::debug!(provider = %code, "skipping inactive source");
                continue;
            }
            let Some(adapter) = self.adapters.get(code) else {
                continue;
            };
            if self.health.is_healthy(code) {
                healthy.push((code.clone(), adapter.clone(), true));
            } else {
                unhealthy.push((code.clone(), adapter.clone(), false));
            }
        }
        healthy.extend(unhealthy);
        healthy
    }

    /// Spawn one task per provider and collect readings once all have ended.
    ///
    /// Each task records its own health outcome. Tasks watch a child of
    /// `cancel` that is also cancelled when this future is dropped, so an
    /// abandoned request stops its fetches and still counts them as failures.
    async fn fan_out(
        &self,
        selected: Vec<(String, Arc<dyn AirQualityAdapter>, bool)>,
        query: FetchQuery,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Vec<Reading> {
        let limiter = Arc::new(Semaphore::new(self.cfg.fanout.max_concurrency));
        let scope = cancel.child_token();
        let _abandon_on_drop = scope.clone().drop_guard();
        let mut handles = Vec::with_capacity(selected.len());

        for (code, adapter, _) in selected {
            let limiter = limiter.clone();
            let policy = self.retry.clone();
            let scope = scope.clone();
            let health = self.health.clone();
            let task_code = code.clone();

            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let abandoned = |provider: String, err: ProviderError| FetchReport {
                    provider,
                    outcome: Err(err),
                    attempts: 0,
                    elapsed: started.elapsed(),
                };
                let run = async {
                    let _permit = limiter.acquire_owned().await.ok()?;
                    Some(fetch_with_retry(adapter.as_ref(), &query, &policy).await)
                };
                let expired = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                let report = tokio::select! {
                    biased;
                    _ = scope.cancelled() => abandoned(task_code, ProviderError::Cancelled),
                    _ = expired => {
                        tracing::warn!(provider = %task_code, "request deadline reached");
                        let waited = started.elapsed();
                        abandoned(task_code, ProviderError::Timeout(waited))
                    }
                    rep = run => rep.unwrap_or_else(|| abandoned(task_code, ProviderError::Cancelled)),
                };
                record_outcome(&health, &report);
                report
            });
            handles.push((code, handle));
        }

        let mut readings = Vec::new();
        for (code, handle) in handles {
            match handle.await {
                Ok(FetchReport {
                    provider,
                    outcome: Ok(mut rs),
                    ..
                }) => {
                    for r in &mut rs {
                        r.provider = provider.clone();
                    }
                    readings.append(&mut rs);
                }
                Ok(_) => {}
                Err(e) => {
                    self.health.record_failure(&code);
                    tracing::warn!(provider = %code, error = %e, "fetch task failed");
                }
            }
        }
        readings
    }

    async fn fetch_forecast(&self, c: Coordinate) -> Option<ForecastData> {
        if !self.forecast.enabled() {
            return None;
        }
        let budget = Duration::from_secs(self.cfg.forecast.timeout_secs);
        match tokio::time::timeout(budget, self.forecast.get(c)).await {
            Ok(Ok(data)) => Some(data),
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, "forecast unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(timeout_secs = budget.as_secs(), "forecast timed out");
                None
            }
        }
    }
}

/// One health record per provider per request.
fn record_outcome(health: &HealthTracker, rep: &FetchReport) {
    match &rep.outcome {
        Ok(rs) => {
            health.record_success(&rep.provider);
            tracing::debug!(
                provider = %rep.provider,
                attempts = rep.attempts,
                readings = rs.len(),
                "provider ok"
            );
        }
        Err(e) => {
            health.record_failure(&rep.provider);
            counter!(
                PROVIDER_FAILURES_TOTAL,
                "provider" => rep.provider.clone(),
                "kind" => e.kind()
            )
            .increment(1);
            tracing::warn!(
                provider = %rep.provider,
                attempts = rep.attempts,
                error = %e,
                "provider error"
            );
        }
    }
}
