// src/config/settings.rs
//! Typed tunables. Every field has a serde default so a partial TOML file is
//! valid; `FusionConfig::validate` enforces the invariants the rest of the
//! crate relies on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::aqi::AqiScale;
use crate::error::ConfigError;
use crate::registry::DataSourceDescriptor;

pub const DEFAULT_REGION: &str = "DEFAULT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub freshness: FreshnessSettings,
    pub retry: RetrySettings,
    pub fanout: FanoutSettings,
    pub health: HealthSettings,
    pub fusion: FusionSettings,
    pub purpleair: PurpleAirSettings,
    /// Region code -> provider codes, most preferred first.
    pub regions: BTreeMap<String, Vec<String>>,
    pub sources: Vec<DataSourceDescriptor>,
    /// Provider code -> how to reach it.
    pub adapters: BTreeMap<String, AdapterSpec>,
    pub forecast: ForecastSettings,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            search: SearchSettings::default(),
            freshness: FreshnessSettings::default(),
            retry: RetrySettings::default(),
            fanout: FanoutSettings::default(),
            health: HealthSettings::default(),
            fusion: FusionSettings::default(),
            purpleair: PurpleAirSettings::default(),
            regions: default_regions(),
            sources: DataSourceDescriptor::default_seed(),
            adapters: BTreeMap::new(),
            forecast: ForecastSettings::default(),
        }
    }
}

fn default_regions() -> BTreeMap<String, Vec<String>> {
    let mut m = BTreeMap::new();
    for (region, codes) in [
        (
            "US",
            &["EPA_AIRNOW", "PURPLEAIR", "OPENWEATHERMAP", "AIRVISUAL", "WAQI"][..],
        ),
        (
            "CA",
            &["ECCC_AQHI", "PURPLEAIR", "OPENWEATHERMAP", "AIRVISUAL", "WAQI"][..],
        ),
        (
            DEFAULT_REGION,
            &["OPENWEATHERMAP", "AIRVISUAL", "WAQI", "PURPLEAIR"][..],
        ),
    ] {
        m.insert(
            region.to_string(),
            codes.iter().map(|c| c.to_string()).collect(),
        );
    }
    m
}

// ---- cache ----

fn default_response_ttl_secs() -> u64 {
    600
}
fn default_location_ttl_secs() -> u64 {
    86_400
}
fn default_coordinate_precision() -> u32 {
    3
}
fn default_max_entries() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,
    #[serde(default = "default_location_ttl_secs")]
    pub location_ttl_secs: u64,
    /// Decimal places kept when rounding coordinates into cache keys.
    #[serde(default = "default_coordinate_precision")]
    pub coordinate_precision: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            response_ttl_secs: default_response_ttl_secs(),
            location_ttl_secs: default_location_ttl_secs(),
            coordinate_precision: default_coordinate_precision(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheSettings {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }
    pub fn location_ttl(&self) -> Duration {
        Duration::from_secs(self.location_ttl_secs)
    }
}

// ---- search ----

fn default_radius_km() -> f64 {
    25.0
}
fn default_max_radius_km() -> f64 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
    #[serde(default = "default_max_radius_km")]
    pub max_radius_km: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_radius_km: default_radius_km(),
            max_radius_km: default_max_radius_km(),
        }
    }
}

impl SearchSettings {
    /// Missing, non-finite or non-positive radius -> default; then cap at max.
    pub fn effective_radius(&self, requested: Option<f64>) -> f64 {
        let r = match requested {
            Some(r) if r.is_finite() && r > 0.0 => r,
            _ => self.default_radius_km,
        };
        r.min(self.max_radius_km)
    }
}

// ---- freshness ----

fn default_max_age_minutes() -> u64 {
    180
}
fn default_preferred_age_minutes() -> u64 {
    30
}
fn default_min_freshness_weight() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessSettings {
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u64,
    #[serde(default = "default_preferred_age_minutes")]
    pub preferred_age_minutes: u64,
    /// Freshness multiplier reached at `max_age_minutes`; must stay > 0.
    #[serde(default = "default_min_freshness_weight")]
    pub min_freshness_weight: f64,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            max_age_minutes: default_max_age_minutes(),
            preferred_age_minutes: default_preferred_age_minutes(),
            min_freshness_weight: default_min_freshness_weight(),
        }
    }
}

impl FreshnessSettings {
    pub fn max_age_secs(&self) -> i64 {
        (self.max_age_minutes * 60) as i64
    }
    pub fn preferred_age_secs(&self) -> i64 {
        (self.preferred_age_minutes * 60) as i64
    }
}

// ---- retry ----

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_rate_limit_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per provider per request, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra multiplier applied to the next delay after a rate-limit response.
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
        }
    }
}

impl RetrySettings {
    /// Longest a provider can take when every attempt times out: all attempt
    /// timeouts plus the plain backoff between them.
    pub fn worst_case(&self) -> Duration {
        let timeouts = Duration::from_secs(self.request_timeout_secs) * self.max_attempts;
        let cap = Duration::from_millis(self.max_delay_ms);
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff: Duration = (0..self.max_attempts.saturating_sub(1))
            .map(|n| base.mul_f64(self.backoff_factor.powi(n as i32)).min(cap))
            .sum();
        timeouts + backoff
    }
}

// ---- fan-out ----

fn default_max_concurrency() -> usize {
    4
}
fn default_request_deadline_secs() -> u64 {
    35
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Overall budget for one request's fan-out; 0 disables the deadline.
    /// When set it must cover `retry.worst_case()`.
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

impl FanoutSettings {
    pub fn request_deadline(&self) -> Option<Duration> {
        (self.request_deadline_secs > 0).then(|| Duration::from_secs(self.request_deadline_secs))
    }
}

// ---- health ----

fn default_failure_threshold() -> u32 {
    3
}
fn default_smoothing() -> f64 {
    0.2
}
fn default_min_success_rate() -> f64 {
    0.3
}
fn default_unhealthy_weight_penalty() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Consecutive failures that mark a provider unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// EMA smoothing constant for the rolling success rate.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    #[serde(default = "default_unhealthy_weight_penalty")]
    pub unhealthy_weight_penalty: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            smoothing: default_smoothing(),
            min_success_rate: default_min_success_rate(),
            unhealthy_weight_penalty: default_unhealthy_weight_penalty(),
        }
    }
}

// ---- fusion ----

fn default_tie_epsilon() -> f64 {
    0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
    /// Scale of the fused value. Readings and the PurpleAir correction are
    /// EPA AQI, so only `EPA` validates.
    #[serde(default)]
    pub scale: AqiScale,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            tie_epsilon: default_tie_epsilon(),
            scale: AqiScale::Epa,
        }
    }
}

// ---- low-cost sensor correction ----

fn default_purpleair_code() -> String {
    "PURPLEAIR".to_string()
}
fn default_true() -> bool {
    true
}
fn default_min_confidence() -> f64 {
    80.0
}
fn default_humidity() -> f64 {
    50.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurpleAirSettings {
    #[serde(default = "default_purpleair_code")]
    pub code: String,
    #[serde(default = "default_true")]
    pub epa_correction: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Relative humidity assumed when a reading carries none.
    #[serde(default = "default_humidity")]
    pub default_humidity: f64,
}

impl Default for PurpleAirSettings {
    fn default() -> Self {
        Self {
            code: default_purpleair_code(),
            epa_correction: true,
            min_confidence: default_min_confidence(),
            default_humidity: default_humidity(),
        }
    }
}

// ---- adapters ----

/// One configured reading served by a fixture adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureReadingSpec {
    pub aqi: i32,
    #[serde(default)]
    pub age_minutes: i64,
    #[serde(default)]
    pub distance_km: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub native_scale: Option<AqiScale>,
    #[serde(default)]
    pub native_value: Option<i32>,
    #[serde(default)]
    pub station: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSpec {
    /// Static readings, re-stamped relative to fetch time.
    Fixture {
        #[serde(default)]
        readings: Vec<FixtureReadingSpec>,
    },
    /// JSON relay endpoint returning already-normalized readings.
    Http {
        url: String,
        /// Name of the env var holding the provider API key, if any.
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

// ---- forecast ----

fn default_forecast_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastKind {
    #[default]
    Disabled,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSettings {
    #[serde(default)]
    pub kind: ForecastKind,
    /// Forecast endpoint, required for `kind = "http"`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_forecast_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            kind: ForecastKind::Disabled,
            url: None,
            timeout_secs: default_forecast_timeout_secs(),
        }
    }
}

// ---- validation ----

impl FusionConfig {
    /// Check every invariant the router, fusion engine and orchestrator assume.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.regions.get(DEFAULT_REGION) {
            Some(list) if !list.is_empty() => {}
            _ => return Err(ConfigError::MissingDefaultRegion),
        }
        if let Some((code, _)) = self.regions.iter().find(|(_, list)| list.is_empty()) {
            return Err(ConfigError::EmptyRegion(code.clone()));
        }

        for src in &self.sources {
            let w = src.trust_weight;
            if !(w > 0.0 && w <= 1.0) {
                return Err(ConfigError::InvalidTrustWeight {
                    code: src.code.clone(),
                    weight: w,
                });
            }
        }

        let f = &self.freshness;
        if f.max_age_minutes == 0 || f.preferred_age_minutes >= f.max_age_minutes {
            return Err(ConfigError::invalid(
                "freshness",
                "preferred_age_minutes must be below a non-zero max_age_minutes",
            ));
        }
        if !(f.min_freshness_weight > 0.0 && f.min_freshness_weight <= 1.0) {
            return Err(ConfigError::invalid(
                "freshness.min_freshness_weight",
                "must be in (0, 1]",
            ));
        }

        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be >= 1"));
        }
        if !(r.backoff_factor >= 1.0) {
            return Err(ConfigError::invalid("retry.backoff_factor", "must be >= 1"));
        }
        if !(r.rate_limit_multiplier >= 2.0) {
            return Err(ConfigError::invalid(
                "retry.rate_limit_multiplier",
                "must be >= 2",
            ));
        }
        if r.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "retry.request_timeout_secs",
                "must be >= 1",
            ));
        }

        if self.fanout.max_concurrency == 0 {
            return Err(ConfigError::invalid("fanout.max_concurrency", "must be >= 1"));
        }
        if let Some(deadline) = self.fanout.request_deadline() {
            let needed = r.worst_case();
            if deadline < needed {
                return Err(ConfigError::invalid(
                    "fanout.request_deadline_secs",
                    format!(
                        "{}s is shorter than the retry worst case of {:.1}s",
                        deadline.as_secs(),
                        needed.as_secs_f64()
                    ),
                ));
            }
        }

        let h = &self.health;
        if h.failure_threshold == 0 {
            return Err(ConfigError::invalid("health.failure_threshold", "must be >= 1"));
        }
        if !(h.smoothing > 0.0 && h.smoothing <= 1.0) {
            return Err(ConfigError::invalid("health.smoothing", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&h.min_success_rate) {
            return Err(ConfigError::invalid(
                "health.min_success_rate",
                "must be in [0, 1]",
            ));
        }
        if !(h.unhealthy_weight_penalty > 0.0 && h.unhealthy_weight_penalty <= 1.0) {
            return Err(ConfigError::invalid(
                "health.unhealthy_weight_penalty",
                "must be in (0, 1]",
            ));
        }

        let c = &self.cache;
        if c.coordinate_precision > 6 {
            return Err(ConfigError::invalid(
                "cache.coordinate_precision",
                "must be <= 6",
            ));
        }
        if c.max_entries == 0 || c.response_ttl_secs == 0 || c.location_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "cache",
                "ttls and max_entries must be non-zero",
            ));
        }

        let s = &self.search;
        if !(s.default_radius_km > 0.0 && s.max_radius_km >= s.default_radius_km) {
            return Err(ConfigError::invalid(
                "search",
                "need 0 < default_radius_km <= max_radius_km",
            ));
        }

        if !(0.0..=100.0).contains(&self.purpleair.min_confidence) {
            return Err(ConfigError::invalid(
                "purpleair.min_confidence",
                "must be in [0, 100]",
            ));
        }
        if !(self.fusion.tie_epsilon >= 0.0) {
            return Err(ConfigError::invalid("fusion.tie_epsilon", "must be >= 0"));
        }
        // Fused values are EPA AQI; categorizing them on another table is wrong.
        if self.fusion.scale != AqiScale::Epa {
            return Err(ConfigError::invalid(
                "fusion.scale",
                "fused values are on the EPA scale; only \"EPA\" is supported",
            ));
        }

        if self.forecast.kind == ForecastKind::Http && self.forecast.url.is_none() {
            return Err(ConfigError::invalid(
                "forecast.url",
                "required when forecast.kind = \"http\"",
            ));
        }

        for (code, spec) in &self.adapters {
            if let AdapterSpec::Http { url, .. } = spec {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidAdapter {
                        code: code.clone(),
                        reason: format!("url must be http(s), got '{url}'"),
                    });
                }
            }
        }

        Ok(())
    }
}
