// src/config/mod.rs
//! Configuration loading.
//!
//! Resolution order:
//! 1) `$AQ_CONFIG_PATH` (must exist if set)
//! 2) `config/fusion.toml`
//! 3) built-in defaults
//!
//! After parsing, `CACHE_TTL_SECONDS` / `LOCATION_CACHE_TTL_SECONDS` from the
//! environment override the cache TTLs, then the result is validated. The
//! loaded value is immutable for the process lifetime.

pub mod settings;

pub use settings::{
    AdapterSpec, CacheSettings, FanoutSettings, FixtureReadingSpec, ForecastKind, ForecastSettings,
    FreshnessSettings, FusionConfig, FusionSettings, HealthSettings, PurpleAirSettings,
    RetrySettings, SearchSettings, DEFAULT_REGION,
};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/fusion.toml";
pub const ENV_CONFIG_PATH: &str = "AQ_CONFIG_PATH";
pub const ENV_RESPONSE_TTL: &str = "CACHE_TTL_SECONDS";
pub const ENV_LOCATION_TTL: &str = "LOCATION_CACHE_TTL_SECONDS";

/// Parse and validate a TOML document. No environment overrides.
pub fn parse_str(s: &str) -> Result<FusionConfig, ConfigError> {
    let cfg: FusionConfig = toml::from_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load from an explicit path, apply env overrides, validate.
pub fn load_from(path: &Path) -> Result<FusionConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: FusionConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    tracing::info!(path = %path.display(), "fusion config loaded");
    Ok(cfg)
}

/// Load using env var + fallbacks (see module docs).
pub fn load_default() -> Result<FusionConfig, ConfigError> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(ConfigError::MissingPath(ENV_CONFIG_PATH));
        }
        return load_from(&pb);
    }
    let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_p.exists() {
        return load_from(&default_p);
    }

    tracing::info!("no fusion config file found, using built-in defaults");
    let mut cfg = FusionConfig::default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut FusionConfig) {
    if let Some(v) = env_u64(ENV_RESPONSE_TTL) {
        cfg.cache.response_ttl_secs = v;
    }
    if let Some(v) = env_u64(ENV_LOCATION_TTL) {
        cfg.cache.location_ttl_secs = v;
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}
