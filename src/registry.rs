//! # Data source registry
//!
//! Read-only catalog of air quality providers: code, display name, provider
//! type, covered countries, default trust weight in `(0.0, 1.0]` and an
//! active flag.
//!
//! - Built from the `[[sources]]` table of the fusion config.
//! - Lookups normalize the code (case, dashes, spaces), so `"purple-air"`,
//!   `"PurpleAir"` and `"PURPLE_AIR"` resolve alike.
//! - Unknown codes fall back to a conservative default trust weight.
//! - `default_seed()` carries the built-in catalog.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trust weight used for a provider that has no registry entry.
pub const UNKNOWN_SOURCE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Government,
    Commercial,
    Community,
    Aggregator,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub code: String,
    pub name: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub description: String,
    /// ISO country codes the provider covers; empty means global.
    #[serde(default)]
    pub countries: Vec<String>,
    pub trust_weight: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DataSourceDescriptor {
    fn seed(
        code: &str,
        name: &str,
        source_type: SourceType,
        description: &str,
        countries: &[&str],
        trust_weight: f64,
    ) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            source_type,
            description: description.to_string(),
            countries: countries.iter().map(|c| c.to_string()).collect(),
            trust_weight,
            active: true,
        }
    }

    /// Built-in catalog, used when the config carries no `[[sources]]`.
    pub fn default_seed() -> Vec<Self> {
        use SourceType::*;
        vec![
            Self::seed(
                "EPA_AIRNOW",
                "EPA AirNow",
                Government,
                "US EPA reporting-area observations",
                &["US"],
                1.0,
            ),
            Self::seed(
                "ECCC_AQHI",
                "Environment and Climate Change Canada AQHI",
                Government,
                "Canadian Air Quality Health Index observations",
                &["CA"],
                1.0,
            ),
            Self::seed(
                "PURPLEAIR",
                "PurpleAir",
                Community,
                "Low-cost optical PM sensor network",
                &[],
                0.85,
            ),
            Self::seed(
                "BREEZOMETER",
                "BreezoMeter",
                Commercial,
                "Modelled hyperlocal air quality",
                &[],
                0.8,
            ),
            Self::seed(
                "AIRVISUAL",
                "IQAir AirVisual",
                Commercial,
                "Nearest-city air quality",
                &[],
                0.75,
            ),
            Self::seed(
                "OPENWEATHERMAP",
                "OpenWeatherMap Air Pollution",
                Commercial,
                "Modelled pollutant concentrations",
                &[],
                0.7,
            ),
            Self::seed(
                "WAQI",
                "World Air Quality Index",
                Aggregator,
                "Aggregated station feeds",
                &[],
                0.65,
            ),
        ]
    }
}

/// Lookup table keyed by normalized code.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    by_code: HashMap<String, DataSourceDescriptor>,
}

impl SourceRegistry {
    pub fn new(entries: impl IntoIterator<Item = DataSourceDescriptor>) -> Self {
        let by_code = entries
            .into_iter()
            .map(|d| (normalize(&d.code), d))
            .collect();
        Self { by_code }
    }

    pub fn default_seed() -> Self {
        Self::new(DataSourceDescriptor::default_seed())
    }

    pub fn get(&self, code: &str) -> Option<&DataSourceDescriptor> {
        self.by_code.get(&normalize(code))
    }

    /// Configured trust weight, or [`UNKNOWN_SOURCE_WEIGHT`] for unknown codes.
    pub fn trust_weight(&self, code: &str) -> f64 {
        self.get(code)
            .map(|d| clamp01(d.trust_weight))
            .unwrap_or(UNKNOWN_SOURCE_WEIGHT)
    }

    /// Registered and not switched off.
    pub fn is_active(&self, code: &str) -> bool {
        self.get(code).is_some_and(|d| d.active)
    }

    /// All entries, sorted by code.
    pub fn descriptors(&self) -> Vec<&DataSourceDescriptor> {
        let mut v: Vec<_> = self.by_code.values().collect();
        v.sort_by(|a, b| a.code.cmp(&b.code));
        v
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// Uppercase; dashes, dots and whitespace become `_`; runs collapse.
pub fn normalize(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for ch in code.trim().chars() {
        let c = match ch {
            '-' | '.' | '/' | ' ' | '\t' => '_',
            other => other.to_ascii_uppercase(),
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
