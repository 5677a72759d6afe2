//! Domain types shared by adapters, the fusion engine and the orchestrator.
//!
//! `FusedResult` is the shape the service returns; it is built once by the
//! fusion engine and then only copied (cache hits flip `from_cache`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aqi::{AqiScale, CategoryInfo};
use crate::error::CoordinateError;
use crate::forecast::ForecastData;

/// WGS84 point. Construct through [`Coordinate::new`] at the boundary; the core
/// assumes the range invariant holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }
}

/// Index value as reported by a provider on its own scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeIndex {
    pub scale: AqiScale,
    pub value: i32,
}

/// One provider observation near the query point. `aqi` is already on the
/// fusion scale (US EPA).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub provider: String,
    pub aqi: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeIndex>,
    /// Pollutant code (e.g. "pm25", "o3") to concentration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pollutants: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub distance_km: f64,
    /// Provider-reported confidence in [0, 100].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
}

impl Reading {
    pub fn new(provider: impl Into<String>, aqi: i32, observed_at: DateTime<Utc>) -> Self {
        Self {
            provider: provider.into(),
            aqi,
            native: None,
            pollutants: BTreeMap::new(),
            humidity: None,
            observed_at,
            distance_km: 0.0,
            confidence: None,
            station: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 100.0));
        self
    }

    pub fn with_pollutant(mut self, code: impl Into<String>, concentration: f64) -> Self {
        self.pollutants.insert(code.into(), concentration);
        self
    }

    pub fn with_humidity(mut self, rh: f64) -> Self {
        self.humidity = Some(rh);
        self
    }

    pub fn with_native(mut self, scale: AqiScale, value: i32) -> Self {
        self.native = Some(NativeIndex { scale, value });
        self
    }

    pub fn at_distance(mut self, km: f64) -> Self {
        self.distance_km = km;
        self
    }

    /// Age relative to `now`; readings stamped in the future count as age zero.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FusionStatus {
    Fused,
    /// No reading survived filtering. A valid, zero-confidence answer.
    DegradedNoData,
}

/// A reading that made it into the fused value, with the weight it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub provider: String,
    pub aqi: i32,
    /// AQI before a provider-specific correction, when one was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_aqi: Option<i32>,
    pub effective_weight: f64,
    pub trust_weight: f64,
    pub freshness_weight: f64,
    pub age_secs: i64,
    pub distance_km: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_category: Option<CategoryInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub status: FusionStatus,
    pub aqi: Option<i32>,
    pub category: Option<CategoryInfo>,
    /// Contributors ordered by effective weight, region priority on ties.
    pub sources: Vec<Contribution>,
    pub primary_source: Option<String>,
    pub confidence: f64,
    pub is_stale: bool,
    pub region: String,
    pub location: Coordinate,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastData>,
    #[serde(default)]
    pub from_cache: bool,
}

impl FusedResult {
    pub fn is_degraded(&self) -> bool {
        self.status == FusionStatus::DegradedNoData
    }

    /// Degraded answer: no AQI, no category, explicitly stale.
    pub fn degraded(region: impl Into<String>, location: Coordinate, now: DateTime<Utc>) -> Self {
        Self {
            status: FusionStatus::DegradedNoData,
            aqi: None,
            category: None,
            sources: Vec::new(),
            primary_source: None,
            confidence: 0.0,
            is_stale: true,
            region: region.into(),
            location,
            fetched_at: now,
            forecast: None,
            from_cache: false,
        }
    }

    pub fn with_forecast(mut self, forecast: Option<ForecastData>) -> Self {
        self.forecast = forecast;
        self
    }
}

/// Cached outcome of a region lookup for a rounded coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub region: String,
    pub providers: Vec<String>,
}
