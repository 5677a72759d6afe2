// src/adapter/fixture.rs
//! In-process adapters: [`FixtureAdapter`] serves configured readings for local
//! runs and demos; [`ScriptedAdapter`] replays a queue of outcomes for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use super::{AirQualityAdapter, FetchQuery};
use crate::config::FixtureReadingSpec;
use crate::error::ProviderError;
use crate::model::Reading;

/// Static readings, re-stamped relative to the fetch time so that configured
/// ages stay meaningful however long the process runs.
pub struct FixtureAdapter {
    code: String,
    readings: Vec<FixtureReadingSpec>,
}

impl FixtureAdapter {
    pub fn from_specs(code: impl Into<String>, readings: Vec<FixtureReadingSpec>) -> Self {
        Self {
            code: code.into(),
            readings,
        }
    }

    fn materialize(&self, spec: &FixtureReadingSpec) -> Reading {
        let observed_at = Utc::now() - chrono::Duration::minutes(spec.age_minutes);
        let mut r = Reading::new(self.code.clone(), spec.aqi, observed_at).at_distance(spec.distance_km);
        if let Some(c) = spec.confidence {
            r = r.with_confidence(c);
        }
        if let Some(pm) = spec.pm25 {
            r = r.with_pollutant("pm25", pm);
        }
        if let Some(rh) = spec.humidity {
            r = r.with_humidity(rh);
        }
        if let (Some(scale), Some(value)) = (spec.native_scale, spec.native_value) {
            r = r.with_native(scale, value);
        }
        r.station = spec.station.clone();
        r
    }
}

#[async_trait::async_trait]
impl AirQualityAdapter for FixtureAdapter {
    fn code(&self) -> &str {
        &self.code
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Reading>, ProviderError> {
        let mut out: Vec<Reading> = self
            .readings
            .iter()
            .filter(|s| s.distance_km <= query.radius_km)
            .map(|s| self.materialize(s))
            .collect();
        out.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(out)
    }
}

type Step = Result<Vec<Reading>, ProviderError>;

/// Replays queued outcomes in order, then repeats the fallback forever.
pub struct ScriptedAdapter {
    code: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(Vec::new()),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn then_ok(self, readings: Vec<Reading>) -> Self {
        self.script.lock().push_back(Ok(readings));
        self
    }

    pub fn then_err(self, err: ProviderError) -> Self {
        self.script.lock().push_back(Err(err));
        self
    }

    pub fn otherwise_ok(mut self, readings: Vec<Reading>) -> Self {
        self.fallback = Ok(readings);
        self
    }

    pub fn otherwise_err(mut self, err: ProviderError) -> Self {
        self.fallback = Err(err);
        self
    }

    /// Sleep this long inside every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AirQualityAdapter for ScriptedAdapter {
    fn code(&self) -> &str {
        &self.code
    }

    async fn fetch(&self, _query: &FetchQuery) -> Result<Vec<Reading>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
