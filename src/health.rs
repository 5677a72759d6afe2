//! # Provider health tracking
//!
//! One record per provider code, shared by every in-flight request. Each record
//! sits behind its own mutex, so updates for one provider never contend with
//! another; the outer map is only write-locked to insert a new code.
//!
//! Rolling success rate is an exponential moving average:
//! `rate = (1 - a) * rate + a * outcome`, with `a = health.smoothing`.
//! A provider is healthy while `consecutive_failures < failure_threshold` and
//! `rate >= min_success_rate`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::HealthSettings;
use crate::metrics::PROVIDER_HEALTHY;

#[derive(Debug, Clone)]
struct ProviderHealth {
    consecutive_failures: u32,
    success_rate: f64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            success_rate: 1.0,
            last_success_at: None,
            last_failure_at: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    fn is_healthy(&self, s: &HealthSettings) -> bool {
        self.consecutive_failures < s.failure_threshold && self.success_rate >= s.min_success_rate
    }
}

/// Read-only view of one provider record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub success_rate: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Debug)]
pub struct HealthTracker {
    settings: HealthSettings,
    records: RwLock<HashMap<String, Arc<Mutex<ProviderHealth>>>>,
}

impl HealthTracker {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-register codes so they show up in snapshots before their first fetch.
    pub fn with_providers<I, S>(settings: HealthSettings, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let t = Self::new(settings);
        {
            let mut map = t.records.write();
            for code in codes {
                map.entry(code.into())
                    .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new())));
            }
        }
        t
    }

    fn record(&self, code: &str) -> Arc<Mutex<ProviderHealth>> {
        if let Some(r) = self.records.read().get(code) {
            return r.clone();
        }
        self.records
            .write()
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new())))
            .clone()
    }

    pub fn record_success(&self, code: &str) {
        self.record_success_at(code, Utc::now());
    }

    pub fn record_success_at(&self, code: &str, at: DateTime<Utc>) {
        let rec = self.record(code);
        let healthy = {
            let mut h = rec.lock();
            let a = self.settings.smoothing;
            h.success_rate = (1.0 - a) * h.success_rate + a;
            h.consecutive_failures = 0;
            h.last_success_at = Some(at);
            h.total_successes += 1;
            h.is_healthy(&self.settings)
        };
        publish(code, healthy);
    }

    pub fn record_failure(&self, code: &str) {
        self.record_failure_at(code, Utc::now());
    }

    pub fn record_failure_at(&self, code: &str, at: DateTime<Utc>) {
        let rec = self.record(code);
        let (healthy, failures) = {
            let mut h = rec.lock();
            let a = self.settings.smoothing;
            h.success_rate = (1.0 - a) * h.success_rate;
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            h.last_failure_at = Some(at);
            h.total_failures += 1;
            (h.is_healthy(&self.settings), h.consecutive_failures)
        };
        if failures == self.settings.failure_threshold {
            tracing::warn!(provider = code, failures, "provider marked unhealthy");
        }
        publish(code, healthy);
    }

    /// Unknown codes are healthy.
    pub fn is_healthy(&self, code: &str) -> bool {
        match self.records.read().get(code) {
            Some(r) => r.lock().is_healthy(&self.settings),
            None => true,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, HealthSnapshot> {
        let map = self.records.read();
        map.iter()
            .map(|(code, rec)| {
                let h = rec.lock();
                (
                    code.clone(),
                    HealthSnapshot {
                        is_healthy: h.is_healthy(&self.settings),
                        success_rate: h.success_rate,
                        last_success_at: h.last_success_at,
                        last_failure_at: h.last_failure_at,
                        consecutive_failures: h.consecutive_failures,
                        total_successes: h.total_successes,
                        total_failures: h.total_failures,
                    },
                )
            })
            .collect()
    }
}

fn publish(code: &str, healthy: bool) {
    gauge!(PROVIDER_HEALTHY, "provider" => code.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
