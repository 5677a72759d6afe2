//! # Fusion engine
//!
//! Pure combination of provider readings into one [`FusedResult`]:
//!
//! 1. drop readings older than `max_age`;
//! 2. low-cost sensor correction (PurpleAir, EPA 2021 formula), excluding
//!    readings under the confidence floor;
//! 3. keep the nearest surviving reading per provider;
//! 4. weight = trust × freshness × health penalty;
//! 5. order contributors by weight, region priority breaking near-ties;
//! 6. weighted mean AQI, confidence, staleness, category.
//!
//! Given the same readings, route and `now`, the output is identical.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::aqi::{self, AqiScale};
use crate::config::{FreshnessSettings, FusionConfig, PurpleAirSettings};
use crate::model::{Contribution, Coordinate, FusedResult, FusionStatus, LocationInfo, Reading};
use crate::registry::{normalize, SourceRegistry};

#[derive(Debug, Clone)]
pub struct FusionEngine {
    registry: Arc<SourceRegistry>,
    freshness: FreshnessSettings,
    purpleair: PurpleAirSettings,
    purpleair_code: String,
    tie_epsilon: f64,
    scale: AqiScale,
    unhealthy_penalty: f64,
}

impl FusionEngine {
    pub fn new(cfg: &FusionConfig, registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            freshness: cfg.freshness.clone(),
            purpleair_code: normalize(&cfg.purpleair.code),
            purpleair: cfg.purpleair.clone(),
            tie_epsilon: cfg.fusion.tie_epsilon,
            scale: cfg.fusion.scale,
            unhealthy_penalty: cfg.health.unhealthy_weight_penalty,
        }
    }

    pub fn scale(&self) -> AqiScale {
        self.scale
    }

    /// Freshness multiplier for a reading `age_secs` old: 1.0 inside the
    /// preferred window, then linear down to `min_freshness_weight` at max age.
    pub fn freshness_weight(&self, age_secs: i64) -> f64 {
        let pref = self.freshness.preferred_age_secs();
        let max = self.freshness.max_age_secs();
        let floor = self.freshness.min_freshness_weight;
        if age_secs <= pref {
            return 1.0;
        }
        let span = (max - pref).max(1) as f64;
        let t = ((age_secs - pref) as f64 / span).min(1.0);
        (1.0 - (1.0 - floor) * t).clamp(floor, 1.0)
    }

    pub fn fuse(
        &self,
        readings: &[Reading],
        route: &LocationInfo,
        location: Coordinate,
        now: DateTime<Utc>,
    ) -> FusedResult {
        self.fuse_with_penalties(readings, route, &HashSet::new(), location, now)
    }

    /// Like [`fuse`](Self::fuse), with `penalized` providers weighted by the
    /// unhealthy penalty.
    pub fn fuse_with_penalties(
        &self,
        readings: &[Reading],
        route: &LocationInfo,
        penalized: &HashSet<String>,
        location: Coordinate,
        now: DateTime<Utc>,
    ) -> FusedResult {
        let max_age = self.freshness.max_age_secs();

        // Nearest surviving reading per provider, in first-seen order.
        let mut picked: Vec<(Reading, Option<i32>)> = Vec::new();
        for r in readings {
            if r.age_secs(now) > max_age {
                tracing::debug!(provider = %r.provider, age_secs = r.age_secs(now), "dropping stale reading");
                continue;
            }
            let Some((value, raw)) = self.correct(r) else {
                continue;
            };
            let mut r = r.clone();
            r.aqi = value;
            match picked.iter_mut().find(|(p, _)| p.provider == r.provider) {
                Some(slot) if r.distance_km < slot.0.distance_km => *slot = (r, raw),
                Some(_) => {}
                None => picked.push((r, raw)),
            }
        }

        if picked.is_empty() {
            return FusedResult::degraded(route.region.clone(), location, now);
        }

        let mut contributions: Vec<Contribution> = picked
            .into_iter()
            .map(|(r, raw_aqi)| {
                let age_secs = r.age_secs(now);
                let trust = self.registry.trust_weight(&r.provider);
                let fresh = self.freshness_weight(age_secs);
                let penalty = if penalized.contains(&r.provider) {
                    self.unhealthy_penalty
                } else {
                    1.0
                };
                Contribution {
                    native_category: r.native.map(|n| aqi::categorize(n.value, n.scale)),
                    provider: r.provider,
                    aqi: r.aqi,
                    raw_aqi,
                    effective_weight: trust * fresh * penalty,
                    trust_weight: trust,
                    freshness_weight: fresh,
                    age_secs,
                    distance_km: r.distance_km,
                    observed_at: r.observed_at,
                    native: r.native,
                    station: r.station,
                }
            })
            .collect();

        self.order(&mut contributions, &route.providers);

        let total_w: f64 = contributions.iter().map(|c| c.effective_weight).sum();
        if !(total_w > 0.0) {
            return FusedResult::degraded(route.region.clone(), location, now);
        }
        let weighted: f64 = contributions
            .iter()
            .map(|c| c.effective_weight * f64::from(c.aqi))
            .sum();
        let fused = (weighted / total_w).round() as i32;
        let confidence = (total_w / contributions.len() as f64).clamp(0.0, 1.0);
        let pref = self.freshness.preferred_age_secs();
        let is_stale = !contributions.iter().any(|c| c.age_secs <= pref);

        FusedResult {
            status: FusionStatus::Fused,
            aqi: Some(fused),
            category: Some(aqi::categorize(fused, self.scale)),
            primary_source: contributions.first().map(|c| c.provider.clone()),
            sources: contributions,
            confidence,
            is_stale,
            region: route.region.clone(),
            location,
            fetched_at: now,
            forecast: None,
            from_cache: false,
        }
    }

    /// Corrected AQI plus the pre-correction value, or `None` to exclude.
    fn correct(&self, r: &Reading) -> Option<(i32, Option<i32>)> {
        if !self.purpleair.epa_correction || normalize(&r.provider) != self.purpleair_code {
            return Some((r.aqi, None));
        }
        match r.confidence {
            Some(c) if c >= self.purpleair.min_confidence => {}
            _ => {
                tracing::debug!(provider = %r.provider, confidence = ?r.confidence, "below confidence floor");
                return None;
            }
        }
        let pa = r
            .pollutants
            .get("pm25")
            .copied()
            .unwrap_or_else(|| aqi::aqi_to_pm25(r.aqi));
        let rh = r.humidity.unwrap_or(self.purpleair.default_humidity);
        let corrected = (0.52 * pa - 0.086 * rh + 5.75).max(0.0);
        Some((aqi::pm25_to_aqi(corrected), Some(r.aqi)))
    }

    /// Weight descending; runs of weights within `tie_epsilon` of the run's
    /// heaviest member are re-ordered by region priority, then code.
    fn order(&self, cs: &mut [Contribution], priority: &[String]) {
        cs.sort_by(|a, b| {
            b.effective_weight
                .total_cmp(&a.effective_weight)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        let rank = |code: &str| {
            priority
                .iter()
                .position(|p| p == code)
                .unwrap_or(priority.len())
        };
        let mut start = 0;
        while start < cs.len() {
            let lead = cs[start].effective_weight;
            let mut end = start + 1;
            while end < cs.len() && lead - cs[end].effective_weight <= self.tie_epsilon {
                end += 1;
            }
            cs[start..end].sort_by(|a, b| {
                rank(&a.provider)
                    .cmp(&rank(&b.provider))
                    .then_with(|| a.provider.cmp(&b.provider))
            });
            start = end;
        }
    }
}
