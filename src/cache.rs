//! # Result cache
//!
//! Two namespaces over one [`CacheStore`]:
//! - fused results, short TTL (`cache.response_ttl_secs`);
//! - region lookups, long TTL (`cache.location_ttl_secs`).
//!
//! Keys round coordinates to `coordinate_precision` decimals so that nearby
//! repeated queries collide. Values are stored as JSON so an external store
//! can stand in for [`MemoryCache`]. Concurrent writers to one key race;
//! the last write wins.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::CacheSettings;
use crate::model::{Coordinate, FusedResult, LocationInfo};

const KEY_PREFIX: &str = "aq:v1";

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Bounded in-process LRU with lazy expiry.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            Some(e) if e.expires_at > Instant::now() => return Some(e.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            map.pop(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.lock().put(key.to_string(), entry);
    }
}

/// Typed front for the two cache namespaces.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    response_ttl: Duration,
    location_ttl: Duration,
    precision: u32,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        Self {
            store,
            response_ttl: settings.response_ttl(),
            location_ttl: settings.location_ttl(),
            precision: settings.coordinate_precision,
        }
    }

    pub fn in_memory(settings: &CacheSettings) -> Self {
        Self::new(Arc::new(MemoryCache::new(settings.max_entries)), settings)
    }

    fn round(&self, x: f64) -> i64 {
        (x * 10f64.powi(self.precision as i32)).round() as i64
    }

    /// `aq:v1:{lat}:{lon}:p{precision}:r{radius_tenths}:f{0|1}`, coordinates as
    /// integers scaled by `10^precision`.
    pub fn fused_key(&self, c: Coordinate, radius_km: f64, include_forecast: bool) -> String {
        format!(
            "{KEY_PREFIX}:{}:{}:p{}:r{}:f{}",
            self.round(c.lat),
            self.round(c.lon),
            self.precision,
            (radius_km * 10.0).round() as i64,
            u8::from(include_forecast),
        )
    }

    pub fn location_key(&self, c: Coordinate) -> String {
        format!(
            "{KEY_PREFIX}:loc:{}:{}:p{}",
            self.round(c.lat),
            self.round(c.lon),
            self.precision
        )
    }

    pub async fn get_fused(&self, key: &str) -> Option<FusedResult> {
        let v = self.store.get(key).await?;
        match serde_json::from_value(v) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn put_fused(&self, key: &str, result: &FusedResult) {
        match serde_json::to_value(result) {
            Ok(v) => self.store.set(key, v, self.response_ttl).await,
            Err(e) => tracing::warn!(key, error = %e, "fused result not cacheable"),
        }
    }

    pub async fn get_location(&self, c: Coordinate) -> Option<LocationInfo> {
        let v = self.store.get(&self.location_key(c)).await?;
        serde_json::from_value(v).ok()
    }

    pub async fn put_location(&self, c: Coordinate, info: &LocationInfo) {
        if let Ok(v) = serde_json::to_value(info) {
            self.store
                .set(&self.location_key(c), v, self.location_ttl)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cache() -> ResultCache {
        ResultCache::in_memory(&CacheSettings::default())
    }

    fn at(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn nearby_coordinates_share_a_key() {
        let c = cache();
        let a = c.fused_key(at(34.0500, -118.2400), 25.0, false);
        let b = c.fused_key(at(34.0501, -118.2399), 25.0, false);
        assert_eq!(a, b);
        assert_eq!(a, "aq:v1:34050:-118240:p3:r250:f0");
    }

    #[test]
    fn radius_and_forecast_flag_split_keys() {
        let c = cache();
        let base = c.fused_key(at(34.05, -118.24), 25.0, false);
        assert_ne!(base, c.fused_key(at(34.05, -118.24), 30.0, false));
        assert_ne!(base, c.fused_key(at(34.05, -118.24), 25.0, true));
        assert_ne!(base, c.fused_key(at(34.06, -118.24), 25.0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn fused_entries_expire_after_response_ttl() {
        let c = cache();
        let key = c.fused_key(at(1.0, 2.0), 25.0, false);
        let r = FusedResult::degraded("DEFAULT", at(1.0, 2.0), Utc::now());
        c.put_fused(&key, &r).await;
        assert_eq!(c.get_fused(&key).await, Some(r));

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(c.get_fused(&key).await.is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(c.get_fused(&key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn location_entries_outlive_responses() {
        let c = cache();
        let info = LocationInfo {
            region: "CA".into(),
            providers: vec!["ECCC_AQHI".into()],
        };
        c.put_location(at(45.5, -73.57), &info).await;
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(c.get_location(at(45.5001, -73.5701)).await, Some(info));
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(c.get_location(at(45.5, -73.57)).await.is_none());
    }

    #[tokio::test]
    async fn memory_cache_is_bounded() {
        let m = MemoryCache::new(2);
        for k in ["a", "b", "c"] {
            m.set(k, Value::from(1), Duration::from_secs(60)).await;
        }
        assert_eq!(m.len(), 2);
        assert!(m.get("a").await.is_none());
        assert!(m.get("c").await.is_some());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let m = MemoryCache::new(8);
        m.set("k", Value::from(1), Duration::from_secs(60)).await;
        m.set("k", Value::from(2), Duration::from_secs(60)).await;
        assert_eq!(m.get("k").await, Some(Value::from(2)));
    }
}
