//! End-to-end orchestrator behaviour against scripted adapters.
//!
//! Covered:
//! - weighted consensus of three fresh providers
//! - every provider timing out -> degraded-no-data, health failures recorded
//! - stale reading excluded entirely
//! - fail, fail, succeed -> exactly one health success
//! - cache hit for nearby coordinates, write-through with use_cache=false,
//!   degraded results never cached
//! - cancellation token and request deadline abandon in-flight fetches
//! - one hanging provider: full retry budget, answer still cached
//! - dropping a request stops its fetches and records them as failures
//! - concurrency cap, unhealthy providers demoted and penalized
//! - forecast success / failure / timeout
//! - radius clamp

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use air_quality_fusion::adapter::{
    AdapterMap, AirQualityAdapter, FixtureAdapter, ScriptedAdapter,
};
use air_quality_fusion::config::FixtureReadingSpec;
use air_quality_fusion::forecast::{FixtureForecast, ForecastData, ForecastPoint};
use air_quality_fusion::{
    AirQualityRequest, Coordinate, FusionConfig, FusionStatus, Orchestrator, ProviderError,
    Reading,
};

struct Harness {
    orch: Orchestrator,
    adapters: HashMap<String, Arc<ScriptedAdapter>>,
}

impl Harness {
    fn new(cfg: FusionConfig, scripted: Vec<ScriptedAdapter>) -> Self {
        let mut adapters = HashMap::new();
        let mut map: AdapterMap = HashMap::new();
        for a in scripted {
            let a = Arc::new(a);
            let code = a.code().to_string();
            map.insert(code.clone(), a.clone() as Arc<dyn AirQualityAdapter>);
            adapters.insert(code, a);
        }
        let orch = Orchestrator::new(Arc::new(cfg), map).expect("valid config");
        Self { orch, adapters }
    }

    fn calls(&self, code: &str) -> u32 {
        self.adapters[code].calls()
    }

    fn total_calls(&self) -> u32 {
        self.adapters.values().map(|a| a.calls()).sum()
    }
}

/// Plain arithmetic: no low-cost sensor correction.
fn cfg() -> FusionConfig {
    let mut c = FusionConfig::default();
    c.purpleair.epa_correction = false;
    c
}

fn los_angeles() -> Coordinate {
    Coordinate::new(34.0500, -118.2400).unwrap()
}

fn reading(code: &str, aqi: i32, age_minutes: i64) -> Reading {
    Reading::new(code, aqi, Utc::now() - chrono::Duration::minutes(age_minutes))
}

fn ok(code: &str, aqi: i32, age_minutes: i64) -> ScriptedAdapter {
    ScriptedAdapter::new(code).otherwise_ok(vec![reading(code, aqi, age_minutes)])
}

fn hanging(code: &str) -> ScriptedAdapter {
    ScriptedAdapter::new(code)
        .with_delay(Duration::from_secs(600))
        .otherwise_ok(vec![])
}

#[tokio::test]
async fn scenario_a_three_fresh_providers() {
    let h = Harness::new(
        cfg(),
        vec![
            ok("EPA_AIRNOW", 50, 5),
            ok("PURPLEAIR", 60, 5),
            ok("OPENWEATHERMAP", 70, 5),
        ],
    );
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;

    assert_eq!(r.status, FusionStatus::Fused);
    let aqi = r.aqi.expect("fused value");
    assert!((58..=59).contains(&aqi), "aqi {aqi}");
    assert!(r.confidence >= 0.8, "confidence {}", r.confidence);
    assert_eq!(r.sources.len(), 3);
    assert_eq!(r.region, "US");
    assert_eq!(r.primary_source.as_deref(), Some("EPA_AIRNOW"));
    assert!(!r.from_cache);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_all_providers_time_out() {
    let h = Harness::new(
        cfg(),
        vec![
            hanging("EPA_AIRNOW"),
            hanging("PURPLEAIR"),
            hanging("OPENWEATHERMAP"),
        ],
    );

    let started = Instant::now();
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    // Three 10s attempts plus 0.5s and 1s of backoff, inside the deadline.
    let took = started.elapsed();
    assert!(took >= Duration::from_millis(31_500) && took < Duration::from_secs(32));
    assert_eq!(r.status, FusionStatus::DegradedNoData);
    assert!(r.aqi.is_none());
    assert!(r.is_stale);

    let snap = h.orch.health_snapshot();
    for code in ["EPA_AIRNOW", "PURPLEAIR", "OPENWEATHERMAP"] {
        assert_eq!(snap[code].consecutive_failures, 1, "{code}");
        assert_eq!(h.calls(code), 3, "{code} retried to the cap");
    }

    // Two more rounds reach the threshold.
    for _ in 0..2 {
        h.orch
            .get_air_quality(AirQualityRequest::new(los_angeles()))
            .await;
    }
    let snap = h.orch.health_snapshot();
    assert!(snap.values().all(|s| !s.is_healthy));
    assert_eq!(h.orch.service_status().status, "degraded");
}

#[tokio::test]
async fn scenario_c_stale_reading_is_excluded() {
    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 150, 240), ok("WAQI", 42, 10)]);
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert_eq!(r.aqi, Some(42));
    assert_eq!(r.sources.len(), 1);
    assert_eq!(r.sources[0].provider, "WAQI");
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success_records_one_success() {
    let epa = ScriptedAdapter::new("EPA_AIRNOW")
        .then_err(ProviderError::Unreachable("reset".into()))
        .then_err(ProviderError::Timeout(Duration::from_secs(10)))
        .otherwise_ok(vec![reading("EPA_AIRNOW", 33, 2)]);
    let h = Harness::new(cfg(), vec![epa]);

    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert_eq!(r.aqi, Some(33));

    let snap = &h.orch.health_snapshot()["EPA_AIRNOW"];
    assert_eq!(h.calls("EPA_AIRNOW"), 3);
    assert_eq!(snap.total_successes, 1);
    assert_eq!(snap.total_failures, 0);
    assert_eq!(snap.consecutive_failures, 0);
}

#[tokio::test]
async fn nearby_repeat_is_served_from_cache() {
    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 44, 5), ok("WAQI", 48, 5)]);
    let first = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert!(!first.from_cache);
    let calls = h.total_calls();

    let near = Coordinate::new(34.0501, -118.2399).unwrap();
    let second = h.orch.get_air_quality(AirQualityRequest::new(near)).await;
    assert!(second.from_cache);
    assert_eq!(second.aqi, first.aqi);
    assert_eq!(h.total_calls(), calls);

    // Different radius is a different key.
    let wider = h
        .orch
        .get_air_quality(AirQualityRequest::new(near).with_radius(50.0))
        .await;
    assert!(!wider.from_cache);
}

#[tokio::test]
async fn bypassing_cache_still_writes_through() {
    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 44, 5)]);
    let fresh = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()).bypass_cache())
        .await;
    assert!(!fresh.from_cache);
    assert_eq!(h.calls("EPA_AIRNOW"), 1);

    let again = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert!(again.from_cache);
    assert_eq!(h.calls("EPA_AIRNOW"), 1);
}

#[tokio::test]
async fn degraded_results_are_not_cached() {
    let h = Harness::new(
        cfg(),
        vec![ScriptedAdapter::new("EPA_AIRNOW")
            .then_err(ProviderError::InvalidResponse("garbage".into()))
            .otherwise_ok(vec![reading("EPA_AIRNOW", 20, 1)])],
    );
    let first = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert!(first.is_degraded());
    assert_eq!(h.calls("EPA_AIRNOW"), 1, "invalid response is not retried");

    let second = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert!(!second.from_cache);
    assert_eq!(second.aqi, Some(20));
}

#[tokio::test(start_paused = true)]
async fn cancellation_abandons_in_flight_fetches() {
    let h = Harness::new(cfg(), vec![hanging("EPA_AIRNOW"), ok("WAQI", 40, 5)]);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let r = h
        .orch
        .get_air_quality_with_cancel(AirQualityRequest::new(los_angeles()), token)
        .await;
    assert!(started.elapsed() < Duration::from_secs(2));

    // WAQI answered before the cancel; EPA was abandoned and counted.
    assert_eq!(r.aqi, Some(40));
    let snap = h.orch.health_snapshot();
    assert_eq!(snap["EPA_AIRNOW"].consecutive_failures, 1);
    assert_eq!(snap["WAQI"].total_successes, 1);

    // A cancelled request leaves nothing in the cache.
    let again = h
        .orch
        .get_air_quality_with_cancel(
            AirQualityRequest::new(los_angeles()),
            {
                let t = CancellationToken::new();
                t.cancel();
                t
            },
        )
        .await;
    assert!(!again.from_cache);
}

#[tokio::test(start_paused = true)]
async fn one_hanging_provider_still_yields_a_cached_answer() {
    let h = Harness::new(cfg(), vec![hanging("EPA_AIRNOW"), ok("WAQI", 40, 5)]);

    let started = Instant::now();
    let first = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    let took = started.elapsed();
    assert!(took >= Duration::from_millis(31_500) && took < Duration::from_secs(32));
    assert_eq!(first.aqi, Some(40));
    assert_eq!(h.calls("EPA_AIRNOW"), 3, "full retry budget used");

    let started = Instant::now();
    let second = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert!(second.from_cache);
    assert!(started.elapsed() < Duration::from_millis(1));
    assert_eq!(h.calls("WAQI"), 1);
    assert_eq!(h.calls("EPA_AIRNOW"), 3);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_bounds_the_fan_out() {
    // Every answer is a rate limit asking for 60s; each wait is capped at 20s,
    // so the third attempt would start at 40s, past the 35s deadline.
    let throttled = |code: &str| {
        ScriptedAdapter::new(code).otherwise_err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        })
    };
    let h = Harness::new(cfg(), vec![throttled("EPA_AIRNOW"), throttled("WAQI")]);

    let started = Instant::now();
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    let took = started.elapsed();
    assert!(took >= Duration::from_secs(35) && took < Duration::from_secs(36));
    assert!(r.is_degraded());
    assert_eq!(h.calls("EPA_AIRNOW"), 2);
    assert!(h
        .orch
        .health_snapshot()
        .values()
        .all(|s| s.consecutive_failures == 1));
}

#[tokio::test(start_paused = true)]
async fn dropped_request_stops_its_fetches_and_counts_them() {
    let Harness { orch, adapters } = Harness::new(
        cfg(),
        vec![ScriptedAdapter::new("EPA_AIRNOW")
            .with_delay(Duration::from_secs(30))
            .otherwise_ok(vec![])],
    );
    let orch = Arc::new(orch);

    let running = {
        let orch = orch.clone();
        tokio::spawn(async move {
            orch.get_air_quality(AirQualityRequest::new(los_angeles()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(adapters["EPA_AIRNOW"].calls(), 1);

    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    // Well past every retry the fetch would have made.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(adapters["EPA_AIRNOW"].calls(), 1);
    let snap = &orch.health_snapshot()["EPA_AIRNOW"];
    assert_eq!(snap.total_failures, 1);
    assert_eq!(snap.total_successes, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_serializes_fetches() {
    let slow = |code: &str| {
        ScriptedAdapter::new(code)
            .with_delay(Duration::from_secs(1))
            .otherwise_ok(vec![reading(code, 30, 1)])
    };

    let mut one = cfg();
    one.fanout.max_concurrency = 1;
    let h = Harness::new(
        one,
        vec![slow("EPA_AIRNOW"), slow("PURPLEAIR"), slow("WAQI")],
    );
    let started = Instant::now();
    h.orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    let took = started.elapsed();
    assert!(took >= Duration::from_secs(3) && took < Duration::from_millis(3500));

    let h = Harness::new(
        cfg(),
        vec![slow("EPA_AIRNOW"), slow("PURPLEAIR"), slow("WAQI")],
    );
    let started = Instant::now();
    h.orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    let took = started.elapsed();
    assert!(took >= Duration::from_secs(1) && took < Duration::from_millis(1500));
}

#[tokio::test]
async fn unhealthy_provider_is_still_queried_but_penalized() {
    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 100, 5), ok("WAQI", 40, 5)]);
    for _ in 0..3 {
        h.orch.health().record_failure("EPA_AIRNOW");
    }
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;

    assert_eq!(h.calls("EPA_AIRNOW"), 1);
    assert_eq!(r.primary_source.as_deref(), Some("WAQI"));
    let epa = r
        .sources
        .iter()
        .find(|c| c.provider == "EPA_AIRNOW")
        .unwrap();
    assert!((epa.effective_weight - 0.5).abs() < 1e-9);
    // Success self-heals the record.
    assert!(h.orch.health().is_healthy("EPA_AIRNOW"));
}

#[tokio::test]
async fn one_failing_provider_does_not_fail_the_request() {
    let h = Harness::new(
        cfg(),
        vec![
            ScriptedAdapter::new("EPA_AIRNOW")
                .otherwise_err(ProviderError::InvalidResponse("bad".into())),
            ok("WAQI", 61, 5),
        ],
    );
    let r = h
        .orch
        .get_air_quality(AirQualityRequest::new(los_angeles()))
        .await;
    assert_eq!(r.aqi, Some(61));
    assert_eq!(h.orch.health_snapshot()["EPA_AIRNOW"].total_failures, 1);
}

fn forecast_data() -> ForecastData {
    ForecastData {
        source: "fixture".into(),
        generated_at: Utc::now(),
        points: vec![ForecastPoint {
            valid_at: Utc::now() + chrono::Duration::hours(1),
            aqi: 63,
        }],
    }
}

#[tokio::test(start_paused = true)]
async fn forecast_is_attached_or_quietly_omitted() {
    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 44, 5)]);
    let orch = h
        .orch
        .with_forecast(Arc::new(FixtureForecast::new(forecast_data())));
    let r = orch
        .get_air_quality(AirQualityRequest::new(los_angeles()).with_forecast(true))
        .await;
    assert_eq!(r.forecast.as_ref().map(|f| f.points[0].aqi), Some(63));

    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 44, 5)]);
    let orch = h.orch.with_forecast(Arc::new(FixtureForecast::failing()));
    let r = orch
        .get_air_quality(AirQualityRequest::new(los_angeles()).with_forecast(true))
        .await;
    assert_eq!(r.aqi, Some(44));
    assert!(r.forecast.is_none());

    let h = Harness::new(cfg(), vec![ok("EPA_AIRNOW", 44, 5)]);
    let orch = h.orch.with_forecast(Arc::new(
        FixtureForecast::new(forecast_data()).with_delay(Duration::from_secs(60)),
    ));
    let r = orch
        .get_air_quality(AirQualityRequest::new(los_angeles()).with_forecast(true))
        .await;
    assert_eq!(r.aqi, Some(44));
    assert!(r.forecast.is_none());
}

#[tokio::test]
async fn radius_is_clamped_to_the_maximum() {
    let spec = |aqi, distance_km| FixtureReadingSpec {
        aqi,
        age_minutes: 5,
        distance_km,
        confidence: None,
        pm25: None,
        humidity: None,
        native_scale: None,
        native_value: None,
        station: None,
    };
    let fixture = FixtureAdapter::from_specs("WAQI", vec![spec(40, 80.0), spec(200, 150.0)]);
    let map: AdapterMap = [(
        "WAQI".to_string(),
        Arc::new(fixture) as Arc<dyn AirQualityAdapter>,
    )]
    .into_iter()
    .collect();
    let orch = Orchestrator::new(Arc::new(cfg()), map).unwrap();

    let r = orch
        .get_air_quality(AirQualityRequest::new(los_angeles()).with_radius(500.0))
        .await;
    assert_eq!(r.aqi, Some(40));

    let key = orch.cache().fused_key(los_angeles(), 100.0, false);
    assert!(orch.cache().get_fused(&key).await.is_some());
}
