// src/adapter/retry.rs
//! Bounded retry with exponential backoff around a single adapter.
//!
//! - attempt `n` (1-based) that fails waits `base * factor^(n-1)`, capped at
//!   `max_delay`, before attempt `n + 1`;
//! - `RateLimited` multiplies that wait by `rate_limit_multiplier` and honours
//!   a `Retry-After` hint when it is longer;
//! - `InvalidResponse` ends the sequence immediately;
//! - every attempt runs under `attempt_timeout`.
//!
//! The wrapper never touches health; the caller records one outcome per
//! sequence from the returned [`FetchReport`].

use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;

use super::{AirQualityAdapter, FetchQuery};
use crate::config::RetrySettings;
use crate::error::ProviderError;
use crate::metrics::PROVIDER_ATTEMPTS_TOTAL;
use crate::model::Reading;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub rate_limit_multiplier: f64,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_factor: s.backoff_factor,
            rate_limit_multiplier: s.rate_limit_multiplier,
            attempt_timeout: Duration::from_secs(s.request_timeout_secs),
        }
    }

    /// Plain backoff after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Wait before the next attempt, given how attempt `attempt` failed.
    pub fn delay_after(&self, attempt: u32, err: &ProviderError) -> Duration {
        let plain = self.backoff(attempt);
        match err {
            ProviderError::RateLimited { retry_after } => {
                let boosted = plain.mul_f64(self.rate_limit_multiplier);
                let hinted = retry_after.unwrap_or_default().max(boosted);
                hinted.min(self.max_delay.mul_f64(self.rate_limit_multiplier))
            }
            _ => plain,
        }
    }
}

/// Outcome of one retry sequence for one provider.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub provider: String,
    pub outcome: Result<Vec<Reading>, ProviderError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl FetchReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub async fn fetch_with_retry(
    adapter: &dyn AirQualityAdapter,
    query: &FetchQuery,
    policy: &RetryPolicy,
) -> FetchReport {
    let started = Instant::now();
    let code = adapter.code().to_string();
    let query = FetchQuery {
        timeout: policy.attempt_timeout,
        ..*query
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        counter!(PROVIDER_ATTEMPTS_TOTAL, "provider" => code.clone()).increment(1);

        let res = match tokio::time::timeout(policy.attempt_timeout, adapter.fetch(&query)).await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout(policy.attempt_timeout)),
        };

        match res {
            Ok(readings) => {
                return FetchReport {
                    provider: code,
                    outcome: Ok(readings),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt, &e);
                tracing::debug!(
                    provider = %code,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retrying provider"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return FetchReport {
                    provider: code,
                    outcome: Err(e),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ScriptedAdapter;
    use crate::model::Coordinate;
    use chrono::Utc;

    fn query() -> FetchQuery {
        FetchQuery {
            coordinate: Coordinate::new(34.05, -118.24).unwrap(),
            radius_km: 25.0,
            timeout: Duration::from_secs(10),
        }
    }

    fn reading() -> Reading {
        Reading::new("EPA_AIRNOW", 42, Utc::now())
    }

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(10), Duration::from_millis(10_000));
    }

    #[test]
    fn rate_limit_at_least_doubles_and_respects_hint() {
        let p = RetryPolicy::default();
        let rl = ProviderError::RateLimited { retry_after: None };
        assert_eq!(p.delay_after(1, &rl), Duration::from_millis(1000));
        let hinted = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(p.delay_after(1, &hinted), Duration::from_secs(7));
        let huge = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(p.delay_after(1, &huge), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success() {
        let a = ScriptedAdapter::new("EPA_AIRNOW")
            .then_err(ProviderError::Unreachable("reset".into()))
            .then_err(ProviderError::Timeout(Duration::from_secs(1)))
            .then_ok(vec![reading()]);
        let start = Instant::now();
        let rep = fetch_with_retry(&a, &query(), &RetryPolicy::default()).await;
        assert!(rep.is_success());
        assert_eq!(rep.attempts, 3);
        assert_eq!(a.calls(), 3);
        // 500ms + 1000ms of backoff, no time spent in the adapter.
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_error() {
        let a = ScriptedAdapter::new("WAQI")
            .otherwise_err(ProviderError::Unreachable("down".into()));
        let rep = fetch_with_retry(&a, &query(), &RetryPolicy::default()).await;
        assert_eq!(rep.attempts, 3);
        assert!(matches!(rep.outcome, Err(ProviderError::Unreachable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_adapter_times_out_per_attempt() {
        let a = ScriptedAdapter::new("SLOW")
            .with_delay(Duration::from_secs(60))
            .otherwise_ok(vec![]);
        let start = Instant::now();
        let rep = fetch_with_retry(&a, &query(), &RetryPolicy::default()).await;
        assert_eq!(rep.attempts, 3);
        assert_eq!(
            rep.outcome.unwrap_err(),
            ProviderError::Timeout(Duration::from_secs(10))
        );
        // 3 x 10s timeouts + 0.5s + 1s backoff.
        assert_eq!(start.elapsed(), Duration::from_millis(31_500));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_response_is_not_retried() {
        let a = ScriptedAdapter::new("BAD")
            .otherwise_err(ProviderError::InvalidResponse("not json".into()));
        let rep = fetch_with_retry(&a, &query(), &RetryPolicy::default()).await;
        assert_eq!(rep.attempts, 1);
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_backs_off_harder_but_stays_bounded() {
        let a = ScriptedAdapter::new("PURPLEAIR")
            .otherwise_err(ProviderError::RateLimited { retry_after: None });
        let start = Instant::now();
        let rep = fetch_with_retry(&a, &query(), &RetryPolicy::default()).await;
        assert_eq!(rep.attempts, 3);
        // 1000ms + 2000ms instead of 500ms + 1000ms.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }
}
