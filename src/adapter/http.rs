// src/adapter/http.rs
//! JSON relay adapter.
//!
//! Talks to a relay that already speaks the normalized reading shape:
//! `GET {url}?lat=..&lon=..&radius_km=..` answering
//! `{"readings": [{"aqi": 42, "observed_at": "...", ...}]}`.
//! Provider-specific wire formats live behind the relay.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header::HeaderValue, StatusCode};
use serde::Deserialize;

use super::{AirQualityAdapter, FetchQuery};
use crate::error::ProviderError;
use crate::model::{NativeIndex, Reading};

const USER_AGENT: &str = concat!("air-quality-fusion/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    readings: Vec<RelayReading>,
}

#[derive(Debug, Deserialize)]
struct RelayReading {
    aqi: i32,
    observed_at: DateTime<Utc>,
    #[serde(default)]
    distance_km: f64,
    #[serde(default)]
    native: Option<NativeIndex>,
    #[serde(default)]
    pollutants: BTreeMap<String, f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    station: Option<String>,
}

pub struct HttpRelayAdapter {
    code: String,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRelayAdapter {
    pub fn new(code: String, url: String, api_key: Option<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            code,
            url,
            api_key,
            client,
        })
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<Reading>, ProviderError> {
        decode_readings(&self.code, body)
    }

    /// Relay query, with the API key as a bearer token when configured.
    fn request(&self, query: &FetchQuery) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(&self.url)
            .timeout(query.timeout)
            .query(&[
                ("lat", query.coordinate.lat),
                ("lon", query.coordinate.lon),
                ("radius_km", query.radius_km),
            ]);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

fn decode_readings(code: &str, body: &[u8]) -> Result<Vec<Reading>, ProviderError> {
    let parsed: RelayResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("relay body: {e}")))?;
    Ok(parsed
        .readings
        .into_iter()
        .map(|r| Reading {
            provider: code.to_string(),
            aqi: r.aqi,
            native: r.native,
            pollutants: r.pollutants,
            humidity: r.humidity,
            observed_at: r.observed_at,
            distance_km: r.distance_km,
            confidence: r.confidence.map(|c| c.clamp(0.0, 100.0)),
            station: r.station,
        })
        .collect())
}

/// Map a non-success status onto the provider error taxonomy.
fn classify_status(status: StatusCode, retry_after: Option<&HeaderValue>) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        ProviderError::RateLimited { retry_after }
    } else if status.is_server_error() {
        ProviderError::Unreachable(format!("upstream status {status}"))
    } else {
        ProviderError::InvalidResponse(format!("unexpected status {status}"))
    }
}

#[async_trait::async_trait]
impl AirQualityAdapter for HttpRelayAdapter {
    fn code(&self) -> &str {
        &self.code
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Reading>, ProviderError> {
        let rsp = self
            .request(query)
            .send()
            .await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(query.timeout)
            } else {
                ProviderError::Unreachable(e.to_string())
            }
        })?;

        let status = rsp.status();
        if !status.is_success() {
            return Err(classify_status(
                status,
                rsp.headers().get(reqwest::header::RETRY_AFTER),
            ));
        }

        let body = rsp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(query.timeout)
            } else {
                ProviderError::Unreachable(e.to_string())
            }
        })?;
        self.decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let hv = HeaderValue::from_static("30");
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(&hv)),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None),
            ProviderError::RateLimited { retry_after: None }
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None),
            ProviderError::Unreachable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None),
            ProviderError::InvalidResponse(_)
        ));
    }

    #[test]
    fn decodes_relay_payload_and_stamps_provider() {
        let body = br#"{"readings":[
            {"aqi": 57, "observed_at": "2026-10-19T12:00:00Z", "distance_km": 3.2,
             "pollutants": {"pm25": 14.1}, "confidence": 140,
             "native": {"scale": "AQHI", "value": 3}}
        ]}"#;
        let got = decode_readings("ECCC_AQHI", body).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].provider, "ECCC_AQHI");
        assert_eq!(got[0].confidence, Some(100.0));
        assert_eq!(got[0].native.map(|n| n.value), Some(3));
    }

    #[test]
    fn api_key_is_sent_as_bearer_token() {
        let query = FetchQuery {
            coordinate: crate::model::Coordinate::new(45.5, -73.6).unwrap(),
            radius_km: 25.0,
            timeout: Duration::from_secs(10),
        };
        let keyed = HttpRelayAdapter::new(
            "WAQI".into(),
            "https://relay.example.org/waqi".into(),
            Some("s3cret".into()),
        )
        .unwrap();
        let req = keyed.request(&query).build().unwrap();
        assert_eq!(
            req.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer s3cret"
        );
        assert!(req.headers().get("X-API-Key").is_none());
        let q = req.url().query().unwrap();
        assert!(q.contains("lat=45.5") && q.contains("radius_km=25"));

        let open = HttpRelayAdapter::new(
            "WAQI".into(),
            "https://relay.example.org/waqi".into(),
            None,
        )
        .unwrap();
        let req = open.request(&query).build().unwrap();
        assert!(req.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn garbage_is_invalid_response() {
        assert!(matches!(
            decode_readings("X", b"<html>"),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(decode_readings("X", b"{}").unwrap().is_empty());
    }
}
