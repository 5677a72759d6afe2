//! Forecast collaborator.
//!
//! The forecast model itself is opaque; the orchestrator only asks for
//! `get(coordinate)` under a timeout and drops the forecast on any error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ForecastKind, ForecastSettings};
use crate::model::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub valid_at: DateTime<Utc>,
    pub aqi: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastData {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
}

#[async_trait::async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn get(&self, coordinate: Coordinate) -> Result<ForecastData>;

    /// `false` lets callers skip the call entirely.
    fn enabled(&self) -> bool {
        true
    }
}

/// No-op provider used when no forecast backend is configured.
pub struct DisabledForecast;

#[async_trait::async_trait]
impl ForecastProvider for DisabledForecast {
    async fn get(&self, _coordinate: Coordinate) -> Result<ForecastData> {
        bail!("forecast disabled")
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// Canned forecast, or a canned failure.
pub struct FixtureForecast {
    data: Option<ForecastData>,
    delay: Option<Duration>,
}

impl FixtureForecast {
    pub fn new(data: ForecastData) -> Self {
        Self {
            data: Some(data),
            delay: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            data: None,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl ForecastProvider for FixtureForecast {
    async fn get(&self, _coordinate: Coordinate) -> Result<ForecastData> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.data
            .clone()
            .ok_or_else(|| anyhow!("fixture forecast configured to fail"))
    }
}

/// `GET {url}?lat=..&lon=..` returning a [`ForecastData`] JSON body.
pub struct HttpForecast {
    url: String,
    client: reqwest::Client,
}

impl HttpForecast {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building forecast http client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl ForecastProvider for HttpForecast {
    async fn get(&self, c: Coordinate) -> Result<ForecastData> {
        let rsp = self
            .client
            .get(&self.url)
            .query(&[("lat", c.lat), ("lon", c.lon)])
            .send()
            .await
            .context("forecast request")?
            .error_for_status()
            .context("forecast status")?;
        rsp.json::<ForecastData>()
            .await
            .context("forecast body")
    }
}

pub fn build_forecast(cfg: &ForecastSettings) -> Result<Arc<dyn ForecastProvider>> {
    match cfg.kind {
        ForecastKind::Disabled => Ok(Arc::new(DisabledForecast)),
        ForecastKind::Http => {
            let url = cfg
                .url
                .clone()
                .ok_or_else(|| anyhow!("forecast.kind = \"http\" needs forecast.url"))?;
            Ok(Arc::new(HttpForecast::new(
                url,
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
    }
}
