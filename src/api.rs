// src/api.rs
//! Thin HTTP surface over the orchestrator: parse, range-check, delegate,
//! serialize. No fusion logic lives here.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aqi::{self, AqiScale};
use crate::model::Coordinate;
use crate::orchestrator::{AirQualityRequest, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/air-quality", get(air_quality))
        .route("/api/v1/health-advice", get(health_advice))
        .route("/api/v1/sources", get(sources))
        .route("/api/v1/status", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn bad_request(msg: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": msg.to_string() })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct AirQualityParams {
    lat: f64,
    lon: f64,
    #[serde(default)]
    include_forecast: bool,
    #[serde(default)]
    radius_km: Option<f64>,
    #[serde(default)]
    no_cache: bool,
}

async fn air_quality(
    State(state): State<AppState>,
    Query(p): Query<AirQualityParams>,
) -> Response {
    let coordinate = match Coordinate::new(p.lat, p.lon) {
        Ok(c) => c,
        Err(e) => return bad_request(e),
    };
    let mut req = AirQualityRequest::new(coordinate).with_forecast(p.include_forecast);
    if let Some(r) = p.radius_km {
        req = req.with_radius(r);
    }
    if p.no_cache {
        req = req.bypass_cache();
    }
    Json(state.orchestrator.get_air_quality(req).await).into_response()
}

#[derive(Debug, Deserialize)]
struct AdviceParams {
    aqi: i32,
    #[serde(default)]
    scale: Option<String>,
}

async fn health_advice(State(state): State<AppState>, Query(p): Query<AdviceParams>) -> Response {
    let scale = match p.scale.as_deref() {
        None => state.orchestrator.config().fusion.scale,
        Some(s) => match s.parse::<AqiScale>() {
            Ok(scale) => scale,
            Err(e) => return bad_request(e),
        },
    };
    Json(aqi::categorize(p.aqi, scale)).into_response()
}

async fn sources(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.sources()).into_response()
}

async fn status(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.service_status()).into_response()
}
