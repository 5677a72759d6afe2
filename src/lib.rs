// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod adapter;
pub mod api;
pub mod aqi;
pub mod cache;
pub mod config;
pub mod error;
pub mod forecast;
pub mod fusion;
pub mod health;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod region;
pub mod registry;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::FusionConfig;
pub use crate::error::{ConfigError, CoordinateError, ProviderError};
pub use crate::model::{Coordinate, FusedResult, FusionStatus, Reading};
pub use crate::orchestrator::{AirQualityRequest, Orchestrator};
