// src/bin/fusion_demo.rs
//! Runs one query against fixture-backed adapters and prints the fused JSON.
//!
//! Usage: `fusion_demo [lat lon]` (defaults to downtown Los Angeles).
//! Uses `config/fusion.toml` when present, else the built-in defaults.

use anyhow::{Context, Result};

use air_quality_fusion::{config, telemetry, AirQualityRequest, Coordinate, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (lat, lon) = match args.as_slice() {
        [lat, lon, ..] => (
            lat.parse::<f64>().context("lat")?,
            lon.parse::<f64>().context("lon")?,
        ),
        _ => (34.0522, -118.2437),
    };
    let coordinate = Coordinate::new(lat, lon)?;

    let cfg = config::load_default()?;
    let orchestrator = Orchestrator::from_config(cfg)?;

    let first = orchestrator
        .get_air_quality(AirQualityRequest::new(coordinate))
        .await;
    println!("{}", serde_json::to_string_pretty(&first)?);

    // Same point again: served from the response cache.
    let again = orchestrator
        .get_air_quality(AirQualityRequest::new(coordinate))
        .await;
    eprintln!("second call from_cache={}", again.from_cache);

    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.health_snapshot())?
    );
    Ok(())
}
