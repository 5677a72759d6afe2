//! Tracing setup shared by the service and demo binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "air_quality_fusion=info,warn";

/// Install the global subscriber. `RUST_LOG` wins over [`DEFAULT_FILTER`];
/// `AQ_LOG_JSON=1` switches to JSON lines. Safe to call twice: the second
/// call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("AQ_LOG_JSON").ok().is_some_and(|v| v == "1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
