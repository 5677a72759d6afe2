//! Error taxonomy.
//!
//! - [`ProviderError`]: what a single adapter fetch can fail with. Always caught
//!   at the adapter-call boundary and turned into a health failure.
//! - [`ConfigError`]: malformed or inconsistent configuration. Fatal at startup.
//! - [`CoordinateError`]: out-of-range latitude/longitude at the service boundary.
//!
//! A fusion with no usable readings is *not* an error; see
//! [`crate::model::FusionStatus::DegradedNoData`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// Raised by the orchestrator when the request is cancelled or its
    /// deadline passes; adapters never return it.
    #[error("fetch abandoned: request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Short label for metrics/log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Unreachable(_) => "unreachable",
            ProviderError::Cancelled => "cancelled",
        }
    }

    /// A malformed payload will not fix itself within a backoff window.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::InvalidResponse(_) | ProviderError::Cancelled
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} points to a non-existent path")]
    MissingPath(&'static str),

    #[error("region table has no non-empty DEFAULT priority list")]
    MissingDefaultRegion,

    #[error("region {0} has an empty priority list")]
    EmptyRegion(String),

    #[error("source {code} has trust weight {weight}, expected (0, 1]")]
    InvalidTrustWeight { code: String, weight: f64 },

    #[error("adapter for {code} is misconfigured: {reason}")]
    InvalidAdapter { code: String, reason: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}
