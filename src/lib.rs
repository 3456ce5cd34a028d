//! # route-risk-orchestrator
//!
//! A route risk-assessment pipeline over Tokio.
//!
//! ## Architecture
//!
//! Every candidate route is broken into nodes and each node flows through
//! the same stages, concurrently per node and per route:
//! ```text
//! Node → region downgrade ┐
//!      → road info (race) ├→ weather + place name → risk score (request cache) → summary
//!      → geometry         ┘
//! ```
//!
//! All calls to the primary geocoding/weather provider are admitted by a
//! single [`credentials::CredentialPool`]; identical concurrent lookups share
//! one in-flight computation ([`cache::InFlightCache`]) and idempotent
//! results are held in a [`cache::TtlCache`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]

use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod config;
pub mod credentials;
pub mod geo;
pub mod geometry;
pub mod metrics;
pub mod processor;
pub mod provider;
pub mod retry;
pub mod road;
pub mod scoring;
pub mod summary;
pub mod weather;

// Re-exports for convenience
pub use processor::{RoutePlanRequest, RoutePlanResponse, RouteProcessor};
pub use provider::{GeoProvider, PredictionEndpoint, ProviderError, RoadDataProvider};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=route_risk_orchestrator=debug`).
///
/// # Errors
///
/// Returns [`RiskError::Other`] if the global subscriber has already been
/// set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use route_risk_orchestrator::{init_tracing, RiskError};
/// # fn example() -> Result<(), RiskError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), RiskError> {
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    init_tracing_with(format)
}

/// Initialise the global tracing subscriber with an explicit format.
///
/// # Errors
///
/// Returns [`RiskError::Other`] if the global subscriber is already set.
pub fn init_tracing_with(format: LogFormat) -> Result<(), RiskError> {
    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| RiskError::Other(format!("tracing init failed: {e}")))
}

/// Top-level pipeline errors.
///
/// Node- and route-level failures never surface here: they are captured
/// in-line on the affected node so the batch always completes. Only
/// structurally invalid requests and construction-time misconfiguration
/// are reported through this type.
#[derive(Error, Debug)]
pub enum RiskError {
    /// The request itself is unusable (e.g. the `paths` array is missing).
    #[error("route planning failed: {0}")]
    InvalidRequest(String),

    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so misconfiguration surfaces before
    /// the first provider call.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An external provider call failed in a way the caller must see.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// A WGS-84 style latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Cache key for this coordinate, rounded to three decimal digits so
    /// nearby points (≈100 m) share cached lookups.
    pub fn key(&self) -> CoordKey {
        CoordKey {
            lat_milli: (self.lat * 1000.0).round() as i64,
            lng_milli: (self.lng * 1000.0).round() as i64,
        }
    }
}

/// Hashable, rounded form of [`Coordinates`] used to key caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    lat_milli: i64,
    lng_milli: i64,
}

impl CoordKey {
    /// The rounded coordinate this key stands for.
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat_milli as f64 / 1000.0,
            lng: self.lng_milli as f64 / 1000.0,
        }
    }
}

impl std::fmt::Display for CoordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.coordinates();
        write!(f, "{:.3},{:.3}", c.lat, c.lng)
    }
}
