//! External collaborators
//!
//! Three trait seams, each object-safe so the pipeline holds them as
//! `Arc<dyn …>` and tests can substitute in-process fakes:
//!
//! - [`GeoProvider`]: reverse geocoding and live weather (credential-pooled)
//! - [`RoadDataProvider`]: open map data for road class and signals
//! - [`PredictionEndpoint`]: the accident-probability model
//!
//! HTTP implementations live in the submodules.

use crate::credentials::Credential;
use crate::scoring::FeatureVector;
use crate::Coordinates;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod amap;
pub mod overpass;
pub mod prediction;

pub use amap::AmapProvider;
pub use overpass::OverpassProvider;
pub use prediction::HttpPredictionEndpoint;

/// Failure of a single provider call.
///
/// `Clone` so one failure can be handed to every caller sharing an
/// in-flight computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider signalled its per-credential quota was exceeded.
    #[error("rate limited by provider")]
    RateLimited,

    /// Network failure, timeout or 5xx.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered but had no usable data.
    #[error("data unavailable: {0}")]
    Unavailable(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Only rate-limit signals and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transport(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transport(_) => "transport",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Richness of a reverse-geocode answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressDetail {
    /// Administrative components only.
    Basic,
    /// Components plus nearby roads and intersections.
    Full,
}

/// Administrative components of a reverse-geocoded point.
///
/// Every field is optional: providers routinely omit components (e.g. the
/// city of a municipality).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub township: Option<String>,
    pub street: Option<String>,
    /// Fine-grained region code of the point.
    pub adcode: Option<String>,
    /// Coarser code some providers return alongside.
    pub citycode: Option<String>,
    /// Raw road level (or name) of the nearest road. Only set for
    /// [`AddressDetail::Full`].
    pub nearest_road_level: Option<String>,
    /// Whether the nearest intersection has a traffic light. Only
    /// meaningful for [`AddressDetail::Full`].
    pub nearest_intersection_signal: bool,
}

/// Live conditions for one region as reported upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveWeather {
    /// Free-text condition, e.g. "小雨".
    pub condition: Option<String>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    /// Wind description, e.g. "≤3" or "4-5".
    pub wind_power: Option<String>,
}

/// Model output for one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub accident_prob: f64,
    pub crash_type: String,
}

/// Primary geocoding and weather provider.
///
/// Every call carries the credential the caller acquired from the pool.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Reverse-geocode a coordinate.
    async fn reverse_geocode(
        &self,
        credential: &Credential,
        at: Coordinates,
        detail: AddressDetail,
    ) -> Result<AddressInfo, ProviderError>;

    /// Current weather for a region code.
    async fn live_weather(
        &self,
        credential: &Credential,
        region_code: &str,
    ) -> Result<LiveWeather, ProviderError>;
}

/// Secondary, credential-free road-data source.
#[async_trait]
pub trait RoadDataProvider: Send + Sync {
    /// Highway class of the nearest road within `radius_m`, if any.
    async fn road_near(&self, at: Coordinates, radius_m: f64)
        -> Result<Option<String>, ProviderError>;

    /// Whether a traffic signal lies within `radius_m`.
    async fn signal_near(&self, at: Coordinates, radius_m: f64) -> Result<bool, ProviderError>;
}

/// The accident-probability model.
#[async_trait]
pub trait PredictionEndpoint: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, ProviderError>;
}

/// Deserialize a field that upstream sends as a string, a number, or an
/// empty array/object when absent. Empty strings become `None`.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Like [`lenient_string`] but parses the result as a number.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.and_then(|s| s.trim().parse::<f64>().ok()))
}
