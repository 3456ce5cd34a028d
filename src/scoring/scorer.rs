//! Node risk scoring.
//!
//! ```text
//! features → endpoint → clamp [0,1] → weather damping → jitter → × (1 + province rate)
//! ```

use super::features::{parse_departure, FeatureVector, RoadAttributes};
use super::regions;
use crate::provider::{PredictionEndpoint, ProviderError};
use crate::weather::WeatherSnapshot;
use crate::{metrics, RiskError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

const IDEAL_TEMPERATURE_C: f64 = 22.5;
const TEMPERATURE_RANGE: f64 = 2.5;
const IDEAL_HUMIDITY_PCT: f64 = 50.0;
const HUMIDITY_RANGE: f64 = 10.0;
const IDEAL_WIND_LEVEL: f64 = 1.0;
const WIND_RANGE: f64 = 1.0;

/// Why a node could not be scored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("invalid departure time: {0}")]
    InvalidDepartureTime(String),

    #[error("prediction failed: {0}")]
    Endpoint(#[from] ProviderError),
}

/// Calibration knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerSettings {
    /// Lower bound of the multiplicative jitter.
    pub jitter_min: f64,
    /// Upper bound of the multiplicative jitter.
    pub jitter_max: f64,
    /// Seed for reproducible jitter; entropy when `None`.
    pub jitter_seed: Option<u64>,
    /// Largest fraction removed at the ideal weather point.
    pub max_damping: f64,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            jitter_min: 0.95,
            jitter_max: 1.05,
            jitter_seed: None,
            max_damping: 0.3,
        }
    }
}

/// Scored node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskResult {
    /// Final weighted risk, always `>= 0`.
    pub probability: f64,
    pub crash_type: String,
    /// Endpoint probability before any adjustment, clamped to `[0, 1]`.
    pub raw_probability: f64,
}

/// Scores nodes against the prediction endpoint.
pub struct RiskScorer {
    endpoint: Arc<dyn PredictionEndpoint>,
    settings: ScorerSettings,
    rng: Mutex<StdRng>,
}

impl RiskScorer {
    /// # Errors
    ///
    /// Returns [`RiskError::ConfigError`] if the jitter range is empty,
    /// negative or non-finite, or `max_damping` is outside `[0, 1]`.
    pub fn new(
        endpoint: Arc<dyn PredictionEndpoint>,
        settings: ScorerSettings,
    ) -> Result<Self, RiskError> {
        let ScorerSettings {
            jitter_min,
            jitter_max,
            max_damping,
            ..
        } = settings;
        if !(jitter_min.is_finite() && jitter_max.is_finite())
            || jitter_min < 0.0
            || jitter_min > jitter_max
        {
            return Err(RiskError::ConfigError(format!(
                "invalid jitter range [{jitter_min}, {jitter_max}]"
            )));
        }
        if !(0.0..=1.0).contains(&max_damping) {
            return Err(RiskError::ConfigError(format!(
                "max_damping must be within [0, 1], got {max_damping}"
            )));
        }

        let rng = match settings.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            endpoint,
            settings,
            rng: Mutex::new(rng),
        })
    }

    /// Score one node.
    ///
    /// # Errors
    ///
    /// [`ScoringError::InvalidDepartureTime`] if `departure` cannot be
    /// parsed; [`ScoringError::Endpoint`] if the model call fails.
    pub async fn predict(
        &self,
        region_code: &str,
        departure: Option<&str>,
        weather: &WeatherSnapshot,
        road: &RoadAttributes,
    ) -> Result<RiskResult, ScoringError> {
        let started = Instant::now();
        let at = parse_departure(departure).map_err(ScoringError::InvalidDepartureTime)?;
        let features = FeatureVector::build(at, weather.condition.as_deref(), road);

        let prediction = self.endpoint.predict(&features).await.map_err(|e| {
            warn!(region_code, error = %e, "prediction endpoint failed");
            e
        })?;

        let raw = prediction.accident_prob.clamp(0.0, 1.0);
        let damped = raw * damping_factor(weather, self.settings.max_damping);
        let jittered = damped * self.jitter();
        let probability = jittered * (1.0 + regions::base_rate(region_code));

        debug!(
            region_code,
            raw,
            damped,
            probability,
            crash_type = %prediction.crash_type,
            "node scored"
        );
        metrics::record_stage_latency("score", started.elapsed());

        Ok(RiskResult {
            probability: probability.max(0.0),
            crash_type: prediction.crash_type,
            raw_probability: raw,
        })
    }

    fn jitter(&self) -> f64 {
        let ScorerSettings {
            jitter_min: lo,
            jitter_max: hi,
            ..
        } = self.settings;
        if lo == hi {
            return lo;
        }
        self.rng.lock().gen_range(lo..=hi)
    }
}

/// Multiplier in `[1 - max_damping, 1]` applied to the raw probability.
///
/// Each of temperature, humidity and wind level is scored by its normalised
/// distance from the ideal point, clamped to 1; missing readings count as
/// ideal. The closer the average is to 0, the stronger the damping.
pub fn damping_factor(weather: &WeatherSnapshot, max_damping: f64) -> f64 {
    let deviation = |value: Option<f64>, ideal: f64, range: f64| {
        ((value.unwrap_or(ideal) - ideal).abs() / range).min(1.0)
    };
    let avg = (deviation(weather.temperature_c, IDEAL_TEMPERATURE_C, TEMPERATURE_RANGE)
        + deviation(weather.humidity_pct, IDEAL_HUMIDITY_PCT, HUMIDITY_RANGE)
        + deviation(
            weather.wind_level.map(f64::from),
            IDEAL_WIND_LEVEL,
            WIND_RANGE,
        ))
        / 3.0;
    1.0 - max_damping * (1.0 - avg)
}
