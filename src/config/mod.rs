//! # Pipeline Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file describing providers, caches and
//! scoring calibration, and build the runtime parameter types from it.
//! ```text
//! route-risk --config pipeline.toml request.json
//! ```
//!
//! ## Guarantees
//! - Every field has a default: an empty file is a complete config apart
//!   from the credential list, which validation requires.
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Wiring the processor (that belongs to `processor`)

pub mod loader;
pub mod validation;

use crate::provider::{amap, overpass, prediction};
use crate::retry::RetryPolicy;
use crate::scoring::ScorerSettings;
use crate::summary::BandThresholds;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

fn default_provider_url() -> String {
    amap::DEFAULT_BASE_URL.to_string()
}

/// Default spacing between two uses of one credential: 200ms.
fn default_min_interval_ms() -> u64 {
    200
}

/// Default rate-limit cool-down: 5000ms.
fn default_cool_down_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Default attempts per primary-provider call: 20.
fn default_max_attempts() -> usize {
    20
}

fn default_retry_delay_ms() -> u64 {
    100
}

/// Default ceiling for exponential backoff: 5000ms.
fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_road_data_url() -> String {
    overpass::DEFAULT_BASE_URL.to_string()
}

fn default_radius_m() -> f64 {
    20.0
}

/// Default per-source road lookup deadline: 3000ms.
fn default_road_deadline_ms() -> u64 {
    3000
}

fn default_prediction_url() -> String {
    prediction::DEFAULT_URL.to_string()
}

/// Default weather TTL: 600 seconds (10 minutes).
fn default_weather_ttl_s() -> u64 {
    600
}

/// Default place-name TTL: 3600 seconds.
fn default_place_ttl_s() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_jitter_min() -> f64 {
    0.95
}

fn default_jitter_max() -> f64 {
    1.05
}

fn default_max_damping() -> f64 {
    0.3
}

fn default_high_risk_threshold() -> f64 {
    0.31
}

fn default_advice_bands() -> BandThresholds {
    BandThresholds::ADVICE
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a pipeline instance.
///
/// # Example
///
/// ```toml
/// [provider]
/// credentials = ["key-a", "key-b"]
/// min_interval_ms = 200
///
/// [cache]
/// policy = "per_request"
///
/// [scoring]
/// jitter_seed = 42
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PipelineConfig {
    /// Primary geocoding/weather provider and its credential pool.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Secondary open-map road data.
    #[serde(default)]
    pub road_data: RoadDataConfig,
    /// Accident-probability model endpoint.
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Risk calibration.
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Primary provider and credential pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    /// Access tokens. Overridden by `ROUTE_RISK_CREDENTIALS` at load time.
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Minimum spacing (ms) between two dispatches of one credential.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Cool-down (ms) applied to a credential after a rate-limit signal.
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,
    /// Back-off (ms) while every credential is busy.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per call, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay (ms) after the first failed attempt.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How the delay grows between later attempts.
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    /// Upper bound (ms) for exponential backoff.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Delay schedule between provider retries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// `retry_delay_ms` every time.
    #[default]
    Fixed,
    /// Grows by `retry_delay_ms` per attempt.
    Linear,
    /// Doubles per attempt up to `retry_max_delay_ms`.
    Exponential,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            credentials: Vec::new(),
            min_interval_ms: default_min_interval_ms(),
            cool_down_ms: default_cool_down_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_backoff: RetryBackoff::default(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl ProviderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        match self.retry_backoff {
            RetryBackoff::Fixed => RetryPolicy::fixed(self.max_attempts, delay),
            RetryBackoff::Linear => RetryPolicy::linear(self.max_attempts, delay, delay),
            RetryBackoff::Exponential => RetryPolicy::exponential(
                self.max_attempts,
                delay,
                Duration::from_millis(self.retry_max_delay_ms),
            ),
        }
    }
}

// ── Road data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoadDataConfig {
    #[serde(default = "default_road_data_url")]
    pub base_url: String,
    /// Search radius in metres.
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    /// Deadline (ms) applied to each road source independently.
    #[serde(default = "default_road_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for RoadDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_road_data_url(),
            radius_m: default_radius_m(),
            deadline_ms: default_road_deadline_ms(),
        }
    }
}

// ── Prediction ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PredictionConfig {
    #[serde(default = "default_prediction_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            url: default_prediction_url(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

// ── Caches ───────────────────────────────────────────────────────────────

/// Lifetime of the shared lookup caches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Geocode, place, weather and road caches survive across calls.
    #[default]
    Persistent,
    /// Those caches are cleared at the start and end of every call.
    PerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_weather_ttl_s")]
    pub weather_ttl_s: u64,
    #[serde(default = "default_place_ttl_s")]
    pub place_ttl_s: u64,
    /// Capacity of each TTL cache. `0` means unbounded.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default)]
    pub policy: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            weather_ttl_s: default_weather_ttl_s(),
            place_ttl_s: default_place_ttl_s(),
            max_entries: default_max_entries(),
            policy: CachePolicy::default(),
        }
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoringConfig {
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Fixed seed for reproducible jitter. Unset draws from entropy.
    pub jitter_seed: Option<u64>,
    #[serde(default = "default_max_damping")]
    pub max_damping: f64,
    /// Nodes at or above this risk are listed as high-risk points.
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: f64,
    #[serde(default)]
    pub bands: BandThresholds,
    /// Cut-offs selecting the advice text of a high-risk point.
    #[serde(default = "default_advice_bands")]
    pub advice_bands: BandThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            jitter_seed: None,
            max_damping: default_max_damping(),
            high_risk_threshold: default_high_risk_threshold(),
            bands: BandThresholds::default(),
            advice_bands: default_advice_bands(),
        }
    }
}

impl ScoringConfig {
    pub fn scorer_settings(&self) -> ScorerSettings {
        ScorerSettings {
            jitter_min: self.jitter_min,
            jitter_max: self.jitter_max,
            jitter_seed: self.jitter_seed,
            max_damping: self.max_damping,
        }
    }
}

// ── Observability ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Used when `LOG_FORMAT` is not set.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Register the Prometheus collectors at startup.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

/// Export the JSON Schema for `PipelineConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(PipelineConfig);
    serde_json::to_string_pretty(&schema)
}
