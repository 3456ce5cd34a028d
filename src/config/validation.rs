//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`PipelineConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//! - Credential values never appear in error messages

use super::{PipelineConfig, RetryBackoff};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "provider.max_attempts").
        field: String,
        value: String,
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`PipelineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Every violation found, in field order.
pub fn validate(config: &PipelineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Provider & credential pool ───────────────────────────────────
    let provider = &config.provider;
    if provider.base_url.trim().is_empty() {
        errors.push(invalid("provider.base_url", "\"\"", "must not be empty"));
    }
    if provider.credentials.is_empty() {
        errors.push(invalid(
            "provider.credentials",
            "[]",
            "at least one credential is required (or set ROUTE_RISK_CREDENTIALS)",
        ));
    }
    if let Some(i) = provider
        .credentials
        .iter()
        .position(|c| c.trim().is_empty())
    {
        errors.push(invalid(
            &format!("provider.credentials[{i}]"),
            "\"\"",
            "credentials must not be blank",
        ));
    }
    if provider.poll_interval_ms == 0 {
        errors.push(invalid("provider.poll_interval_ms", 0, "must be at least 1ms"));
    }
    if provider.request_timeout_ms == 0 {
        errors.push(invalid("provider.request_timeout_ms", 0, "must be at least 1ms"));
    }
    if provider.max_attempts == 0 {
        errors.push(invalid("provider.max_attempts", 0, "must be at least 1"));
    }
    if provider.retry_backoff == RetryBackoff::Exponential
        && provider.retry_max_delay_ms < provider.retry_delay_ms
    {
        errors.push(invalid(
            "provider.retry_max_delay_ms",
            provider.retry_max_delay_ms,
            "must not be below provider.retry_delay_ms",
        ));
    }

    // ── Road data ────────────────────────────────────────────────────
    if config.road_data.base_url.trim().is_empty() {
        errors.push(invalid("road_data.base_url", "\"\"", "must not be empty"));
    }
    let radius = config.road_data.radius_m;
    if !radius.is_finite() || radius <= 0.0 {
        errors.push(invalid("road_data.radius_m", radius, "must be a positive number of metres"));
    }
    if config.road_data.deadline_ms == 0 {
        errors.push(invalid("road_data.deadline_ms", 0, "must be at least 1ms"));
    }

    // ── Prediction ───────────────────────────────────────────────────
    if config.prediction.url.trim().is_empty() {
        errors.push(invalid("prediction.url", "\"\"", "must not be empty"));
    }
    if config.prediction.timeout_ms == 0 {
        errors.push(invalid("prediction.timeout_ms", 0, "must be at least 1ms"));
    }

    // ── Caches ───────────────────────────────────────────────────────
    if config.cache.weather_ttl_s == 0 {
        errors.push(invalid("cache.weather_ttl_s", 0, "must be at least 1s"));
    }
    if config.cache.place_ttl_s == 0 {
        errors.push(invalid("cache.place_ttl_s", 0, "must be at least 1s"));
    }

    // ── Scoring calibration ──────────────────────────────────────────
    let scoring = &config.scoring;
    if !scoring.jitter_min.is_finite() || scoring.jitter_min < 0.0 {
        errors.push(invalid("scoring.jitter_min", scoring.jitter_min, "must be finite and >= 0"));
    }
    if !scoring.jitter_max.is_finite() || scoring.jitter_max < scoring.jitter_min {
        errors.push(invalid(
            "scoring.jitter_max",
            scoring.jitter_max,
            "must be finite and >= jitter_min",
        ));
    }
    if !(0.0..=1.0).contains(&scoring.max_damping) {
        errors.push(invalid("scoring.max_damping", scoring.max_damping, "must be between 0.0 and 1.0"));
    }
    if !scoring.high_risk_threshold.is_finite() || scoring.high_risk_threshold < 0.0 {
        errors.push(invalid(
            "scoring.high_risk_threshold",
            scoring.high_risk_threshold,
            "must be finite and >= 0",
        ));
    }
    if !scoring.bands.is_ordered() {
        errors.push(invalid(
            "scoring.bands",
            format!("{:?}", scoring.bands),
            "thresholds must be finite and strictly increasing (medium < medium_high < high < extreme)",
        ));
    }
    if !scoring.advice_bands.is_ordered() {
        errors.push(invalid(
            "scoring.advice_bands",
            format!("{:?}", scoring.advice_bands),
            "thresholds must be finite and strictly increasing (medium < medium_high < high < extreme)",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
