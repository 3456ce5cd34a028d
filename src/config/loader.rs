//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`PipelineConfig`], apply
//! the credential override from the environment, and run validation before
//! returning. This is the primary entry point for loading configuration at
//! startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;

use super::validation::{self, ConfigError};
use super::PipelineConfig;

/// Environment variable holding a comma-separated credential list. When set
/// and non-empty it replaces `provider.credentials`.
pub const CREDENTIALS_ENV: &str = "ROUTE_RISK_CREDENTIALS";

/// Load a [`PipelineConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Example
///
/// ```rust,ignore
/// use route_risk_orchestrator::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("pipeline.toml"))?;
/// println!("{} credentials", config.provider.credentials.len());
/// ```
pub fn load_from_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`PipelineConfig`] from a TOML string, honouring
/// [`CREDENTIALS_ENV`].
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<PipelineConfig, ConfigError> {
    load_with_override(content, source_name, std::env::var(CREDENTIALS_ENV).ok())
}

/// Load from a TOML string with an explicit credential override instead of
/// reading the environment.
///
/// # Errors
///
/// As [`load_from_str`].
pub fn load_with_override(
    content: &str,
    source_name: &str,
    credentials: Option<String>,
) -> Result<PipelineConfig, ConfigError> {
    let mut config: PipelineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    apply_credential_override(&mut config, credentials.as_deref());

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

/// Replace the configured credentials with the comma-separated `raw` list.
/// Blank entries are dropped; an all-blank list leaves the config untouched.
pub fn apply_credential_override(config: &mut PipelineConfig, raw: Option<&str>) {
    let Some(raw) = raw else {
        return;
    };
    let credentials: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if !credentials.is_empty() {
        tracing::debug!(count = credentials.len(), "credentials taken from environment");
        config.provider.credentials = credentials;
    }
}
