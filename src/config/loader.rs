//! Configuration loading from disk and the command line.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{BridgeConfig, LogFormat};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied by flags or environment variables.
///
/// Every field is optional; `None` keeps whatever the file or defaults say.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_host: Option<String>,
    pub public_port: Option<u16>,
    pub upstream_host: Option<String>,
    pub upstream_port: Option<u16>,
    pub health_path: Option<String>,
    pub health_interval_ms: Option<u64>,
    pub health_timeout_ms: Option<u64>,
    pub log_format: Option<LogFormat>,
    pub metrics_address: Option<String>,
}

impl ConfigOverrides {
    /// Apply the overrides on top of `config`.
    pub fn apply(self, config: &mut BridgeConfig) {
        if let Some(host) = self.bind_host {
            config.listener.host = host;
        }
        if let Some(port) = self.public_port {
            config.listener.port = port;
        }
        if let Some(host) = self.upstream_host {
            config.upstream.host = host;
        }
        if let Some(port) = self.upstream_port {
            config.upstream.port = port;
        }
        if let Some(path) = self.health_path {
            config.health_check.path = path;
        }
        if let Some(ms) = self.health_interval_ms {
            config.health_check.interval_ms = ms;
        }
        if let Some(ms) = self.health_timeout_ms {
            config.health_check.timeout_ms = ms;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if let Some(addr) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr;
        }
    }
}

/// Parse a TOML document into a config without validating it.
pub fn parse_config(content: &str) -> Result<BridgeConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build the effective configuration: defaults, then the optional file, then overrides.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<BridgeConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => BridgeConfig::default(),
    };

    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
