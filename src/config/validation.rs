//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports non-zero)
//! - Reject a bridge that would forward to itself
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use thiserror::Error;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every semantic constraint and collect all violations.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.host",
            format!("'{}' is not an IP address", config.listener.host),
        ));
    }
    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }

    if config.upstream.host.trim().is_empty() {
        errors.push(ValidationError::new("upstream.host", "must not be empty"));
    } else if config
        .upstream_authority()
        .parse::<axum::http::uri::Authority>()
        .is_err()
    {
        errors.push(ValidationError::new(
            "upstream.host",
            format!("'{}' is not a valid host name or IP address", config.upstream.host),
        ));
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::new("upstream.port", "must be non-zero"));
    }
    if config.listener.port == config.upstream.port {
        errors.push(ValidationError::new(
            "upstream.port",
            format!("must differ from the public port {}", config.listener.port),
        ));
    }

    let health = &config.health_check;
    if !health.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be positive"));
    }
    if health.healthy_interval_ms == Some(0) {
        errors.push(ValidationError::new("health_check.healthy_interval_ms", "must be positive"));
    }
    if health.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be positive"));
    }

    if config.fallback.refresh_secs == 0 {
        errors.push(ValidationError::new("fallback.refresh_secs", "must be positive"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be positive"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
