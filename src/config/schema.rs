//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the port bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Public listener (the port the hosting platform probes).
    pub listener: ListenerConfig,

    /// Where the real application server listens.
    pub upstream: UpstreamConfig,

    /// Upstream liveness probing.
    pub health_check: HealthCheckConfig,

    /// Waiting page served while the upstream is down.
    pub fallback: FallbackConfig,

    /// Outbound connection timeouts.
    pub timeouts: TimeoutConfig,

    /// Startup and shutdown ordering.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl BridgeConfig {
    /// Socket address of the public listener.
    pub fn public_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.listener.host.parse().ok()?;
        Some(SocketAddr::new(ip, self.listener.port))
    }

    /// `host:port` of the upstream, as used for the `Host` header and URIs.
    pub fn upstream_authority(&self) -> String {
        self.upstream.authority()
    }
}

/// Public listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Public port expected by the platform health checker.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Upstream application server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Hostname or IP of the upstream (loopback by default).
    pub host: String,

    /// Port the upstream listens on.
    pub port: u16,
}

impl UpstreamConfig {
    /// `host:port`, with IPv6 literals bracketed (`[::1]:3000`).
    pub fn authority(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path to probe on the upstream.
    pub path: String,

    /// Interval between probes in milliseconds.
    pub interval_ms: u64,

    /// Interval while the upstream is available. Falls back to `interval_ms`.
    pub healthy_interval_ms: Option<u64>,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn healthy_interval(&self) -> Duration {
        Duration::from_millis(self.healthy_interval_ms.unwrap_or(self.interval_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/api/health".to_string(),
            interval_ms: 5_000,
            healthy_interval_ms: None,
            timeout_ms: 2_000,
        }
    }
}

/// Waiting page configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Seconds before the waiting page reloads itself.
    pub refresh_secs: u64,

    /// Title shown on the waiting page.
    pub title: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 5,
            title: "MoodLync".to_string(),
        }
    }
}

/// Timeout configuration for outbound connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_ms: 5_000 }
    }
}

/// Startup and shutdown settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on the initial probe before the listener is bound.
    pub initial_probe_wait_ms: u64,

    /// Time allowed for in-flight exchanges to drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl LifecycleConfig {
    pub fn initial_probe_wait(&self) -> Duration {
        Duration::from_millis(self.initial_probe_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initial_probe_wait_ms: 1_500,
            shutdown_grace_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Pretty for development, JSON for log aggregation.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
