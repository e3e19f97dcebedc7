//! MoodLync port bridge.
//!
//! Binds the public port of a hosted deployment and relays traffic to the
//! application on its internal port, serving a waiting page until it is up.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────────────┐
//!                              │                      PORT BRIDGE                     │
//!                              │                                                      │
//!     Client Request           │  ┌─────────┐    ┌─────────┐    ┌──────────────┐      │
//!     ─────────────────────────┼─▶│   net   │───▶│  http   │───▶│  available?  │      │
//!                              │  │listener │    │ server  │    └──┬────────┬──┘      │
//!                              │  └─────────┘    └─────────┘   no  │        │ yes     │
//!                              │                                   ▼        ▼         │
//!                              │                           ┌──────────┐ ┌───────────┐ │
//!     Client Response          │                           │ fallback │ │ forwarder │─┼──▶ Upstream
//!     ◀────────────────────────┼───────────────────────────│  (503)   │ │ http / ws │◀┼─── (internal
//!                              │                           └──────────┘ └─────┬─────┘ │     port)
//!                              │                                              │failure│
//!                              │                                              ▼       │
//!                              │  ┌─────────────────────────────────────────────────┐ │
//!                              │  │ health monitor (probe loop, shared status)      │─┼──▶ /api/health
//!                              │  └─────────────────────────────────────────────────┘ │
//!                              │  ┌──────────┐ ┌───────────────┐ ┌─────────────────┐  │
//!                              │  │  config  │ │ observability │ │    lifecycle    │  │
//!                              │  │          │ │ logs, metrics │ │ startup/shutdown│  │
//!                              │  └──────────┘ └───────────────┘ └─────────────────┘  │
//!                              └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use moodlync_bridge::config::{resolve_config, ConfigOverrides, LogFormat};
use moodlync_bridge::lifecycle::signals::spawn_signal_handler;
use moodlync_bridge::observability::{logging, metrics};
use moodlync_bridge::Bridge;

#[derive(Parser, Debug)]
#[command(name = "moodlync-bridge", version, about = "Public-port bridge for the MoodLync application")]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the public listener on.
    #[arg(long, env = "BRIDGE_BIND_HOST")]
    bind_host: Option<String>,

    /// Public port (falls back to `PORT`).
    #[arg(long, env = "BRIDGE_PUBLIC_PORT")]
    public_port: Option<u16>,

    #[arg(long, env = "BRIDGE_UPSTREAM_HOST")]
    upstream_host: Option<String>,

    /// Internal port the application listens on.
    #[arg(long, env = "BRIDGE_UPSTREAM_PORT")]
    upstream_port: Option<u16>,

    #[arg(long, env = "BRIDGE_HEALTH_PATH")]
    health_path: Option<String>,

    #[arg(long, env = "BRIDGE_HEALTH_INTERVAL_MS")]
    health_interval_ms: Option<u64>,

    #[arg(long, env = "BRIDGE_HEALTH_TIMEOUT_MS")]
    health_timeout_ms: Option<u64>,

    /// `pretty` or `json`.
    #[arg(long, env = "BRIDGE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable the Prometheus exporter on this address.
    #[arg(long, env = "BRIDGE_METRICS_ADDRESS")]
    metrics_address: Option<String>,
}

impl Cli {
    fn into_parts(self) -> (Option<PathBuf>, ConfigOverrides) {
        let public_port = self.public_port.or_else(|| {
            std::env::var("PORT")
                .ok()
                .and_then(|port| port.trim().parse().ok())
        });

        let overrides = ConfigOverrides {
            bind_host: self.bind_host,
            public_port,
            upstream_host: self.upstream_host,
            upstream_port: self.upstream_port,
            health_path: self.health_path,
            health_interval_ms: self.health_interval_ms,
            health_timeout_ms: self.health_timeout_ms,
            log_format: self.log_format,
            metrics_address: self.metrics_address,
        };
        (self.config, overrides)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (config_path, overrides) = Cli::parse().into_parts();

    let config = match resolve_config(config_path.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("moodlync-bridge: invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moodlync-bridge starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bridge = Bridge::new(config);
    spawn_signal_handler(bridge.shutdown_handle());

    match bridge.run().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "Bridge exited with error");
            ExitCode::FAILURE
        }
    }
}
