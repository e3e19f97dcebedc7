//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_requests_total` (counter): requests by method, status, outcome
//! - `bridge_request_duration_seconds` (histogram): latency by outcome
//! - `bridge_upstream_available` (gauge): 1=available, 0=unavailable
//! - `bridge_upstream_consecutive_failures` (gauge)
//! - `bridge_active_exchanges` (gauge): in-flight HTTP requests and WebSocket sessions
//! - `bridge_websocket_sessions_total` (counter): sessions by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exporter is optional and binds its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::BridgeError;
use crate::health::state::UpstreamStatus;

/// How an inbound request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Forwarded to the upstream.
    Proxied,
    /// Answered by the waiting page.
    Fallback,
    /// Forwarding was attempted and failed.
    UpstreamError,
    /// CORS preflight answered locally.
    Preflight,
    /// Request refused before forwarding (e.g. malformed upgrade).
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Proxied => "proxied",
            Outcome::Fallback => "fallback",
            Outcome::UpstreamError => "upstream_error",
            Outcome::Preflight => "preflight",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BridgeError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| BridgeError::Metrics(e.to_string()))?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, outcome: Outcome, start: Instant) {
    metrics::counter!(
        "bridge_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    metrics::histogram!("bridge_request_duration_seconds", "outcome" => outcome.as_str())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_status(status: &UpstreamStatus) {
    metrics::gauge!("bridge_upstream_available").set(if status.is_available { 1.0 } else { 0.0 });
    metrics::gauge!("bridge_upstream_consecutive_failures").set(f64::from(status.consecutive_failures));
}

pub fn set_active_exchanges(count: u64) {
    metrics::gauge!("bridge_active_exchanges").set(count as f64);
}

pub fn record_websocket_session(outcome: &'static str) {
    metrics::counter!("bridge_websocket_sessions_total", "outcome" => outcome).increment(1);
}
