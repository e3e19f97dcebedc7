//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the upstream liveness endpoint
//! - Update the shared upstream status based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::watch;
use tokio::time;

use crate::config::{HealthCheckConfig, UpstreamConfig};
use crate::error::UpstreamFailure;
use crate::health::state::{StatusBoard, Transition, UpstreamStatus};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

pub struct HealthMonitor {
    probe_uri: String,
    interval: Duration,
    healthy_interval: Duration,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
    board: StatusBoard,
    stopper: Shutdown,
}

impl HealthMonitor {
    pub fn new(upstream: &UpstreamConfig, config: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout()));

        // Fresh connection per probe so a crashed upstream is noticed.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            probe_uri: format!("http://{}{}", upstream.authority(), config.path),
            interval: config.interval(),
            healthy_interval: config.healthy_interval(),
            timeout: config.timeout(),
            client,
            board: StatusBoard::new(),
            stopper: Shutdown::new(),
        }
    }

    /// Current upstream status snapshot.
    pub fn status(&self) -> UpstreamStatus {
        self.board.snapshot()
    }

    /// Watch every status update.
    pub fn subscribe(&self) -> watch::Receiver<UpstreamStatus> {
        self.board.subscribe()
    }

    pub(super) fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Probe the upstream once and fold the outcome into the status.
    ///
    /// Never fails: every error becomes an `Unavailable` update.
    pub async fn probe(&self) -> UpstreamStatus {
        let transition = match self.check().await {
            Ok(status) => {
                tracing::debug!(uri = %self.probe_uri, status = %status, "Health check passed");
                self.board.record_success()
            }
            Err(failure) => {
                tracing::debug!(uri = %self.probe_uri, reason = %failure, "Health check failed");
                self.board.record_failure(failure)
            }
        };

        log_transition(&transition, "probe");
        metrics::record_upstream_status(&transition.current);
        transition.current
    }

    async fn check(&self) -> Result<StatusCode, UpstreamFailure> {
        let request = Request::builder()
            .method("GET")
            .uri(self.probe_uri.as_str())
            .header("user-agent", "moodlync-bridge-health-check")
            .body(Body::empty())
            .map_err(|e| {
                tracing::error!(uri = %self.probe_uri, error = %e, "Failed to build health check request");
                UpstreamFailure::Other
            })?;

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if is_live_status(status) {
                    Ok(status)
                } else {
                    Err(UpstreamFailure::Unhealthy(status))
                }
            }
            Ok(Err(e)) => Err(UpstreamFailure::classify(&e)),
            Err(_) => Err(UpstreamFailure::TimedOut),
        }
    }

    /// Probe immediately, then keep probing until [`stop`](Self::stop) is called.
    pub async fn run(self: Arc<Self>) {
        let mut stop = self.stopper.subscribe();

        tracing::info!(
            uri = %self.probe_uri,
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Health monitor starting"
        );

        loop {
            let status = tokio::select! {
                status = self.probe() => status,
                _ = stop.recv() => break,
            };

            let delay = if status.is_available {
                self.healthy_interval
            } else {
                self.interval
            };

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop.recv() => break,
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Cancel periodic probing. Safe to call more than once.
    pub fn stop(&self) {
        self.stopper.trigger();
    }
}

/// Any answer below 500 means the upstream process is up and routing requests.
pub fn is_live_status(status: StatusCode) -> bool {
    (200..500).contains(&status.as_u16())
}

pub(super) fn log_transition(transition: &Transition, source: &'static str) {
    let current = &transition.current;
    if transition.came_up() {
        tracing::info!(source, "Upstream is available");
    } else if transition.went_down() {
        tracing::warn!(
            source,
            reason = current.last_failure.map(|f| f.as_str()).unwrap_or("unknown"),
            "Upstream became unavailable"
        );
    } else if !current.is_available && current.consecutive_failures % 10 == 1 {
        tracing::info!(
            source,
            failures = current.consecutive_failures,
            "Waiting for upstream"
        );
    }
}
