//! Startup orchestration.
//!
//! # Responsibilities
//! - Give the upstream a bounded chance to answer before binding
//! - Bind the public listener (fatal on failure)
//! - Start background tasks (health monitor, HTTP server)
//! - Drive the ordered shutdown: stop accepting, stop probing, drain, exit
//!
//! # Design Decisions
//! - Fail fast: a bind error ends startup, nothing is retried
//! - The public port opens whether or not the upstream is up; the waiting
//!   page covers the gap
//! - Shutdown has a deadline: exchanges still open after it are abandoned

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::health::{HealthMonitor, UpstreamHealth};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::listener::bind_public;
use crate::net::ExchangeTracker;

/// Where the bridge is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Initializing,
    Probing,
    Listening,
    ShuttingDown,
    Stopped,
}

impl BridgePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgePhase::Initializing => "initializing",
            BridgePhase::Probing => "probing",
            BridgePhase::Listening => "listening",
            BridgePhase::ShuttingDown => "shutting_down",
            BridgePhase::Stopped => "stopped",
        }
    }
}

/// The assembled bridge: health monitor, public server and shutdown plumbing.
pub struct Bridge {
    config: BridgeConfig,
    shutdown: Shutdown,
    phase: watch::Sender<BridgePhase>,
    monitor: Arc<HealthMonitor>,
    exchanges: ExchangeTracker,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let monitor = Arc::new(HealthMonitor::new(&config.upstream, &config.health_check));
        let (phase, _) = watch::channel(BridgePhase::Initializing);

        Self {
            config,
            shutdown: Shutdown::new(),
            phase,
            monitor,
            exchanges: ExchangeTracker::new(),
        }
    }

    /// Handle that starts a graceful shutdown when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Watch lifecycle phase changes.
    pub fn phase(&self) -> watch::Receiver<BridgePhase> {
        self.phase.subscribe()
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.monitor.clone()
    }

    pub fn exchanges(&self) -> ExchangeTracker {
        self.exchanges.clone()
    }

    fn set_phase(&self, phase: BridgePhase) {
        tracing::debug!(phase = phase.as_str(), "Lifecycle phase");
        self.phase.send_replace(phase);
    }

    /// Run until shutdown is triggered and the grace period has been honoured.
    ///
    /// Returns an error only for startup failures (bind) or a server crash.
    pub async fn run(self) -> Result<(), BridgeError> {
        tracing::info!(
            listener_host = %self.config.listener.host,
            listener_port = self.config.listener.port,
            upstream = %self.config.upstream_authority(),
            health_path = %self.config.health_check.path,
            "Starting bridge"
        );

        self.set_phase(BridgePhase::Probing);
        let wait = self.config.lifecycle.initial_probe_wait();
        match time::timeout(wait, self.monitor.probe()).await {
            Ok(status) if status.is_available => {
                tracing::info!("Upstream reachable at startup");
            }
            Ok(_) => {
                tracing::info!("Upstream not reachable yet; serving waiting page until it is");
            }
            Err(_) => {
                tracing::info!(
                    wait_ms = wait.as_millis() as u64,
                    "Initial health probe did not finish in time; continuing"
                );
            }
        }

        let listener = match bind_public(&self.config).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind public port");
                self.set_phase(BridgePhase::Stopped);
                return Err(e);
            }
        };

        let health: Arc<dyn UpstreamHealth> = self.monitor.clone();
        let server = HttpServer::new(
            &self.config,
            health,
            self.exchanges.clone(),
            self.shutdown.clone(),
        );

        self.set_phase(BridgePhase::Listening);
        let monitor_task = tokio::spawn(self.monitor.clone().run());
        let mut server_task = tokio::spawn(server.run(listener));

        let mut signal = self.shutdown.subscribe();
        let crashed = tokio::select! {
            _ = signal.recv() => None,
            res = &mut server_task => Some(res),
        };

        self.set_phase(BridgePhase::ShuttingDown);
        tracing::info!(
            active_exchanges = self.exchanges.active_count(),
            "Shutting down"
        );
        self.monitor.stop();
        self.shutdown.trigger();

        let result = match crashed {
            Some(res) => {
                tracing::error!("HTTP server exited unexpectedly");
                server_outcome(res)
            }
            None => {
                let grace = self.config.lifecycle.shutdown_grace();
                let exchanges = &self.exchanges;
                let drained = time::timeout(grace, async {
                    let res = (&mut server_task).await;
                    exchanges.wait_for_drain().await;
                    res
                })
                .await;

                match drained {
                    Ok(res) => server_outcome(res),
                    Err(_) => {
                        tracing::warn!(
                            grace_secs = grace.as_secs(),
                            active_exchanges = self.exchanges.active_count(),
                            "Grace period elapsed; abandoning open exchanges"
                        );
                        server_task.abort();
                        Ok(())
                    }
                }
            }
        };

        if let Err(e) = monitor_task.await {
            tracing::warn!(error = %e, "Health monitor task failed");
        }

        self.set_phase(BridgePhase::Stopped);
        tracing::info!("Bridge stopped");
        result
    }
}

fn server_outcome(res: Result<io::Result<()>, JoinError>) -> Result<(), BridgeError> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Serve(e)),
        Err(e) => Err(BridgeError::Serve(io::Error::new(io::ErrorKind::Other, e))),
    }
}
