//! Error taxonomy for the bridge.
//!
//! # Categories
//! - Transient upstream unavailability: classified as [`UpstreamFailure`],
//!   folded into the upstream status, never surfaced as a process error.
//! - Mid-stream upstream failure: [`UpstreamFailure`] seen by a forwarder,
//!   answered with 502 and reported to the health monitor.
//! - Fatal process errors: [`BridgeError`], logged and turned into a non-zero
//!   exit code.
//!
//! Raw OS and protocol errors are mapped here once; the rest of the crate
//! switches on these types instead of inspecting `io::ErrorKind` directly.

use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;

use axum::http::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Process-level errors raised by the lifecycle controller.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Another process already owns the public port.
    #[error("public address {0} is already in use")]
    PortInUse(SocketAddr),

    /// Any other failure to bind the public listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[source] io::Error),

    /// Prometheus exporter could not be installed.
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

impl BridgeError {
    /// Classify a bind failure for `addr`.
    pub fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => BridgeError::PortInUse(addr),
            _ => BridgeError::Bind { addr, source },
        }
    }

    /// Fatal errors are configuration problems that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::PortInUse(_) | BridgeError::Bind { .. } | BridgeError::Config(_)
        )
    }
}

/// Why a conversation with the upstream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// Nothing is listening on the upstream port.
    Refused,
    /// Connect, probe or response deadline elapsed.
    TimedOut,
    /// The connection was closed or reset mid-exchange.
    Reset,
    /// Host or network unreachable, or the name did not resolve.
    Unreachable,
    /// Health probe answered outside the 200..500 range.
    Unhealthy(StatusCode),
    /// WebSocket handshake was answered with a non-101 status.
    Rejected(StatusCode),
    /// Anything that does not fit the categories above.
    Other,
}

impl UpstreamFailure {
    /// Map an I/O error kind onto a failure category.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => UpstreamFailure::Refused,
            io::ErrorKind::TimedOut => UpstreamFailure::TimedOut,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => UpstreamFailure::Reset,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::NotFound => UpstreamFailure::Unreachable,
            _ => UpstreamFailure::Other,
        }
    }

    /// Walk an error's source chain and classify the innermost cause we recognise.
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        let mut fallback = UpstreamFailure::Other;

        while let Some(e) = current {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                let kind = Self::from_io(io_err);
                if kind != UpstreamFailure::Other {
                    return kind;
                }
            }
            if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
                if hyper_err.is_timeout() {
                    return UpstreamFailure::TimedOut;
                }
                if hyper_err.is_incomplete_message() || hyper_err.is_closed() || hyper_err.is_canceled() {
                    fallback = UpstreamFailure::Reset;
                }
            }
            current = e.source();
        }

        fallback
    }

    /// Classify a failed upstream WebSocket handshake.
    pub fn from_ws(err: &tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Io(io_err) => Self::from_io(io_err),
            WsError::Http(response) => UpstreamFailure::Rejected(response.status()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => UpstreamFailure::Reset,
            _ => UpstreamFailure::Other,
        }
    }

    /// Whether this failure means the upstream cannot currently serve traffic.
    ///
    /// A handshake rejection proves the upstream is up, so it does not count.
    pub fn marks_unavailable(&self) -> bool {
        !matches!(self, UpstreamFailure::Rejected(_))
    }

    /// Short human-readable label for logs, metrics and diagnostic bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamFailure::Refused => "connection refused",
            UpstreamFailure::TimedOut => "timed out",
            UpstreamFailure::Reset => "connection reset",
            UpstreamFailure::Unreachable => "unreachable",
            UpstreamFailure::Unhealthy(_) => "unhealthy status",
            UpstreamFailure::Rejected(_) => "handshake rejected",
            UpstreamFailure::Other => "upstream error",
        }
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Unhealthy(status) | UpstreamFailure::Rejected(status) => {
                write!(f, "{} ({})", self.as_str(), status)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// True when the error chain shows the inbound client gave up on its own body,
/// which says nothing about upstream health.
pub fn is_client_abort(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<axum::Error>() {
            return true;
        }
        current = e.source();
    }
    false
}
