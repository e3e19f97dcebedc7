//! Public TCP listener.
//!
//! # Responsibilities
//! - Bind the public address the hosting platform probes
//! - Classify bind failures (address in use is fatal, never retried)

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Bind the public listener for `config`.
pub async fn bind_public(config: &BridgeConfig) -> Result<TcpListener, BridgeError> {
    let addr = config.public_addr().ok_or_else(|| BridgeError::Bind {
        addr: SocketAddr::from(([0, 0, 0, 0], config.listener.port)),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid listener host '{}'", config.listener.host),
        ),
    })?;

    bind(addr).await
}

/// Bind `addr`, mapping OS errors onto [`BridgeError`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, BridgeError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::from_bind(addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::from_bind(addr, e))?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok(listener)
}
