//! Proxied exchange tracking.
//!
//! # Responsibilities
//! - Generate unique exchange IDs for tracing
//! - Count in-flight HTTP requests and WebSocket sessions
//! - Let shutdown wait for in-flight exchanges to drain
//!
//! # Design Decisions
//! - The live count sits in a watch channel so draining wakes on the last drop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for exchange IDs.
static EXCHANGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a proxied exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(u64);

impl ExchangeId {
    /// Generate a new unique exchange ID.
    pub fn new() -> Self {
        Self(EXCHANGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ex-{}", self.0)
    }
}

/// What kind of traffic an exchange carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Http,
    WebSocket,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Http => "http",
            ExchangeKind::WebSocket => "websocket",
        }
    }
}

/// Counts in-flight exchanges for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ExchangeTracker {
    active: Arc<watch::Sender<u64>>,
}

impl Default for ExchangeTracker {
    fn default() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }
}

impl ExchangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new exchange. The returned guard decrements the count on drop.
    pub fn begin(&self, kind: ExchangeKind) -> ProxiedExchange {
        let mut active = 0;
        self.active.send_modify(|count| {
            *count += 1;
            active = *count;
        });
        metrics::set_active_exchanges(active);

        ProxiedExchange {
            active: Arc::clone(&self.active),
            id: ExchangeId::new(),
            kind,
            started: Instant::now(),
        }
    }

    /// Get current in-flight exchange count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every exchange has finished.
    pub async fn wait_for_drain(&self) {
        let mut count = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = count.wait_for(|active| *active == 0).await;
    }
}

/// Guard for one forwarded request or WebSocket session.
///
/// Lives from the moment the exchange starts until both sides are closed.
#[derive(Debug)]
pub struct ProxiedExchange {
    active: Arc<watch::Sender<u64>>,
    id: ExchangeId,
    kind: ExchangeKind,
    started: Instant,
}

impl ProxiedExchange {
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ProxiedExchange {
    fn drop(&mut self) {
        let mut remaining = 0;
        self.active.send_modify(|count| {
            *count = count.saturating_sub(1);
            remaining = *count;
        });
        metrics::set_active_exchanges(remaining);
        tracing::trace!(
            exchange_id = %self.id,
            kind = self.kind.as_str(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Exchange finished"
        );
    }
}
