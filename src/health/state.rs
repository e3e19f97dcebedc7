//! Upstream availability state.
//!
//! # States
//! - Available: requests are forwarded
//! - Unavailable: requests are answered by the fallback responder
//!
//! # State Transitions
//! ```text
//! Unavailable → Available: one probe answered in 200..500
//! Available → Unavailable: one failed probe, or a failed forwarding attempt
//! ```
//!
//! # Design Decisions
//! - Initial state is Unavailable until the first probe succeeds
//! - Every update replaces the whole snapshot through a watch channel,
//!   so readers never observe a half-written status
//! - Only the health monitor holds a `StatusBoard`; readers get snapshots

use std::time::SystemTime;

use tokio::sync::watch;

use crate::error::UpstreamFailure;

/// Point-in-time view of the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamStatus {
    pub is_available: bool,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<SystemTime>,
    pub last_failure: Option<UpstreamFailure>,
}

impl UpstreamStatus {
    /// Status before anything has been checked.
    pub const fn initial() -> Self {
        Self {
            is_available: false,
            consecutive_failures: 0,
            last_checked_at: None,
            last_failure: None,
        }
    }

    /// Status after a successful check at `at`.
    pub fn succeeded(self, at: SystemTime) -> Self {
        Self {
            is_available: true,
            consecutive_failures: 0,
            last_checked_at: Some(at),
            last_failure: None,
        }
    }

    /// Status after a failed check or forwarding attempt at `at`.
    pub fn failed(self, failure: UpstreamFailure, at: SystemTime) -> Self {
        Self {
            is_available: false,
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            last_checked_at: Some(at),
            last_failure: Some(failure),
        }
    }
}

impl Default for UpstreamStatus {
    fn default() -> Self {
        Self::initial()
    }
}

/// Result of a status update: the snapshot before and after.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub previous: UpstreamStatus,
    pub current: UpstreamStatus,
}

impl Transition {
    pub fn came_up(&self) -> bool {
        !self.previous.is_available && self.current.is_available
    }

    pub fn went_down(&self) -> bool {
        self.previous.is_available && !self.current.is_available
    }
}

/// Owner of the shared upstream status.
#[derive(Debug)]
pub struct StatusBoard {
    tx: watch::Sender<UpstreamStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(UpstreamStatus::initial());
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> UpstreamStatus {
        *self.tx.borrow()
    }

    /// Receiver that is notified on every update.
    pub fn subscribe(&self) -> watch::Receiver<UpstreamStatus> {
        self.tx.subscribe()
    }

    pub fn record_success(&self) -> Transition {
        self.update(|status| status.succeeded(SystemTime::now()))
    }

    pub fn record_failure(&self, failure: UpstreamFailure) -> Transition {
        self.update(|status| status.failed(failure, SystemTime::now()))
    }

    fn update(&self, next: impl FnOnce(UpstreamStatus) -> UpstreamStatus) -> Transition {
        let mut previous = UpstreamStatus::initial();
        let mut current = previous;
        self.tx.send_modify(|status| {
            previous = *status;
            *status = next(*status);
            current = *status;
        });
        Transition { previous, current }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
