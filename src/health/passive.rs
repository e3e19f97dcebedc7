//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Give forwarders read access to the upstream status
//! - Accept failure reports from forwarding attempts
//! - Downgrade availability immediately instead of waiting for the next probe
//!
//! # Design Decisions
//! - Only connection-level failures count; a rejected WebSocket handshake
//!   or an upstream 5xx response does not
//! - Forwarders depend on the [`UpstreamHealth`] trait, not the monitor,
//!   so tests can inject a scripted status

use crate::error::UpstreamFailure;
use crate::health::active::{log_transition, HealthMonitor};
use crate::health::state::UpstreamStatus;
use crate::observability::metrics;

/// Availability view shared with the request path.
pub trait UpstreamHealth: Send + Sync + 'static {
    /// Current status snapshot.
    fn status(&self) -> UpstreamStatus;

    fn is_available(&self) -> bool {
        self.status().is_available
    }

    /// A forwarding attempt failed after a connection was tried.
    fn report_failure(&self, failure: UpstreamFailure);
}

impl UpstreamHealth for HealthMonitor {
    fn status(&self) -> UpstreamStatus {
        HealthMonitor::status(self)
    }

    fn report_failure(&self, failure: UpstreamFailure) {
        if !failure.marks_unavailable() {
            return;
        }

        let transition = self.board().record_failure(failure);
        log_transition(&transition, "forward");
        metrics::record_upstream_status(&transition.current);
    }
}
