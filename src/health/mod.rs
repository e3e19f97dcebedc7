//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe the upstream liveness path
//!     → Update state.rs
//!
//! Passive health checks (passive.rs):
//!     Forwarding attempt fails to connect
//!     → Report to the monitor
//!     → Update state.rs immediately
//!
//! State (state.rs):
//!     Available ←→ Unavailable
//!     One writer (the monitor), many snapshot readers
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - A single success restores availability so recovery is seen on the next tick
//! - The status object is constructed per bridge and injected, never global

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use passive::UpstreamHealth;
pub use state::{StatusBoard, Transition, UpstreamStatus};
