//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Initial probe (bounded) → Bind public port → Start monitor + server
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop probing → Drain exchanges → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second signal  → Exit immediately
//! ```
//!
//! # Design Decisions
//! - Ordered startup: probe first, listener last
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: open exchanges are abandoned after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{Bridge, BridgePhase};
