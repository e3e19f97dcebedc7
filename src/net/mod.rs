//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Public port
//!     → listener.rs (bind, classify bind errors)
//!     → Hand off to HTTP layer
//!     → connection.rs (per-exchange guards, drain on shutdown)
//! ```
//!
//! # Design Decisions
//! - Address-in-use is a configuration error and ends the process
//! - Each exchange tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ExchangeKind, ExchangeTracker, ProxiedExchange};
