//! MoodLync port bridge library.
//!
//! Sits on the public port of a hosted deployment and relays HTTP and
//! WebSocket traffic to the application on its internal port, answering
//! with a self-refreshing waiting page while that application is down.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::BridgeConfig;
pub use error::{BridgeError, UpstreamFailure};
pub use http::HttpServer;
pub use lifecycle::{Bridge, BridgePhase, Shutdown};
