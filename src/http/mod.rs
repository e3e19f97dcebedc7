//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, CORS, dispatch)
//!     → OPTIONS            → response.rs (204 preflight)
//!     → Upgrade: websocket → websocket.rs (connect upstream, then relay frames)
//!     → upstream down      → fallback.rs (503 waiting page)
//!     → otherwise          → request.rs (retarget) → upstream → response.rs (stream back)
//! ```

pub mod fallback;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestIdMaker, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
