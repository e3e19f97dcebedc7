//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the single catch-all handler
//! - Wire up middleware (request ID, tracing, CORS headers)
//! - Serve on the public listener until shutdown
//! - Dispatch each request: preflight, WebSocket, waiting page, or forward
//! - Report forwarding failures to the health monitor
//!
//! # Design Decisions
//! - Availability is read once per request from a status snapshot
//! - No retries: a failed forward is answered with 502 and the upstream
//!   is marked unavailable so the next request gets the waiting page
//! - CORS headers override whatever the upstream sent, on every response

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::config::{BridgeConfig, FallbackConfig};
use crate::error::{is_client_abort, UpstreamFailure};
use crate::health::UpstreamHealth;
use crate::http::request::{build_upstream_request, is_websocket_upgrade, request_id, RequestIdMaker};
use crate::http::response::{self, CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_ALLOW_ORIGIN};
use crate::http::{fallback, websocket};
use crate::lifecycle::Shutdown;
use crate::net::{ExchangeKind, ExchangeTracker};
use crate::observability::metrics::{self, Outcome};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<dyn UpstreamHealth>,
    pub client: Client<HttpConnector, Body>,
    pub upstream_authority: Arc<str>,
    pub fallback: Arc<FallbackConfig>,
    pub connect_timeout: Duration,
    pub exchanges: ExchangeTracker,
    pub shutdown: Shutdown,
}

/// HTTP server for the public port.
pub struct HttpServer {
    router: Router,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server forwarding to `config.upstream`.
    pub fn new(
        config: &BridgeConfig,
        health: Arc<dyn UpstreamHealth>,
        exchanges: ExchangeTracker,
        shutdown: Shutdown,
    ) -> Self {
        let connect_timeout = config.timeouts.connect();

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            health,
            client,
            upstream_authority: Arc::from(config.upstream_authority()),
            fallback: Arc::new(config.fallback.clone()),
            connect_timeout,
            exchanges,
            shutdown: shutdown.clone(),
        };

        Self {
            router: Self::build_router(state),
            shutdown,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(bridge_handler))
            .route("/{*path}", any(bridge_handler))
            .fallback(bridge_handler)
            .with_state(state)
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                CORS_ALLOW_ORIGIN,
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                CORS_ALLOW_METHODS,
            ))
            .layer(SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                CORS_ALLOW_HEADERS,
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id(request.headers()),
                    )
                }),
            )
            .layer(SetRequestIdLayer::x_request_id(RequestIdMaker))
    }

    /// The fully layered router, for driving the bridge without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections until shutdown is triggered.
    pub async fn run(self, listener: TcpListener) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut signal = self.shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.recv().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler for every method and path.
async fn bridge_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    if request.method() == Method::OPTIONS {
        metrics::record_request("OPTIONS", 204, Outcome::Preflight, start);
        return response::preflight();
    }

    if is_websocket_upgrade(request.headers()) {
        return match ws {
            Ok(ws) => {
                let (parts, _) = request.into_parts();
                websocket::forward(&state, ws, &parts.uri, &parts.headers, client_addr, start).await
            }
            Err(rejection) => {
                tracing::debug!(
                    request_id = %request_id(request.headers()),
                    reason = %rejection.body_text(),
                    "Malformed upgrade request"
                );
                metrics::record_request(request.method().as_str(), 400, Outcome::Rejected, start);
                response::refuse_upgrade(StatusCode::BAD_REQUEST)
            }
        };
    }

    let status = state.health.status();
    if !status.is_available {
        tracing::debug!(
            request_id = %request_id(request.headers()),
            path = %request.uri().path(),
            consecutive_failures = status.consecutive_failures,
            "Upstream unavailable; serving waiting page"
        );
        metrics::record_request(
            request.method().as_str(),
            fallback::FALLBACK_STATUS.as_u16(),
            Outcome::Fallback,
            start,
        );
        return fallback::waiting_response(
            request.headers(),
            request.uri().path(),
            &state.fallback,
            &status,
        );
    }

    forward_http(&state, request, client_addr, start).await
}

/// Forward a plain HTTP request and stream the upstream response back.
async fn forward_http(
    state: &AppState,
    request: Request<Body>,
    client_addr: Option<SocketAddr>,
    start: Instant,
) -> Response {
    let request_id = request_id(request.headers()).to_owned();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Forwarding request"
    );

    let exchange = state.exchanges.begin(ExchangeKind::Http);
    let (parts, body) = request.into_parts();
    let upstream_request =
        match build_upstream_request(parts, body, &state.upstream_authority, client_addr) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Could not build upstream request");
                metrics::record_request(method.as_str(), 400, Outcome::Rejected, start);
                return (StatusCode::BAD_REQUEST, "Bad Request\n").into_response();
            }
        };

    match state.client.request(upstream_request).await {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            tracing::debug!(
                request_id = %request_id,
                exchange_id = %exchange.id(),
                status = status.as_u16(),
                "Upstream responded"
            );
            metrics::record_request(method.as_str(), status.as_u16(), Outcome::Proxied, start);
            response::from_upstream(upstream_response, exchange, state.health.clone())
        }
        Err(e) if is_client_abort(&e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Client aborted request body");
            metrics::record_request(method.as_str(), 400, Outcome::Rejected, start);
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(e) => {
            let failure = UpstreamFailure::classify(&e);
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                reason = %failure,
                error = %e,
                "Upstream request failed"
            );
            state.health.report_failure(failure);
            metrics::record_request(method.as_str(), 502, Outcome::UpstreamError, start);
            response::bad_gateway(failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::UpstreamStatus;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tower::ServiceExt;

    /// Scripted availability that records reported failures.
    struct Scripted {
        status: Mutex<UpstreamStatus>,
        reports: Mutex<Vec<UpstreamFailure>>,
    }

    impl Scripted {
        fn new(available: bool) -> Arc<Self> {
            let status = if available {
                UpstreamStatus::initial().succeeded(SystemTime::now())
            } else {
                UpstreamStatus::initial()
            };
            Arc::new(Self {
                status: Mutex::new(status),
                reports: Mutex::new(Vec::new()),
            })
        }
    }

    impl UpstreamHealth for Scripted {
        fn status(&self) -> UpstreamStatus {
            *self.status.lock().unwrap()
        }

        fn report_failure(&self, failure: UpstreamFailure) {
            self.reports.lock().unwrap().push(failure);
            let mut status = self.status.lock().unwrap();
            *status = status.failed(failure, SystemTime::now());
        }
    }

    fn server(health: Arc<Scripted>) -> HttpServer {
        let mut config = BridgeConfig::default();
        // Nothing listens on port 1.
        config.upstream.port = 1;
        config.timeouts.connect_ms = 500;
        HttpServer::new(&config, health, ExchangeTracker::new(), Shutdown::new())
    }

    #[tokio::test]
    async fn preflight_answered_locally_with_cors() {
        let health = Scripted::new(true);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/moods")
            .body(Body::empty())
            .unwrap();

        let response = server(health.clone()).router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD"
        );
        assert!(health.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_upstream_gets_waiting_page() {
        let health = Scripted::new(false);
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = server(health).router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn request_id_is_propagated() {
        let health = Scripted::new(false);
        let request = Request::builder()
            .uri("/")
            .header("x-request-id", "mood-123")
            .body(Body::empty())
            .unwrap();

        let response = server(health).router().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "mood-123");
    }

    #[tokio::test]
    async fn failed_forward_is_502_and_downgrades() {
        let health = Scripted::new(true);
        let request = Request::builder().uri("/api/x").body(Body::empty()).unwrap();

        let response = server(health.clone()).router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(health.reports.lock().unwrap().as_slice(), &[UpstreamFailure::Refused]);
        assert!(!health.status().is_available);

        let request = Request::builder().uri("/api/x").body(Body::empty()).unwrap();
        let response = server(health).router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_upgrade_is_rejected() {
        let health = Scripted::new(true);
        let request = Request::builder()
            .uri("/ws")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "upgrade")
            .body(Body::empty())
            .unwrap();

        let response = server(health.clone()).router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert!(health.reports.lock().unwrap().is_empty());
    }
}
