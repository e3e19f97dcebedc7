//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Establish WebSocket connection to the upstream
//! - Complete upgrade handshake with client only once the upstream is open
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Bridge ←──── WebSocket frames ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - WebSocket handled separately from HTTP request/response
//! - Frame-level forwarding (no message buffering), one task per session
//! - Close frames propagated in both directions
//! - Ping/Pong are answered per hop by each socket and never relayed
//! - No automatic reconnect: the client owns retrying a session

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderName, Request, StatusCode, Uri};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    protocol::{frame::coding::CloseCode, CloseFrame as UpstreamCloseFrame},
    Message as UpstreamMessage,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::UpstreamFailure;
use crate::http::fallback;
use crate::http::request::{
    add_forwarded_headers, request_id, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO, X_REQUEST_ID,
};
use crate::http::response;
use crate::http::server::AppState;
use crate::lifecycle::ShutdownSignal;
use crate::net::{ExchangeKind, ProxiedExchange};
use crate::observability::metrics::{self, Outcome};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on flushing close frames once a session ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request headers copied onto the upstream handshake.
const FORWARDED_HANDSHAKE_HEADERS: [HeaderName; 5] = [
    header::SEC_WEBSOCKET_PROTOCOL,
    header::COOKIE,
    header::AUTHORIZATION,
    header::ORIGIN,
    header::USER_AGENT,
];

/// Why a relayed session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    UpstreamClosed,
    ClientError,
    UpstreamError,
    Shutdown,
}

impl SessionEnd {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::UpstreamClosed => "upstream_closed",
            SessionEnd::ClientError => "client_error",
            SessionEnd::UpstreamError => "upstream_error",
            SessionEnd::Shutdown => "shutdown",
        }
    }
}

/// `ws://authority/path?query` for the upstream side of a session.
pub fn upstream_ws_url(authority: &str, uri: &Uri) -> Result<Url, url::ParseError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("ws://{}{}", authority, path_and_query))
}

/// Build the upstream handshake request. `Host` comes from the URL.
pub fn build_handshake(
    url: &Url,
    headers: &HeaderMap,
    client_addr: Option<SocketAddr>,
) -> Result<Request<()>, tungstenite::Error> {
    let mut request = url.as_str().into_client_request()?;
    let outbound = request.headers_mut();

    for name in FORWARDED_HANDSHAKE_HEADERS.iter() {
        for value in headers.get_all(name) {
            outbound.append(name, value.clone());
        }
    }
    for name in [X_REQUEST_ID, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO] {
        if let Some(value) = headers.get(&name) {
            outbound.insert(name, value.clone());
        }
    }
    add_forwarded_headers(outbound, client_addr, headers.get(header::HOST).cloned());

    Ok(request)
}

/// Forward an upgrade request: connect upstream first, then accept the client.
pub async fn forward(
    state: &AppState,
    mut ws: WebSocketUpgrade,
    uri: &Uri,
    headers: &HeaderMap,
    client_addr: Option<SocketAddr>,
    start: Instant,
) -> Response {
    let request_id = request_id(headers).to_owned();

    if !state.health.is_available() {
        tracing::debug!(request_id = %request_id, path = %uri.path(), "Upstream unavailable; refusing upgrade");
        metrics::record_websocket_session("refused");
        metrics::record_request("GET", fallback::FALLBACK_STATUS.as_u16(), Outcome::Fallback, start);
        return fallback::refuse_websocket();
    }

    let handshake = upstream_ws_url(&state.upstream_authority, uri)
        .map_err(|e| e.to_string())
        .and_then(|url| build_handshake(&url, headers, client_addr).map_err(|e| e.to_string()));
    let handshake = match handshake {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Malformed upgrade request");
            metrics::record_request("GET", 400, Outcome::Rejected, start);
            return response::refuse_upgrade(StatusCode::BAD_REQUEST);
        }
    };

    let connect = tokio::time::timeout(
        state.connect_timeout,
        tokio_tungstenite::connect_async(handshake),
    )
    .await;

    let (upstream, upstream_response) = match connect {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            let failure = UpstreamFailure::from_ws(&e);
            return upstream_failed(state, &request_id, uri, failure, start);
        }
        Err(_) => return upstream_failed(state, &request_id, uri, UpstreamFailure::TimedOut, start),
    };

    if let Some(protocol) = upstream_response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        ws = ws.protocols([protocol.to_owned()]);
    }

    let exchange = state.exchanges.begin(ExchangeKind::WebSocket);
    let shutdown = state.shutdown.subscribe();

    tracing::info!(
        request_id = %request_id,
        exchange_id = %exchange.id(),
        path = %uri.path(),
        "WebSocket session opened"
    );
    metrics::record_request("GET", 101, Outcome::Proxied, start);

    ws.on_failed_upgrade(|error| {
        tracing::warn!(error = %error, "Client WebSocket upgrade failed");
        metrics::record_websocket_session("client_upgrade_failed");
    })
    .on_upgrade(move |socket| relay(socket, upstream, shutdown, exchange))
}

fn upstream_failed(
    state: &AppState,
    request_id: &str,
    uri: &Uri,
    failure: UpstreamFailure,
    start: Instant,
) -> Response {
    tracing::warn!(
        request_id = %request_id,
        path = %uri.path(),
        reason = %failure,
        "Upstream WebSocket handshake failed"
    );
    state.health.report_failure(failure);
    metrics::record_websocket_session("upstream_failed");
    metrics::record_request("GET", 502, Outcome::UpstreamError, start);
    response::refuse_upgrade(StatusCode::BAD_GATEWAY)
}

/// Relay messages until either side closes, errors, or the bridge shuts down.
async fn relay(
    client: WebSocket,
    upstream: UpstreamSocket,
    mut shutdown: ShutdownSignal,
    exchange: ProxiedExchange,
) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let end = loop {
        tokio::select! {
            msg = client_rx.next() => match msg {
                Some(Ok(msg)) => {
                    let closing = matches!(msg, Message::Close(_));
                    if let Some(msg) = to_upstream(msg) {
                        if let Err(e) = upstream_tx.send(msg).await {
                            tracing::debug!(exchange_id = %exchange.id(), error = %e, "Send to upstream failed");
                            break SessionEnd::UpstreamError;
                        }
                    }
                    if closing {
                        break SessionEnd::ClientClosed;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(exchange_id = %exchange.id(), error = %e, "Client WebSocket error");
                    break SessionEnd::ClientError;
                }
                None => break SessionEnd::ClientClosed,
            },
            msg = upstream_rx.next() => match msg {
                Some(Ok(UpstreamMessage::Frame(_))) => {}
                Some(Ok(msg)) => {
                    let closing = matches!(msg, UpstreamMessage::Close(_));
                    if let Some(msg) = to_client(msg) {
                        if let Err(e) = client_tx.send(msg).await {
                            tracing::debug!(exchange_id = %exchange.id(), error = %e, "Send to client failed");
                            break SessionEnd::ClientError;
                        }
                    }
                    if closing {
                        break SessionEnd::UpstreamClosed;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(exchange_id = %exchange.id(), error = %e, "Upstream WebSocket error");
                    break SessionEnd::UpstreamError;
                }
                None => break SessionEnd::UpstreamClosed,
            },
            _ = shutdown.recv() => {
                let _ = client_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "bridge shutting down".into(),
                    })))
                    .await;
                let _ = upstream_tx
                    .send(UpstreamMessage::Close(Some(UpstreamCloseFrame {
                        code: CloseCode::Away,
                        reason: "bridge shutting down".into(),
                    })))
                    .await;
                break SessionEnd::Shutdown;
            }
        }
    };

    // Whichever side is still open gets closed too.
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        let _ = client_tx.close().await;
        let _ = upstream_tx.close().await;
    })
    .await;

    tracing::info!(
        exchange_id = %exchange.id(),
        reason = end.as_str(),
        duration_ms = exchange.elapsed().as_millis() as u64,
        "WebSocket session closed"
    );
    metrics::record_websocket_session(end.as_str());
}

/// Client message to relay upstream. Control pings stay on their own hop.
fn to_upstream(msg: Message) -> Option<UpstreamMessage> {
    let msg = match msg {
        Message::Text(text) => UpstreamMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(_) | Message::Pong(_) => return None,
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|cf| UpstreamCloseFrame {
            code: CloseCode::from(cf.code),
            reason: cf.reason.as_str().to_owned().into(),
        })),
    };
    Some(msg)
}

fn to_client(msg: UpstreamMessage) -> Option<Message> {
    let msg = match msg {
        UpstreamMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) => return None,
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|cf| CloseFrame {
            code: cf.code.into(),
            reason: cf.reason.as_str().to_owned().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(msg)
}
