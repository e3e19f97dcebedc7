//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use moodlync_bridge::{Bridge, BridgeConfig, BridgeError, BridgePhase, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const UPSTREAM_GREETING: &str = "Hello from MoodLync";

/// A running mock of the application behind the bridge.
pub struct MockUpstream {
    /// Requests seen, excluding health probes.
    pub hits: Arc<AtomicUsize>,
    /// Close frames received on WebSocket sessions.
    pub ws_closes: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn ws_closes(&self) -> usize {
        self.ws_closes.load(Ordering::SeqCst)
    }

    /// Stop accepting new connections.
    pub fn stop(&self) {
        self.task.abort();
    }
}

async fn count_hits(State(hits): State<Arc<AtomicUsize>>, request: Request, next: Next) -> Response {
    if request.uri().path() != "/api/health" {
        hits.fetch_add(1, Ordering::SeqCst);
    }
    next.run(request).await
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn ws_echo(ws: WebSocketUpgrade, closes: Arc<AtomicUsize>) -> Response {
    ws.protocols(["mood.v1"])
        .on_upgrade(move |socket| echo_socket(socket, closes))
}

async fn echo_socket(mut socket: WebSocket, closes: Arc<AtomicUsize>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let reply = match msg {
            Message::Text(text) if text.as_str() == "ping" => Message::Text("pong".into()),
            Message::Text(text) => Message::Text(text),
            Message::Binary(data) => Message::Binary(data),
            Message::Close(_) => {
                closes.fetch_add(1, Ordering::SeqCst);
                break;
            }
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
}

/// Echo the first message, then close the session from the upstream side.
async fn echo_once_then_close(mut socket: WebSocket) {
    if let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Text(_) | Message::Binary(_)) {
            let _ = socket.send(msg).await;
        }
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "done".into(),
        })))
        .await;
    while let Some(Ok(_)) = socket.recv().await {}
}

/// Start an axum upstream with health, echo, slow, hanging and WebSocket routes.
pub async fn start_upstream(addr: SocketAddr) -> MockUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let ws_closes = Arc::new(AtomicUsize::new(0));
    let closes = ws_closes.clone();

    let app = Router::new()
        .route(
            "/",
            get(|| async { ([("x-upstream", "moodlync")], UPSTREAM_GREETING) }),
        )
        .route("/api/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .route("/api/x", any(echo))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(800)).await;
                "slow done"
            }),
        )
        .route(
            "/hang",
            get(|| std::future::pending::<&'static str>()),
        )
        .route(
            "/ws",
            get(move |ws: WebSocketUpgrade| ws_echo(ws, closes.clone())),
        )
        .route(
            "/ws/once",
            get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(echo_once_then_close) }),
        )
        .layer(middleware::from_fn_with_state(hits.clone(), count_hits));

    let listener = TcpListener::bind(addr).await.unwrap();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream {
        hits,
        ws_closes,
        task,
    }
}

/// Raw upstream that passes health probes but drops every other request
/// without answering.
pub async fn start_flaky_upstream(addr: SocketAddr) -> JoinHandle<()> {
    start_raw_upstream(addr, b"").await
}

/// Raw upstream that passes health probes but answers every other request
/// with a body cut short of its `Content-Length`.
pub async fn start_truncating_upstream(addr: SocketAddr) -> JoinHandle<()> {
    start_raw_upstream(addr, b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial").await
}

/// Serve health probes normally; write `reply` for anything else, then hang up.
async fn start_raw_upstream(addr: SocketAddr, reply: &'static [u8]) -> JoinHandle<()> {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while read < buf.len() {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let head = String::from_utf8_lossy(&buf[..read]);
                if head.starts_with("GET /api/health ") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                        .await;
                } else if !reply.is_empty() {
                    let _ = socket.write_all(reply).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    })
}

/// Bridge config for loopback tests with short timings.
pub fn bridge_config(public_port: u16, upstream_port: u16) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = public_port;
    config.upstream.host = "127.0.0.1".into();
    config.upstream.port = upstream_port;
    config.health_check.interval_ms = 200;
    config.health_check.timeout_ms = 500;
    config.timeouts.connect_ms = 1000;
    config.lifecycle.initial_probe_wait_ms = 500;
    config.lifecycle.shutdown_grace_secs = 3;
    config
}

pub struct RunningBridge {
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), BridgeError>>,
}

impl RunningBridge {
    /// Trigger shutdown and wait for `run` to return.
    pub async fn stop(self) -> Result<(), BridgeError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("bridge did not stop in time")
            .expect("bridge task panicked")
    }
}

/// Start a bridge and wait until its public port accepts connections.
pub async fn start_bridge(config: BridgeConfig) -> RunningBridge {
    let bridge = Bridge::new(config);
    let shutdown = bridge.shutdown_handle();
    let mut phase = bridge.phase();

    let task = tokio::spawn(bridge.run());
    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| *p == BridgePhase::Listening),
    )
    .await
    .expect("bridge never started listening")
    .expect("bridge stopped before listening");

    RunningBridge { shutdown, task }
}

/// HTTP client that never reuses connections or consults proxy settings.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `url` until it answers with `status`.
pub async fn wait_for_status(client: &reqwest::Client, url: &str, status: u16, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Ok(res) = client.get(url).send().await {
            if res.status().as_u16() == status {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never returned {}",
            url,
            status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
