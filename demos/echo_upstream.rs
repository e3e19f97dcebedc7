//! Stand-in for the MoodLync application, for trying the bridge locally.
//!
//! ```text
//! cargo run --example echo_upstream            # listens on 127.0.0.1:3000
//! cargo run -- --public-port 5000              # bridge in front of it
//! ```

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| axum::http::HeaderValue::from_static("application/octet-stream"));
    ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn ws(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(echo_socket)
}

async fn echo_socket(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let reply = match msg {
            Message::Text(text) if text.as_str() == "ping" => Message::Text("pong".into()),
            Message::Text(text) => Message::Text(text),
            Message::Binary(data) => Message::Binary(data),
            Message::Close(_) => break,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    let app = Router::new()
        .route("/", get(|| async { "Hello from MoodLync" }))
        .route("/api/health", get(health))
        .route("/api/echo", any(echo))
        .route("/ws", get(ws));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    println!("Echo upstream listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
