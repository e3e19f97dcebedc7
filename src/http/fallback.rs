//! Waiting page served while the upstream is unavailable.
//!
//! Always answers `503 Service Unavailable` with `Retry-After`. Browsers get an
//! HTML page that reloads itself; API clients get JSON. Nothing here touches the
//! network: the decision is made from the status snapshot alone.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::FallbackConfig;
use crate::health::UpstreamStatus;
use crate::http::response;

pub const FALLBACK_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

#[derive(Debug, Serialize)]
struct WaitingBody<'a> {
    status: &'static str,
    message: &'a str,
    retry_after_secs: u64,
    consecutive_failures: u32,
}

const WAITING_MESSAGE: &str = "The application is starting up. Please retry shortly.";

/// Whether the client should get the JSON variant.
pub fn prefers_json(headers: &HeaderMap, path: &str) -> bool {
    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false);

    accepts_json || path == "/api" || path.starts_with("/api/")
}

/// Build the waiting response for an HTTP request.
pub fn waiting_response(
    headers: &HeaderMap,
    path: &str,
    config: &FallbackConfig,
    status: &UpstreamStatus,
) -> Response {
    let retry_after = config.refresh_secs.to_string();
    let common = [
        (header::RETRY_AFTER, retry_after),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];

    if prefers_json(headers, path) {
        let body = WaitingBody {
            status: "starting",
            message: WAITING_MESSAGE,
            retry_after_secs: config.refresh_secs,
            consecutive_failures: status.consecutive_failures,
        };
        (FALLBACK_STATUS, common, axum::Json(body)).into_response()
    } else {
        (
            FALLBACK_STATUS,
            common,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            waiting_page(config),
        )
            .into_response()
    }
}

/// Refuse a WebSocket upgrade while the upstream is down. No handshake happens.
pub fn refuse_websocket() -> Response {
    response::refuse_upgrade(FALLBACK_STATUS)
}

fn waiting_page(config: &FallbackConfig) -> String {
    let title = escape_html(&config.title);
    let refresh = config.refresh_secs;
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="{refresh}">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title} is starting</title>
  <style>
    body {{ font-family: system-ui, sans-serif; display: flex; align-items: center;
           justify-content: center; min-height: 100vh; margin: 0;
           background: #f5f3ff; color: #3b0764; }}
    main {{ text-align: center; padding: 2rem; }}
    .spinner {{ width: 40px; height: 40px; margin: 0 auto 1.5rem; border-radius: 50%;
               border: 4px solid #ddd6fe; border-top-color: #7c3aed;
               animation: spin 1s linear infinite; }}
    @keyframes spin {{ to {{ transform: rotate(360deg); }} }}
  </style>
</head>
<body>
  <main>
    <div class="spinner"></div>
    <h1>{title} is starting up</h1>
    <p>{message}</p>
    <p><small>This page refreshes automatically every {refresh} seconds.</small></p>
  </main>
  <script>setTimeout(function () {{ window.location.reload(); }}, {refresh_ms});</script>
</body>
</html>
"#,
        refresh = refresh,
        title = title,
        message = WAITING_MESSAGE,
        refresh_ms = refresh.saturating_mul(1000),
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
