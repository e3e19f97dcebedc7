//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay upstream responses to the client as a stream
//! - Build the locally generated responses (preflight, 502, refused upgrades)
//! - Define the CORS headers stamped on every response
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped before relaying
//! - The exchange guard rides along with the body so it lives until the last byte
//! - An upstream that breaks off mid-body is reported like a failed connect

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};

use crate::error::UpstreamFailure;
use crate::health::UpstreamHealth;
use crate::http::request::strip_hop_by_hop;
use crate::net::ProxiedExchange;

pub const CORS_ALLOW_ORIGIN: HeaderValue = HeaderValue::from_static("*");
pub const CORS_ALLOW_METHODS: HeaderValue =
    HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD");
pub const CORS_ALLOW_HEADERS: HeaderValue =
    HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept, Authorization");

/// Upstream body that keeps its exchange open until fully streamed or dropped.
pub struct ExchangeBody {
    inner: Pin<Box<Incoming>>,
    exchange: ProxiedExchange,
    health: Arc<dyn UpstreamHealth>,
    reported: bool,
}

impl HttpBody for ExchangeBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = self.inner.as_mut().poll_frame(cx);

        if let Poll::Ready(Some(Err(e))) = &polled {
            if !self.reported {
                self.reported = true;
                let failure = UpstreamFailure::classify(e);
                tracing::warn!(
                    exchange_id = %self.exchange.id(),
                    reason = %failure,
                    error = %e,
                    "Upstream response body broke off"
                );
                self.health.report_failure(failure);
            }
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Relay an upstream response, keeping status, headers and body.
///
/// Errors while streaming the body are reported to `health`.
pub fn from_upstream(
    response: hyper::Response<Incoming>,
    exchange: ProxiedExchange,
    health: Arc<dyn UpstreamHealth>,
) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let body = ExchangeBody {
        inner: Box::pin(body),
        exchange,
        health,
        reported: false,
    };
    Response::from_parts(parts, Body::new(body))
}

/// Answer to a CORS preflight; never forwarded.
pub fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::ACCESS_CONTROL_MAX_AGE, "86400")],
    )
        .into_response()
}

/// Forwarding was attempted and the upstream could not be reached.
pub fn bad_gateway(failure: UpstreamFailure) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Bad Gateway: upstream {}\n", failure),
    )
        .into_response()
}

/// Refuse an upgrade request without switching protocols.
pub fn refuse_upgrade(status: StatusCode) -> Response {
    (status, [(header::CONNECTION, "close")]).into_response()
}
