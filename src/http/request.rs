//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Detect WebSocket upgrade requests
//! - Prepare the outbound copy of a request for the upstream
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - `Host` is rewritten to the upstream authority; everything else end-to-end is kept
//! - Hop-by-hop headers are connection-scoped and never forwarded

use std::net::SocketAddr;
use std::str::FromStr;

use axum::body::Body;
use axum::http::{
    header::{self, HeaderName},
    request::Parts,
    uri::{Authority, PathAndQuery, Scheme},
    HeaderMap, HeaderValue, Request, Uri, Version,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe a single connection rather than the message.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Generates a UUID v4 for requests that arrive without an `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMaker;

impl MakeRequestId for RequestIdMaker {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request ID of an inbound request, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// True when the request asks to switch to the WebSocket protocol.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_str(token.trim()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Add `X-Forwarded-*` headers describing the inbound hop.
pub fn add_forwarded_headers(
    headers: &mut HeaderMap,
    client_addr: Option<SocketAddr>,
    original_host: Option<HeaderValue>,
) {
    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

/// Retarget an inbound request at `authority`, keeping method, path, query,
/// end-to-end headers and the streaming body.
pub fn build_upstream_request(
    parts: Parts,
    body: Body,
    authority: &str,
    client_addr: Option<SocketAddr>,
) -> Result<Request<Body>, axum::http::Error> {
    let mut uri_parts = parts.uri.into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(Authority::from_str(authority)?);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    let uri = Uri::from_parts(uri_parts)?;

    let mut headers = parts.headers;
    let original_host = headers.get(header::HOST).cloned();
    strip_hop_by_hop(&mut headers);
    add_forwarded_headers(&mut headers, client_addr, original_host);
    headers.insert(header::HOST, HeaderValue::from_str(authority)?);

    let mut builder = Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(Version::HTTP_11);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }

    builder.body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn websocket_detection_is_token_based() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("foo, WebSocket"));
        assert!(is_websocket_upgrade(&headers));
    }

    #[test]
    fn hop_by_hop_and_connection_named_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn upstream_request_rewrites_host_and_keeps_the_rest() {
        let inbound = Request::builder()
            .method(Method::POST)
            .uri("/api/x?mood=happy")
            .header(header::HOST, "bridge.example:5000")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONNECTION, "keep-alive")
            .body(())
            .unwrap();

        let client: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        let request =
            build_upstream_request(parts(inbound), Body::empty(), "127.0.0.1:3000", Some(client))
                .unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://127.0.0.1:3000/api/x?mood=happy");
        assert_eq!(request.headers()[header::HOST], "127.0.0.1:3000");
        assert_eq!(request.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(request.headers()[&X_FORWARDED_FOR], "10.0.0.7");
        assert_eq!(request.headers()[&X_FORWARDED_HOST], "bridge.example:5000");
        assert_eq!(request.headers()[&X_FORWARDED_PROTO], "http");
        assert!(!request.headers().contains_key(header::CONNECTION));
        assert_eq!(request.version(), Version::HTTP_11);
    }

    #[test]
    fn forwarded_for_appends_to_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));

        add_forwarded_headers(&mut headers, Some("10.0.0.1:80".parse().unwrap()), None);
        assert_eq!(headers[&X_FORWARDED_FOR], "203.0.113.9, 10.0.0.1");
    }

    #[test]
    fn request_id_maker_produces_uuid() {
        let request = Request::new(());
        let id = RequestIdMaker.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }
}
