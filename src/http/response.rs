//! Response handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Tag upstream responses with gateway metadata and the correlation id
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Upstream status codes pass through untouched

use std::time::Duration;

use axum::http::{
    header::{self, HeaderName, HeaderValue},
    HeaderMap,
};
use axum::response::Response;

use crate::http::request::X_CORRELATION_ID;

pub const X_GATEWAY_SERVICE: HeaderName = HeaderName::from_static("x-gateway-service");
pub const X_GATEWAY_ROUTE: HeaderName = HeaderName::from_static("x-gateway-route");
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Gateway metadata attached to forwarded requests and their responses.
pub fn insert_gateway_headers(headers: &mut HeaderMap, service: &str, route: &str, correlation_id: &str) {
    if let Ok(v) = HeaderValue::from_str(service) {
        headers.insert(X_GATEWAY_SERVICE, v);
    }
    if let Ok(v) = HeaderValue::from_str(route) {
        headers.insert(X_GATEWAY_ROUTE, v);
    }
    if let Ok(v) = HeaderValue::from_str(correlation_id) {
        headers.insert(X_CORRELATION_ID, v);
    }
}

/// Tag an upstream response before it goes back to the client.
pub fn augment_response(
    response: &mut Response,
    service: &str,
    route: &str,
    correlation_id: &str,
    elapsed: Duration,
) {
    let headers = response.headers_mut();
    strip_hop_by_hop(headers);
    insert_gateway_headers(headers, service, route, correlation_id);
    if let Ok(v) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        headers.insert(X_RESPONSE_TIME, v);
    }
}
