//! Request handling and transformation.
//!
//! # Responsibilities
//! - Correlation id: propagate when present, generate (UUID v4) when absent
//! - Client deadline extraction from `x-request-timeout-ms`
//! - Identify the calling client for rate limiting
//! - Rewrite the request URI onto an upstream base URL
//!
//! # Design Decisions
//! - Correlation id added as early as possible for tracing
//! - Client-supplied `X-Forwarded-*` is not trusted for identity; the
//!   peer address is

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{
    header::{HeaderName, HeaderValue, HOST},
    uri::InvalidUri,
    HeaderMap, Request, Uri,
};
use tokio::time::Instant;
use url::Url;

/// Correlation id header, echoed on every response.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Client-side budget for the whole request, in milliseconds.
pub const X_REQUEST_TIMEOUT_MS: HeaderName = HeaderName::from_static("x-request-timeout-ms");

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Return the request's correlation id, inserting a fresh one if missing or
/// unreadable.
pub fn ensure_correlation_id(headers: &mut HeaderMap) -> String {
    if let Some(existing) = headers
        .get(&X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return existing.to_string();
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(X_CORRELATION_ID, value);
    }
    id
}

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// Run `fut` with `id` as the correlation id of the current request.
pub async fn scope_correlation_id<F: std::future::Future>(id: String, fut: F) -> F::Output {
    CORRELATION_ID.scope(id, fut).await
}

/// Correlation id of the request being handled, if inside a scope.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(Clone::clone).ok()
}

/// Point in time after which the client no longer waits for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientDeadline(pub Instant);

impl ClientDeadline {
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Parse `x-request-timeout-ms`. Missing, unparsable or zero values
    /// yield no deadline.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let ms: u64 = headers
            .get(&X_REQUEST_TIMEOUT_MS)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        (ms > 0).then(|| Self::after(Duration::from_millis(ms)))
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Peer address recorded by the server, if any.
pub fn peer_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Rate limiting key for the calling client.
pub fn client_key<B>(request: &Request<B>) -> String {
    peer_addr(request)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rewrite `original` onto `base`, keeping any path prefix of the base.
pub fn forward_uri(base: &Url, original: &Uri) -> Result<Uri, InvalidUri> {
    let mut target = base.clone();
    let prefix = base.path().trim_end_matches('/');
    target.set_path(&format!("{}{}", prefix, original.path()));
    target.set_query(original.query());
    target.as_str().parse()
}

/// Add `X-Forwarded-*` and drop the inbound `Host` so the client derives it
/// from the upstream URI.
pub fn add_forwarded_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    if let Some(host) = headers.remove(HOST) {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if let Some(addr) = peer {
        let ip = addr.ip().to_string();
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, ip),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}
