//! Request dispatch.
//!
//! # Responsibilities
//! - Match the request to a route
//! - Gate it through the rate limiter and the route's circuit breaker
//! - Pick an instance, forward with the route timeout, retry idempotent calls
//! - Feed the outcome back into the breaker, the balancer and the stats
//!
//! # Data Flow
//! ```text
//! request → route → rate limit → breaker gate → select instance
//!         → forward (timeout ∧ client deadline) → record outcome → response
//! ```
//!
//! # Design Decisions
//! - Any upstream HTTP response counts as a breaker success; only transport
//!   errors, timeouts and missing capacity count as failures
//! - A request the client gave up on records no breaker verdict
//! - The breaker records one outcome per dispatch, however many attempts ran
//! - The connection slot is held until the upstream answers with headers

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, Request};
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use crate::config::RetryConfig;
use crate::error::GatewayError;
use crate::health::passive;
use crate::http::request::{
    add_forwarded_headers, client_key, ensure_correlation_id, forward_uri, peer_addr,
    ClientDeadline,
};
use crate::http::response::{augment_response, insert_gateway_headers, strip_hop_by_hop};
use crate::load_balancer::{ConnectionGuard, LoadBalancer};
use crate::observability::metrics::{self, RouteStats};
use crate::resilience::{CircuitBreakers, RetryPolicy};
use crate::routing::{Route, RouteTable};
use crate::security::{RateLimiter, TokenBucketLimiter};

/// The gateway's request dispatcher.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    balancer: Arc<LoadBalancer>,
    breakers: Arc<CircuitBreakers>,
    rate_limiter: Arc<dyn RateLimiter>,
    stats: Arc<RouteStats>,
    client: Client<HttpConnector, Body>,
    retry: RetryConfig,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<RouteTable>,
        balancer: Arc<LoadBalancer>,
        breakers: Arc<CircuitBreakers>,
        stats: Arc<RouteStats>,
        retry: RetryConfig,
        max_body_bytes: usize,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            routes,
            balancer,
            breakers,
            rate_limiter: Arc::new(TokenBucketLimiter::new()),
            stats,
            client,
            retry,
            max_body_bytes,
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Periodically drop idle rate limit state until shutdown.
    pub async fn run_rate_limit_cleanup(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.rate_limiter.cleanup();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit cleanup loop stopping");
                    break;
                }
            }
        }
    }

    /// Dispatch a request and render any failure as a JSON envelope.
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        let correlation_id = ensure_correlation_id(request.headers_mut());
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => e.into_envelope_response(&correlation_id),
        }
    }

    /// Dispatch a request end to end.
    pub async fn dispatch(&self, mut request: Request<Body>) -> Result<Response, GatewayError> {
        let started = Instant::now();
        let correlation_id = ensure_correlation_id(request.headers_mut());
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let Some(route) = self.routes.match_route(&path, &method) else {
            tracing::debug!(path = %path, method = %method, correlation_id = %correlation_id, "No route matched");
            metrics::record_request("none", "none", 404, started.elapsed());
            return Err(GatewayError::RouteNotFound {
                path,
                method: method.to_string(),
            });
        };

        let result = self
            .dispatch_route(&route, request, &correlation_id, started)
            .await;

        let elapsed = started.elapsed();
        let status = match &result {
            Ok(response) => response.status(),
            Err(e) => e.status(),
        };
        self.stats
            .record(route.id(), !status.is_server_error() && result.is_ok(), elapsed);
        metrics::record_request(route.id(), route.service(), status.as_u16(), elapsed);

        match &result {
            Ok(_) => tracing::debug!(
                route = %route.id(),
                service = %route.service(),
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                correlation_id = %correlation_id,
                "Request dispatched"
            ),
            Err(e) => tracing::warn!(
                route = %route.id(),
                service = %route.service(),
                code = e.code(),
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                correlation_id = %correlation_id,
                "Dispatch failed"
            ),
        }
        result
    }

    async fn dispatch_route(
        &self,
        route: &Route,
        request: Request<Body>,
        correlation_id: &str,
        started: Instant,
    ) -> Result<Response, GatewayError> {
        let client = client_key(&request);
        if !self.rate_limiter.check(route, &client) {
            return Err(GatewayError::RateLimited {
                route: route.id().to_string(),
            });
        }

        let key = route.circuit_key();
        let permit = if route.config.circuit_breaker {
            self.breakers
                .try_acquire(&key)
                .map_err(|next_attempt| GatewayError::CircuitOpen {
                    key: key.clone(),
                    next_attempt,
                })?;
            BreakerPermit::armed(&self.breakers, key)
        } else {
            BreakerPermit::disarmed(key)
        };

        let deadline = request.extensions().get::<ClientDeadline>().copied();
        let peer = peer_addr(&request);
        let policy = RetryPolicy::for_request(route.config.retries, request.method(), &self.retry);

        let (mut parts, body) = request.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        add_forwarded_headers(&mut parts.headers, peer);
        insert_gateway_headers(&mut parts.headers, route.service(), route.id(), correlation_id);

        let mut payload = if policy.attempts() > 1 {
            let bytes = axum::body::to_bytes(body, self.max_body_bytes)
                .await
                .map_err(|_| {
                    GatewayError::InvalidRequest(format!(
                        "request body exceeds {} bytes",
                        self.max_body_bytes
                    ))
                })?;
            Payload::Buffered(bytes)
        } else {
            Payload::Streaming(Some(body))
        };

        let service = route.service().to_string();
        let strategy = route.strategy_or(self.balancer.default_strategy());
        let mut attempt = 0;

        loop {
            attempt += 1;

            if deadline.is_some_and(|d| d.is_expired()) {
                permit.abandon();
                return Err(GatewayError::RequestCancelled { service });
            }

            let upstream = match self.balancer.select_guarded(&service, strategy) {
                Some(guard) => Upstream::Instance(guard),
                None => match self.routes.target(route) {
                    Some(url) => Upstream::Static(url),
                    None => {
                        permit.failure();
                        return Err(GatewayError::ServiceUnavailable { service });
                    }
                },
            };

            let upstream_request = build_request(&parts, upstream.base_url(), payload.take())?;
            let forward = time::timeout(route.timeout(), self.client.request(upstream_request));
            let outcome = match deadline {
                Some(ClientDeadline(at)) => tokio::select! {
                    res = forward => Some(res),
                    _ = time::sleep_until(at) => None,
                },
                None => Some(forward.await),
            };

            let retry_left = attempt < policy.attempts();
            match outcome {
                None => {
                    tracing::info!(
                        route = %route.id(),
                        service = %service,
                        instance = %upstream.label(),
                        correlation_id = %correlation_id,
                        "Client deadline passed, forward aborted"
                    );
                    permit.abandon();
                    return Err(GatewayError::RequestCancelled { service });
                }
                Some(Ok(Ok(response))) => {
                    permit.success();
                    let mut response = relay(response);
                    augment_response(
                        &mut response,
                        &service,
                        route.id(),
                        correlation_id,
                        started.elapsed(),
                    );
                    return Ok(response);
                }
                Some(Ok(Err(e))) => {
                    let reason = if e.is_connect() {
                        "connection failed"
                    } else {
                        "upstream connection error"
                    };
                    tracing::warn!(
                        route = %route.id(),
                        service = %service,
                        instance = %upstream.label(),
                        attempt,
                        error = %e,
                        "Upstream transport error"
                    );
                    if e.is_connect() {
                        if let Upstream::Instance(guard) = &upstream {
                            passive::report_transport_failure(guard, reason);
                        }
                    }
                    if !retry_left {
                        permit.failure();
                        return Err(GatewayError::UpstreamError {
                            service,
                            reason: reason.to_string(),
                        });
                    }
                }
                Some(Err(_)) => {
                    tracing::warn!(
                        route = %route.id(),
                        service = %service,
                        instance = %upstream.label(),
                        attempt,
                        timeout_ms = route.timeout().as_millis() as u64,
                        "Upstream timed out"
                    );
                    if !retry_left {
                        permit.failure();
                        return Err(GatewayError::UpstreamTimeout {
                            service,
                            timeout_ms: route.timeout().as_millis() as u64,
                        });
                    }
                }
            }

            drop(upstream);
            let delay = policy.delay(attempt);
            if !wait_within(delay, deadline).await {
                permit.abandon();
                return Err(GatewayError::RequestCancelled { service });
            }
            tracing::debug!(route = %route.id(), attempt = attempt + 1, "Retrying request");
        }
    }
}

/// Sleep for `delay` unless the client deadline comes first.
async fn wait_within(delay: Duration, deadline: Option<ClientDeadline>) -> bool {
    match deadline {
        Some(ClientDeadline(at)) if at <= Instant::now() + delay => {
            time::sleep_until(at).await;
            false
        }
        _ => {
            time::sleep(delay).await;
            true
        }
    }
}

fn build_request(parts: &Parts, base: &Url, body: Body) -> Result<Request<Body>, GatewayError> {
    let uri = forward_uri(base, &parts.uri)
        .map_err(|e| GatewayError::InvalidRequest(format!("cannot build upstream uri: {}", e)))?;
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = parts.headers.clone();
    Ok(request)
}

/// Hand the upstream body to axum without buffering it.
fn relay(response: hyper::Response<Incoming>) -> Response {
    let (head, body) = response.into_parts();
    Response::from_parts(head, Body::new(body))
}

enum Payload {
    Buffered(Bytes),
    Streaming(Option<Body>),
}

impl Payload {
    fn take(&mut self) -> Body {
        match self {
            Self::Buffered(bytes) => Body::from(bytes.clone()),
            Self::Streaming(body) => body.take().unwrap_or_else(Body::empty),
        }
    }
}

enum Upstream {
    Instance(ConnectionGuard),
    Static(Url),
}

impl Upstream {
    fn base_url(&self) -> &Url {
        match self {
            Self::Instance(guard) => &guard.base_url,
            Self::Static(url) => url,
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::Instance(guard) => &guard.id,
            Self::Static(_) => "static-target",
        }
    }
}

/// Admission through a route's breaker. Exactly one verdict is recorded;
/// dropping it without one releases the half-open trial slot.
struct BreakerPermit<'a> {
    breakers: Option<&'a CircuitBreakers>,
    key: String,
}

impl<'a> BreakerPermit<'a> {
    fn armed(breakers: &'a CircuitBreakers, key: String) -> Self {
        Self {
            breakers: Some(breakers),
            key,
        }
    }

    fn disarmed(key: String) -> Self {
        Self {
            breakers: None,
            key,
        }
    }

    fn success(mut self) {
        if let Some(breakers) = self.breakers.take() {
            breakers.record_success(&self.key);
        }
    }

    fn failure(mut self) {
        if let Some(breakers) = self.breakers.take() {
            breakers.record_failure(&self.key);
        }
    }

    fn abandon(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let Some(breakers) = self.breakers.take() {
            breakers.record_abandoned(&self.key);
        }
    }
}
