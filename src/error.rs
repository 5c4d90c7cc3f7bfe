//! Gateway error taxonomy.
//!
//! # Responsibilities
//! - Enumerate every failure the dispatch core can surface to a caller
//! - Map each failure to an HTTP status and a machine-readable code
//! - Render the JSON envelope returned to clients
//!
//! # Design Decisions
//! - Transport errors are reduced to a short reason before they get here;
//!   the envelope never carries a raw error chain
//! - Every envelope carries the correlation id of the request it answers

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::http::request::{current_correlation_id, X_CORRELATION_ID};
use crate::registry::RegistryError;

/// Errors produced by the dispatch core and the admin surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches {method} {path}")]
    RouteNotFound { path: String, method: String },

    #[error("rate limit exceeded for route '{route}'")]
    RateLimited { route: String },

    #[error("no healthy instance available for service '{service}'")]
    ServiceUnavailable { service: String },

    #[error("circuit '{key}' is open")]
    CircuitOpen {
        key: String,
        next_attempt: DateTime<Utc>,
    },

    #[error("service '{service}' did not respond within {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    #[error("service '{service}' failed: {reason}")]
    UpstreamError { service: String, reason: String },

    #[error("request to service '{service}' was cancelled by the client")]
    RequestCancelled { service: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl GatewayError {
    /// HTTP status returned for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable { .. } | Self::CircuitOpen { .. } | Self::Registry(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            // nginx convention for "client closed request"
            Self::RequestCancelled { .. } => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamError { .. } => "upstream_error",
            Self::RequestCancelled { .. } => "request_cancelled",
            Self::Configuration(_) => "configuration_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Registry(_) => "registry_unavailable",
        }
    }

    /// Human-readable title placed in the `error` field.
    fn title(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "Route not found",
            Self::RateLimited { .. } => "Too Many Requests",
            Self::ServiceUnavailable { .. } => "Service unavailable",
            Self::CircuitOpen { .. } => "Circuit Breaker Open",
            Self::UpstreamTimeout { .. } => "Gateway Timeout",
            Self::UpstreamError { .. } => "Bad Gateway",
            Self::RequestCancelled { .. } => "Client Closed Request",
            Self::Configuration(_) => "Configuration error",
            Self::NotFound(_) => "Not found",
            Self::InvalidRequest(_) => "Bad Request",
            Self::Registry(_) => "Registry unavailable",
        }
    }

    /// Service name the error refers to, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ServiceUnavailable { service }
            | Self::UpstreamTimeout { service, .. }
            | Self::UpstreamError { service, .. }
            | Self::RequestCancelled { service } => Some(service.as_str()),
            _ => None,
        }
    }

    /// Build the JSON envelope for this error.
    pub fn envelope(&self, correlation_id: &str) -> Value {
        let mut body = Map::new();
        body.insert("error".into(), json!(self.title()));
        body.insert("code".into(), json!(self.code()));
        body.insert("message".into(), json!(self.to_string()));
        body.insert("correlationId".into(), json!(correlation_id));
        body.insert("timestamp".into(), json!(now_rfc3339()));

        match self {
            Self::RouteNotFound { path, method } => {
                body.insert("path".into(), json!(path));
                body.insert("method".into(), json!(method));
            }
            Self::RateLimited { route } => {
                body.insert("route".into(), json!(route));
            }
            Self::CircuitOpen { key, next_attempt } => {
                body.insert("circuitKey".into(), json!(key));
                body.insert(
                    "nextAttempt".into(),
                    json!(next_attempt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
            }
            _ => {}
        }
        if let Some(service) = self.service() {
            body.insert("service".into(), json!(service));
        }

        Value::Object(body)
    }

    /// Render this error as a response tagged with the given correlation id.
    pub fn into_envelope_response(self, correlation_id: &str) -> Response {
        let mut response = (self.status(), Json(self.envelope(correlation_id))).into_response();
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            response.headers_mut().insert(X_CORRELATION_ID, value);
        }
        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let correlation_id =
            current_correlation_id().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.into_envelope_response(&correlation_id)
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_not_found_envelope_carries_path_and_method() {
        let err = GatewayError::RouteNotFound {
            path: "/nope".into(),
            method: "GET".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let body = err.envelope("abc");
        assert_eq!(body["code"], "route_not_found");
        assert_eq!(body["path"], "/nope");
        assert_eq!(body["method"], "GET");
        assert_eq!(body["correlationId"], "abc");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn service_unavailable_envelope() {
        let err = GatewayError::ServiceUnavailable {
            service: "analytics".into(),
        };
        let body = err.envelope("id-1");
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Service unavailable");
        assert_eq!(body["service"], "analytics");
        assert!(body["message"].as_str().unwrap().contains("analytics"));
    }

    #[test]
    fn circuit_open_envelope_has_key_and_next_attempt() {
        let err = GatewayError::CircuitOpen {
            key: "backend:users".into(),
            next_attempt: Utc::now(),
        };
        let body = err.envelope("id-2");
        assert_eq!(body["error"], "Circuit Breaker Open");
        assert_eq!(body["circuitKey"], "backend:users");
        assert!(body["nextAttempt"].is_string());
    }

    #[test]
    fn upstream_error_hides_transport_details_behind_reason() {
        let err = GatewayError::UpstreamError {
            service: "backend".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        let body = err.envelope("id-3");
        assert_eq!(body["error"], "Bad Gateway");
        assert_eq!(body["service"], "backend");
    }

    #[test]
    fn cancelled_maps_to_499() {
        let err = GatewayError::RequestCancelled {
            service: "backend".into(),
        };
        assert_eq!(err.status().as_u16(), 499);
    }

    #[test]
    fn envelope_response_echoes_correlation_id() {
        let response = GatewayError::NotFound("route x".into()).into_envelope_response("corr-9");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(X_CORRELATION_ID).unwrap(), "corr-9");
    }
}
