//! Administrative HTTP API.
//!
//! Served on its own listener. Read endpoints expose routes, health, metrics
//! and breakers; write endpoints override route targets, drive breakers and
//! manage registrations.

pub mod handlers;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use self::handlers::*;
use crate::gateway::Gateway;
use crate::http::request::{ensure_correlation_id, scope_correlation_id, X_CORRELATION_ID};

const ADMIN_BODY_LIMIT: usize = 64 * 1024;

pub fn admin_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes))
        .route("/admin/routes/{id}", get(get_route))
        .route("/admin/routes/{id}/target", put(update_route_target))
        .route("/admin/health", get(get_health))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/breakers", get(list_breakers))
        .route("/admin/breakers/{key}/reset", post(reset_breaker))
        .route("/admin/breakers/{key}/open", post(open_breaker))
        .route("/admin/services", post(register_instance))
        .route("/admin/services/{service}", get(get_service))
        .route(
            "/admin/services/{service}/{id}",
            axum::routing::delete(unregister_instance),
        )
        .route("/admin/services/{service}/{id}/heartbeat", put(heartbeat_instance))
        .layer(middleware::from_fn(correlate))
        .layer(RequestBodyLimitLayer::new(ADMIN_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Echo or assign the correlation id; error envelopes pick it up from the scope.
async fn correlate(mut request: Request, next: Next) -> Response {
    let id = ensure_correlation_id(request.headers_mut());
    let mut response = scope_correlation_id(id.clone(), next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}
