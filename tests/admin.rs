//! Admin API driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use dispatch_gateway::config::{RouteConfig, StaticInstanceConfig};
use dispatch_gateway::{Gateway, GatewayConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn gateway() -> Arc<Gateway> {
    let mut config = GatewayConfig::default();
    config.routes = vec![
        RouteConfig::new("users", "/api/users/*", "backend").with_method("GET"),
        RouteConfig::new("analytics", "/api/analytics/*", "analytics"),
    ];
    config.services = vec![StaticInstanceConfig {
        name: "backend".into(),
        id: "b1".into(),
        url: "http://127.0.0.1:3001".into(),
        weight: 100,
        metadata: Default::default(),
    }];
    Arc::new(Gateway::build(config).await.unwrap())
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_status() {
    let gw = gateway().await;
    let (status, body) = call(&gw.admin_router(), Method::GET, "/admin/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["routes"], 2);
    assert_eq!(body["instances"], 1);
    assert_eq!(body["registryStore"], "memory");
}

#[tokio::test]
async fn test_routes_and_target_override() {
    let gw = gateway().await;
    let admin = gw.admin_router();

    let (status, body) = call(&admin, Method::GET, "/admin/routes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["id"], "users");
    assert_eq!(body[0]["circuitKey"], "backend:users");

    let (status, body) = call(&admin, Method::GET, "/admin/routes/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = call(
        &admin,
        Method::PUT,
        "/admin/routes/analytics/target",
        Some(json!({ "target": "http://10.0.0.9:8080" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["target"], "http://10.0.0.9:8080/");
    assert!(gw.registry.discover("analytics").is_empty());

    let (status, body) = call(
        &admin,
        Method::PUT,
        "/admin/routes/analytics/target",
        Some(json!({ "target": "not a url" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_health_aggregates_routes_and_services() {
    let gw = gateway().await;
    let (status, body) = call(&gw.admin_router(), Method::GET, "/admin/health", None).await;
    assert_eq!(status, StatusCode::OK);
    // analytics has neither instances nor a fallback target
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["routes"][0]["healthy"], 1);
    assert_eq!(body["routes"][1]["healthy"], 0);
    assert_eq!(body["services"]["backend"]["healthy"], 1);
    assert_eq!(body["services"]["backend"]["instances"][0]["id"], "b1");
}

#[tokio::test]
async fn test_metrics_and_breakers() {
    let gw = gateway().await;
    let admin = gw.admin_router();

    let (status, body) = call(&admin, Method::POST, "/admin/breakers/backend:users/open", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "open");
    assert!(body["nextAttempt"].is_string());

    let (_, body) = call(&admin, Method::GET, "/admin/metrics", None).await;
    assert_eq!(body["breakers"]["open"], 1);
    assert_eq!(body["loadBalancer"]["backend"]["healthy"], 1);
    assert_eq!(body["totals"]["requests"], 0);

    let (status, body) = call(&admin, Method::POST, "/admin/breakers/backend:users/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "closed");
    assert_eq!(body["failures"], 0);

    let (_, body) = call(&admin, Method::GET, "/admin/breakers", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_registration_lifecycle() {
    let gw = gateway().await;
    let admin = gw.admin_router();

    let (status, body) = call(
        &admin,
        Method::POST,
        "/admin/services",
        Some(json!({
            "service": "analytics",
            "id": "a1",
            "url": "http://127.0.0.1:4000",
            "metadata": { "version": "2.1" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "a1");
    assert_eq!(body["weight"], 100);

    let (status, body) = call(&admin, Method::GET, "/admin/services/analytics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["metadata"]["version"], "2.1");

    let (status, body) = call(&admin, Method::PUT, "/admin/services/analytics/a1/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["known"], true);

    let (status, _) = call(&admin, Method::PUT, "/admin/services/analytics/zz/heartbeat", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&admin, Method::DELETE, "/admin/services/analytics/a1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (_, body) = call(&admin, Method::DELETE, "/admin/services/analytics/a1", None).await;
    assert_eq!(body["removed"], false);

    let (status, _) = call(&admin, Method::GET, "/admin/services/analytics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_registration_is_rejected() {
    let gw = gateway().await;
    let (status, body) = call(
        &gw.admin_router(),
        Method::POST,
        "/admin/services",
        Some(json!({ "service": "analytics", "id": "a1", "url": "ftp://nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_admin_errors_echo_correlation_id() {
    let gw = gateway().await;
    let request = Request::builder()
        .uri("/admin/routes/missing")
        .header("x-correlation-id", "admin-corr-7")
        .body(Body::empty())
        .unwrap();

    let response = gw.admin_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-correlation-id"], "admin-corr-7");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["correlationId"], "admin-corr-7");
}

#[tokio::test]
async fn test_admin_errors_generate_matching_correlation_id() {
    let gw = gateway().await;
    let request = Request::builder()
        .uri("/admin/routes/missing")
        .body(Body::empty())
        .unwrap();

    let response = gw.admin_router().oneshot(request).await.unwrap();
    let header = response.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["correlationId"], header.as_str());
}
