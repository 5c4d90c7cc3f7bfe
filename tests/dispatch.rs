//! End-to-end dispatch through the proxy listener.

mod common;

use std::time::Duration;

use common::*;
use dispatch_gateway::config::{RouteConfig, StaticInstanceConfig};
use dispatch_gateway::resilience::CircuitState;
use dispatch_gateway::GatewayConfig;
use serde_json::Value;

fn seed(service: &str, id: &str, url: &str) -> StaticInstanceConfig {
    StaticInstanceConfig {
        name: service.into(),
        id: id.into(),
        url: url.into(),
        weight: 100,
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn test_proxies_to_healthy_instance_with_gateway_headers() {
    let backend = start_programmable_backend(|head| async move { (200, head) }).await;

    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("users", "/api/users/*", "backend").with_method("GET")];
    config.services = vec![seed("backend", "b1", &backend.url)];
    let gw = start_gateway(config).await;

    let res = reqwest::Client::new()
        .get(format!("{}/api/users/42?expand=true", gw.url))
        .header("x-correlation-id", "trace-me")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-gateway-service"], "backend");
    assert_eq!(res.headers()["x-gateway-route"], "users");
    assert_eq!(res.headers()["x-correlation-id"], "trace-me");
    assert!(res.headers().contains_key("x-response-time"));

    let upstream_head = res.text().await.unwrap().to_ascii_lowercase();
    assert!(upstream_head.starts_with("get /api/users/42?expand=true http/1.1"));
    assert!(upstream_head.contains("x-correlation-id: trace-me"));
    assert!(upstream_head.contains("x-gateway-route: users"));
    assert!(upstream_head.contains("x-forwarded-for: 127.0.0.1"));
    assert_eq!(backend.hits(), 1);
}

#[tokio::test]
async fn test_generates_correlation_id_when_absent() {
    let backend = start_mock_backend("ok").await;
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("all", "/*", "backend")];
    config.services = vec![seed("backend", "b1", &backend.url)];
    let gw = start_gateway(config).await;

    let res = reqwest::get(format!("{}/anything", gw.url)).await.unwrap();
    let id = res.headers()["x-correlation-id"].to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn test_unmatched_path_returns_json_404() {
    let gw = start_gateway(GatewayConfig::default()).await;

    let res = reqwest::Client::new()
        .delete(format!("{}/missing", gw.url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let correlation = res.headers()["x-correlation-id"].to_str().unwrap().to_string();

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "route_not_found");
    assert_eq!(body["path"], "/missing");
    assert_eq!(body["method"], "DELETE");
    assert_eq!(body["correlationId"], correlation.as_str());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_no_instances_returns_503_and_counts_breaker_failure() {
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("analytics", "/api/analytics/*", "analytics")];
    let gw = start_gateway(config).await;

    let res = reqwest::get(format!("{}/api/analytics/report", gw.url)).await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Service unavailable");
    assert_eq!(body["service"], "analytics");
    assert!(body["message"].is_string());

    let snap = gw.gateway.breakers.snapshot("analytics:analytics").unwrap();
    assert_eq!(snap.failures, 1);
}

#[tokio::test]
async fn test_upstream_5xx_passes_through_and_is_not_a_breaker_failure() {
    let backend = start_programmable_backend(|_| async { (500, "boom".to_string()) }).await;
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("users", "/api/users/*", "backend")];
    config.services = vec![seed("backend", "b1", &backend.url)];
    let gw = start_gateway(config).await;

    let res = reqwest::get(format!("{}/api/users/1", gw.url)).await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(res.text().await.unwrap(), "boom");
    assert_eq!(gw.gateway.breakers.snapshot("backend:users").unwrap().failures, 0);
    assert_eq!(gw.gateway.stats.snapshot()["users"].errors, 1);
}

#[tokio::test]
async fn test_slow_upstream_times_out_with_504() {
    let backend = start_slow_backend(Duration::from_secs(2)).await;
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("slow", "/slow/*", "slow").with_timeout_ms(100)];
    config.services = vec![seed("slow", "s1", &backend.url)];
    let gw = start_gateway(config).await;

    let res = reqwest::get(format!("{}/slow/x", gw.url)).await.unwrap();
    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "upstream_timeout");
    assert_eq!(body["service"], "slow");
}

#[tokio::test]
async fn test_client_deadline_returns_499_without_breaker_failure() {
    let backend = start_slow_backend(Duration::from_secs(2)).await;
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("slow", "/slow/*", "slow")];
    config.services = vec![seed("slow", "s1", &backend.url)];
    let gw = start_gateway(config).await;

    let res = reqwest::Client::new()
        .get(format!("{}/slow/x", gw.url))
        .header("x-request-timeout-ms", "100")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 499);
    assert_eq!(gw.gateway.breakers.snapshot("slow:slow").unwrap().failures, 0);
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_fails_fast() {
    let dead = closed_port_url().await;
    let mut config = GatewayConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    config.routes = vec![RouteConfig::new("users", "/api/users/*", "backend")];
    config.services = vec![seed("backend", "b1", &dead)];
    let gw = start_gateway(config).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/users/1", gw.url);

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 502);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["error"], "Bad Gateway");
    assert_eq!(body["service"], "backend");

    // The refused instance is out of rotation now.
    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.status(), 503);

    let third = client.get(&url).send().await.unwrap();
    assert_eq!(third.status(), 503);
    let body: Value = third.json().await.unwrap();
    assert_eq!(body["error"], "Circuit Breaker Open");
    assert_eq!(body["circuitKey"], "backend:users");
    assert!(body["nextAttempt"].is_string());
    assert_eq!(gw.gateway.breakers.state("backend:users"), CircuitState::Open);
}

#[tokio::test]
async fn test_round_robin_spreads_requests() {
    let a = start_mock_backend("a").await;
    let b = start_mock_backend("b").await;
    let mut config = GatewayConfig::default();
    config.routes = vec![RouteConfig::new("users", "/api/users/*", "backend")];
    config.services = vec![seed("backend", "a", &a.url), seed("backend", "b", &b.url)];
    let gw = start_gateway(config).await;

    for _ in 0..10 {
        let res = reqwest::get(format!("{}/api/users/1", gw.url)).await.unwrap();
        assert_eq!(res.status(), 200);
    }
    assert_eq!(a.hits(), 5);
    assert_eq!(b.hits(), 5);
    assert_eq!(gw.gateway.stats.snapshot()["users"].requests, 10);
}

#[tokio::test]
async fn test_post_is_not_retried() {
    let dead = closed_port_url().await;
    let live = start_mock_backend("ok").await;
    let mut route = RouteConfig::new("orders", "/orders", "orders");
    route.retries = 3;
    let mut config = GatewayConfig::default();
    config.routes = vec![route];
    config.services = vec![seed("orders", "a-dead", &dead), seed("orders", "b-live", &live.url)];
    let gw = start_gateway(config).await;

    // Round robin starts at the first instance in id order.
    let res = reqwest::Client::new()
        .post(format!("{}/orders", gw.url))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(live.hits(), 0);
}
