//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, instance health, breaker transitions)
//! - Expose a Prometheus-compatible scrape endpoint
//! - Keep in-process per-route counters for the admin API
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, service, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_instance_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_circuit_transitions_total` (counter): transitions by key and target state
//!
//! # Design Decisions
//! - Metric macros are no-ops until an exporter is installed
//! - Route counters are atomics behind a sharded map

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_request(route: &str, service: &str, status: u16, elapsed: Duration) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_instance_health(service: &str, instance: &str, healthy: bool) {
    gauge!(
        "gateway_instance_health",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_transition(key: &str, state: &'static str) {
    counter!(
        "gateway_circuit_transitions_total",
        "key" => key.to_string(),
        "state" => state
    )
    .increment(1);
}

#[derive(Debug, Default)]
struct RouteCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Per-route request, error and latency counters.
#[derive(Debug, Default)]
pub struct RouteStats {
    routes: DashMap<String, RouteCounters>,
}

/// Snapshot of one route's counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatsView {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
}

impl RouteStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, route: &str, success: bool, elapsed: Duration) {
        let record = |c: &RouteCounters| {
            c.requests.fetch_add(1, Ordering::Relaxed);
            if !success {
                c.errors.fetch_add(1, Ordering::Relaxed);
            }
            c.total_latency_ms
                .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        };
        if let Some(counters) = self.routes.get(route) {
            record(counters.value());
            return;
        }
        record(&*self.routes.entry(route.to_string()).or_default());
    }

    pub fn snapshot(&self) -> BTreeMap<String, RouteStatsView> {
        self.routes
            .iter()
            .map(|entry| {
                let c = entry.value();
                let requests = c.requests.load(Ordering::Relaxed);
                let latency = c.total_latency_ms.load(Ordering::Relaxed);
                let view = RouteStatsView {
                    requests,
                    errors: c.errors.load(Ordering::Relaxed),
                    avg_latency_ms: if requests == 0 {
                        0.0
                    } else {
                        latency as f64 / requests as f64
                    },
                };
                (entry.key().clone(), view)
            })
            .collect()
    }

    /// Sum of requests and errors across routes.
    pub fn totals(&self) -> (u64, u64) {
        self.routes.iter().fold((0, 0), |(r, e), entry| {
            (
                r + entry.requests.load(Ordering::Relaxed),
                e + entry.errors.load(Ordering::Relaxed),
            )
        })
    }
}
