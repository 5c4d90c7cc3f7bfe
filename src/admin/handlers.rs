use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::load_balancer::ServiceMetrics;
use crate::observability::metrics::RouteStatsView;
use crate::registry::{HealthState, InstanceView, RegistryError, ServiceRegistration};
use crate::resilience::{BreakerSnapshot, BreakerStats, CircuitState};
use crate::routing::RouteView;

type AdminResult<T> = Result<Json<T>, GatewayError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub routes: usize,
    pub services: usize,
    pub instances: usize,
    pub registry_store: &'static str,
    pub breakers: BreakerStats,
}

pub async fn get_status(State(gw): State<Arc<Gateway>>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        started_at: gw.started_at,
        uptime_secs: gw.uptime_secs(),
        routes: gw.routes.len(),
        services: gw.registry.services().len(),
        instances: gw.registry.all_instances().len(),
        registry_store: gw.registry.store_name(),
        breakers: gw.breakers.stats(),
    })
}

pub async fn list_routes(State(gw): State<Arc<Gateway>>) -> Json<Vec<RouteView>> {
    Json(gw.routes.views())
}

pub async fn get_route(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<String>,
) -> AdminResult<RouteView> {
    gw.routes
        .get(&id)
        .map(|r| Json(gw.routes.view(&r)))
        .ok_or_else(|| GatewayError::NotFound(format!("route '{}'", id)))
}

#[derive(Debug, Deserialize)]
pub struct TargetUpdate {
    pub target: String,
}

pub async fn update_route_target(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<String>,
    Json(update): Json<TargetUpdate>,
) -> AdminResult<RouteView> {
    Ok(Json(gw.routes.update_target(&id, &update.target)?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHealth {
    pub route: String,
    pub service: String,
    pub healthy: usize,
    pub unhealthy: usize,
    pub circuit: CircuitState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub instances: Vec<InstanceView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub routes: Vec<RouteHealth>,
    pub services: BTreeMap<String, ServiceHealth>,
}

pub async fn get_health(State(gw): State<Arc<Gateway>>) -> Json<HealthReport> {
    let mut services: BTreeMap<String, ServiceHealth> = BTreeMap::new();
    for instance in gw.registry.all_instances() {
        let entry = services
            .entry(instance.service.clone())
            .or_insert_with(|| ServiceHealth {
                healthy: 0,
                unhealthy: 0,
                unknown: 0,
                instances: Vec::new(),
            });
        match instance.health() {
            HealthState::Healthy => entry.healthy += 1,
            HealthState::Unhealthy => entry.unhealthy += 1,
            HealthState::Unknown => entry.unknown += 1,
        }
        entry.instances.push(instance.view());
    }
    for service in services.values_mut() {
        service.instances.sort_by(|a, b| a.id.cmp(&b.id));
    }

    let mut degraded = false;
    let mut routes = Vec::new();
    for route in gw.routes.routes().iter() {
        let (healthy, unhealthy) = services
            .get(route.service())
            .map(|s| (s.healthy, s.unhealthy + s.unknown))
            .unwrap_or((0, 0));
        let circuit = gw.breakers.state(&route.circuit_key());
        if (healthy == 0 && gw.routes.target(route).is_none()) || circuit != CircuitState::Closed {
            degraded = true;
        }
        routes.push(RouteHealth {
            route: route.id().to_string(),
            service: route.service().to_string(),
            healthy,
            unhealthy,
            circuit,
        });
    }

    Json(HealthReport {
        status: if degraded { "degraded" } else { "healthy" },
        routes,
        services,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTotals {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub totals: RequestTotals,
    pub routes: BTreeMap<String, RouteStatsView>,
    pub load_balancer: BTreeMap<String, ServiceMetrics>,
    pub breakers: BreakerStats,
}

pub async fn get_metrics(State(gw): State<Arc<Gateway>>) -> Json<MetricsReport> {
    let (requests, errors) = gw.stats.totals();
    Json(MetricsReport {
        totals: RequestTotals { requests, errors },
        routes: gw.stats.snapshot(),
        load_balancer: gw.balancer.metrics(),
        breakers: gw.breakers.stats(),
    })
}

pub async fn list_breakers(State(gw): State<Arc<Gateway>>) -> Json<Vec<BreakerSnapshot>> {
    Json(gw.breakers.all())
}

pub async fn reset_breaker(
    State(gw): State<Arc<Gateway>>,
    Path(key): Path<String>,
) -> AdminResult<BreakerSnapshot> {
    gw.breakers.reset(&key);
    breaker_view(&gw, &key)
}

pub async fn open_breaker(
    State(gw): State<Arc<Gateway>>,
    Path(key): Path<String>,
) -> AdminResult<BreakerSnapshot> {
    gw.breakers.force_open(&key);
    breaker_view(&gw, &key)
}

fn breaker_view(gw: &Gateway, key: &str) -> AdminResult<BreakerSnapshot> {
    gw.breakers
        .snapshot(key)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("breaker '{}'", key)))
}

pub async fn get_service(
    State(gw): State<Arc<Gateway>>,
    Path(service): Path<String>,
) -> AdminResult<Vec<InstanceView>> {
    let mut instances: Vec<InstanceView> = gw
        .registry
        .discover(&service)
        .iter()
        .map(|i| i.view())
        .collect();
    if instances.is_empty() {
        return Err(GatewayError::NotFound(format!("service '{}'", service)));
    }
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(instances))
}

pub async fn register_instance(
    State(gw): State<Arc<Gateway>>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<(StatusCode, Json<InstanceView>), GatewayError> {
    let instance = gw.registry.register(registration).await.map_err(|e| match e {
        RegistryError::InvalidRegistration(msg) => GatewayError::InvalidRequest(msg),
        other => GatewayError::Registry(other),
    })?;
    Ok((StatusCode::CREATED, Json(instance.view())))
}

#[derive(Serialize)]
pub struct HeartbeatAck {
    pub known: bool,
}

pub async fn heartbeat_instance(
    State(gw): State<Arc<Gateway>>,
    Path((service, id)): Path<(String, String)>,
) -> AdminResult<HeartbeatAck> {
    if gw.registry.heartbeat(&service, &id).await? {
        Ok(Json(HeartbeatAck { known: true }))
    } else {
        Err(GatewayError::NotFound(format!(
            "instance '{}/{}', re-register it",
            service, id
        )))
    }
}

#[derive(Serialize)]
pub struct RemovalAck {
    pub removed: bool,
}

pub async fn unregister_instance(
    State(gw): State<Arc<Gateway>>,
    Path((service, id)): Path<(String, String)>,
) -> AdminResult<RemovalAck> {
    let removed = gw.registry.unregister(&service, &id).await?;
    Ok(Json(RemovalAck { removed }))
}
