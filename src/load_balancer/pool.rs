//! Instance pool selection.
//!
//! # Responsibilities
//! - Filter a service's registry snapshot down to healthy instances
//! - Apply the requested strategy
//! - Track in-flight connections and provide guards that release them
//! - Summarize per-service pool state

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;

use crate::config::LoadBalancerConfig;
use crate::load_balancer::{
    least_conn::LeastConnections, response_time::ResponseTime, round_robin::RoundRobin,
    weighted::Weighted, Selector, Strategy,
};
use crate::registry::{HealthState, ServiceInstance, ServiceRegistry};

/// Selects healthy instances of a service.
#[derive(Debug)]
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    default_strategy: Strategy,
    round_robin: RoundRobin,
    weighted: Weighted,
    least_conn: LeastConnections,
    response_time: ResponseTime,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, config: &LoadBalancerConfig) -> Self {
        Self {
            registry,
            default_strategy: config.strategy,
            round_robin: RoundRobin::new(),
            weighted: Weighted::new(config.seed),
            least_conn: LeastConnections::new(),
            response_time: ResponseTime::new(),
        }
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    fn selector(&self, strategy: Strategy) -> &dyn Selector {
        match strategy {
            Strategy::RoundRobin => &self.round_robin,
            Strategy::Weighted => &self.weighted,
            Strategy::LeastConnections => &self.least_conn,
            Strategy::ResponseTime => &self.response_time,
        }
    }

    /// Pick a healthy instance and increment its connection counter.
    ///
    /// `None` when the service has no healthy instance; callers treat that as
    /// service-unavailable.
    pub fn select_instance(&self, service: &str, strategy: Strategy) -> Option<Arc<ServiceInstance>> {
        let healthy: Vec<_> = self
            .registry
            .discover(service)
            .into_iter()
            .filter(|i| i.is_healthy())
            .collect();

        let Some(instance) = self.selector(strategy).select(service, &healthy) else {
            tracing::debug!(service = %service, "No healthy instances found");
            return None;
        };
        instance.acquire();
        Some(instance)
    }

    /// Like `select_instance`, returning a guard that releases on drop.
    pub fn select_guarded(&self, service: &str, strategy: Strategy) -> Option<ConnectionGuard> {
        self.select_instance(service, strategy)
            .map(|instance| ConnectionGuard { instance })
    }

    /// Decrement an instance's connection counter, floored at zero.
    ///
    /// Returns false when the instance is no longer registered.
    pub fn release(&self, service: &str, id: &str) -> bool {
        match self.registry.find(service, id) {
            Some(instance) => {
                instance.release();
                true
            }
            None => false,
        }
    }

    /// Per-service pool summary.
    pub fn metrics(&self) -> BTreeMap<String, ServiceMetrics> {
        self.registry
            .services()
            .into_iter()
            .map(|service| {
                let instances = self.registry.discover(&service);
                (service, ServiceMetrics::from_instances(&instances))
            })
            .collect()
    }
}

/// Per-service pool summary.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub connections: usize,
    /// Mean of the last probe latency over measured instances.
    pub avg_latency_ms: Option<f64>,
}

impl ServiceMetrics {
    fn from_instances(instances: &[Arc<ServiceInstance>]) -> Self {
        let mut metrics = ServiceMetrics {
            total: instances.len(),
            ..Default::default()
        };
        let mut latency_sum = 0u64;
        let mut measured = 0u64;
        for instance in instances {
            match instance.health() {
                HealthState::Healthy => metrics.healthy += 1,
                HealthState::Unhealthy => metrics.unhealthy += 1,
                HealthState::Unknown => metrics.unknown += 1,
            }
            metrics.connections += instance.connections();
            if let Some(ms) = instance.latency_ms() {
                latency_sum = latency_sum.saturating_add(ms);
                measured += 1;
            }
        }
        if measured > 0 {
            metrics.avg_latency_ms = Some(latency_sum as f64 / measured as f64);
        }
        metrics
    }
}

/// Holds one connection slot on an instance; releases it on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ServiceInstance>,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.instance.release();
    }
}
