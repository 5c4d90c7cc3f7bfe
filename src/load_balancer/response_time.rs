//! Response-time load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Selects the instance with the lowest latency observed by the prober.
/// Instances never measured rank last.
#[derive(Debug, Default)]
pub struct ResponseTime;

impl ResponseTime {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for ResponseTime {
    fn select(&self, _service: &str, healthy: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        healthy
            .iter()
            .min_by_key(|i| i.latency_ms().unwrap_or(u64::MAX))
            .cloned()
    }
}
