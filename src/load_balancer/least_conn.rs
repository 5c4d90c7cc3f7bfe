//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Least connections selector.
/// Selects the instance with the minimum number of in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Selector for LeastConnections {
    fn select(&self, _service: &str, healthy: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        // In case of tie, the first one is selected (registry order)
        healthy.iter().min_by_key(|i| i.connections()).cloned()
    }
}
