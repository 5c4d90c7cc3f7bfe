//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Round-robin selector.
/// Keeps one cursor per service name.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, service: &str) -> usize {
        if let Some(cursor) = self.cursors.get(service) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl Selector for RoundRobin {
    fn select(&self, service: &str, healthy: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        if healthy.is_empty() {
            return None;
        }
        let index = self.next_index(service) % healthy.len();
        Some(healthy[index].clone())
    }
}
