//! Weighted random load balancing strategy.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::load_balancer::Selector;
use crate::registry::ServiceInstance;

/// Weighted random selector.
///
/// Draws a value in `[0, Σweight)` and walks the list subtracting weights.
/// The random source is seedable so tests can pin the sequence.
#[derive(Debug)]
pub struct Weighted {
    rng: Mutex<StdRng>,
}

impl Weighted {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Selector for Weighted {
    fn select(&self, _service: &str, healthy: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>> {
        let first = healthy.first()?;
        let total: u64 = healthy.iter().map(|i| u64::from(i.weight)).sum();
        if total == 0 {
            return Some(first.clone());
        }

        let mut draw = self.rng.lock().gen_range(0..total);
        for instance in healthy {
            let weight = u64::from(instance.weight);
            if draw < weight {
                return Some(instance.clone());
            }
            draw -= weight;
        }
        Some(first.clone())
    }
}
