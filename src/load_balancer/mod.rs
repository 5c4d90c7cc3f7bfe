//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → pool.rs (healthy instances from the registry snapshot)
//!     → Apply load balancing strategy:
//!         - round_robin.rs (rotate through instances, cursor per service)
//!         - weighted.rs (random draw proportional to weight)
//!         - least_conn.rs (pick instance with fewest connections)
//!         - response_time.rs (pick instance with lowest probe latency)
//!     → connection counter incremented, guard returned
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless with respect to instances; per-instance
//!   counters live on the instance itself
//! - Strategy selection per route, falling back to the configured default
//! - Unhealthy and unknown instances excluded from selection

pub mod least_conn;
pub mod pool;
pub mod response_time;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::ServiceInstance;

pub use pool::{ConnectionGuard, LoadBalancer, ServiceMetrics};

/// Instance selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Weighted,
    LeastConnections,
    ResponseTime,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::Weighted => "weighted",
            Strategy::LeastConnections => "least-connections",
            Strategy::ResponseTime => "response-time",
        };
        f.write_str(name)
    }
}

/// Picks one instance out of an already-filtered healthy list.
pub trait Selector: Send + Sync + fmt::Debug {
    fn select(&self, service: &str, healthy: &[Arc<ServiceInstance>]) -> Option<Arc<ServiceInstance>>;
}
