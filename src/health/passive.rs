//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Take instances out of rotation on a hard transport failure
//!
//! # Design Decisions
//! - Only connection-level failures count (refused, reset before response);
//!   timeouts and HTTP statuses are left to the breaker and the prober
//! - The prober restores the instance on its next successful probe

use crate::observability::metrics;
use crate::registry::{HealthState, ServiceInstance};

/// Mark an instance unhealthy after a connection-level failure.
pub fn report_transport_failure(instance: &ServiceInstance, reason: &str) {
    let previous = instance.mark_unhealthy();
    if previous != HealthState::Unhealthy {
        tracing::warn!(
            service = %instance.service,
            instance = %instance.id,
            reason = %reason,
            "Instance marked unhealthy after transport failure"
        );
        metrics::record_instance_health(&instance.service, &instance.id, false);
    }
}
