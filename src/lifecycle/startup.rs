//! Background task orchestration.
//!
//! # Responsibilities
//! - Spawn the health prober, registry reconcile and expire loops, and the
//!   rate limiter cleanup
//! - Stop them on shutdown and wait until they exit

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::gateway::Gateway;
use crate::lifecycle::shutdown::Shutdown;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Handles of the gateway's periodic tasks.
pub struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn start(gateway: &Gateway, shutdown: &Shutdown) -> Self {
        let prober = gateway.prober();
        let reconcile = gateway.registry.clone();
        let expire = gateway.registry.clone();
        let dispatcher = gateway.dispatcher.clone();

        let handles = vec![
            ("health-prober", tokio::spawn(prober.run(shutdown.subscribe()))),
            (
                "registry-reconcile",
                tokio::spawn(reconcile.run_reconcile_loop(shutdown.subscribe())),
            ),
            (
                "registry-expire",
                tokio::spawn(expire.run_expire_loop(shutdown.subscribe())),
            ),
            (
                "rate-limit-cleanup",
                tokio::spawn(
                    dispatcher.run_rate_limit_cleanup(RATE_LIMIT_CLEANUP_INTERVAL, shutdown.subscribe()),
                ),
            ),
        ];
        tracing::info!(tasks = handles.len(), "Background tasks started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Trigger shutdown and join every task.
    pub async fn stop(self, shutdown: &Shutdown) {
        shutdown.trigger();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Background task panicked");
            }
        }
        tracing::info!("Background tasks stopped");
    }
}
