//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered instance
//! - Record health and observed latency on the instance
//!
//! # Design Decisions
//! - Probes run concurrently (bounded), each under its own timeout, so one
//!   dead instance never delays the others
//! - Any 2xx is healthy; everything else, including timeouts, is unhealthy

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use futures_util::stream::{self, StreamExt};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::observability::metrics;
use crate::registry::{HealthState, ServiceInstance, ServiceRegistry};

/// Outcome of one probe pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub healthy: usize,
    pub unhealthy: usize,
}

pub struct HealthProber {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthProber {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeout_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            registry,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health prober starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once.
    pub async fn probe_all(&self) -> ProbeSummary {
        let instances = self.registry.all_instances();
        let started = Instant::now();

        let results: Vec<bool> = stream::iter(instances)
            .map(|instance| async move { self.probe_and_record(&instance).await })
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        let summary = ProbeSummary {
            healthy: results.iter().filter(|ok| **ok).count(),
            unhealthy: results.iter().filter(|ok| !**ok).count(),
        };
        tracing::info!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health probe pass complete"
        );
        summary
    }

    async fn probe_and_record(&self, instance: &ServiceInstance) -> bool {
        let started = Instant::now();
        let healthy = self.probe(instance).await;
        let latency = healthy.then(|| started.elapsed());

        let previous = instance.record_probe(healthy, latency);
        let current = instance.health();
        if previous != current {
            match current {
                HealthState::Healthy => tracing::info!(
                    service = %instance.service,
                    instance = %instance.id,
                    "Instance became healthy"
                ),
                _ => tracing::warn!(
                    service = %instance.service,
                    instance = %instance.id,
                    "Instance became unhealthy"
                ),
            }
        }
        metrics::record_instance_health(&instance.service, &instance.id, healthy);
        healthy
    }

    async fn probe(&self, instance: &ServiceInstance) -> bool {
        let url = match instance.base_url.join(&self.config.path) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(instance = %instance.id, error = %e, "Invalid probe URL");
                return false;
            }
        };

        let request = match Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header("user-agent", "dispatch-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::debug!(
                        instance = %instance.id,
                        status = %response.status(),
                        "Health check failed: non-success status"
                    );
                }
                success
            }
            Ok(Err(e)) => {
                tracing::debug!(instance = %instance.id, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(instance = %instance.id, "Health check failed: timeout");
                false
            }
        }
    }
}
