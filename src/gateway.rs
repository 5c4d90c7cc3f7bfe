//! Gateway assembly.
//!
//! # Responsibilities
//! - Build every subsystem from a `GatewayConfig` in dependency order
//! - Pin statically configured instances into the registry
//! - Apply reloaded configuration to the live route table
//!
//! # Data Flow
//! ```text
//! config → store → registry → balancer ─┐
//!        → breakers, route table, stats ┴→ dispatcher → proxy router
//!                                        └→ admin router
//! ```

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::admin;
use crate::config::{GatewayConfig, StoreKind};
use crate::error::GatewayError;
use crate::health::HealthProber;
use crate::http::dispatcher::Dispatcher;
use crate::http::server;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics::RouteStats;
use crate::registry::redis::RedisStore;
use crate::registry::{MemoryStore, RegistryStore, ServiceRegistration, ServiceRegistry};
use crate::resilience::CircuitBreakers;
use crate::routing::RouteTable;

/// A fully wired gateway.
pub struct Gateway {
    pub config: GatewayConfig,
    pub registry: Arc<ServiceRegistry>,
    pub balancer: Arc<LoadBalancer>,
    pub breakers: Arc<CircuitBreakers>,
    pub routes: Arc<RouteTable>,
    pub stats: Arc<RouteStats>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl Gateway {
    /// Build a gateway with the store named in the configuration.
    pub async fn build(config: GatewayConfig) -> Result<Self, GatewayError> {
        let store: Arc<dyn RegistryStore> = match config.registry.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Redis => {
                let url = config.registry.redis_url.as_deref().ok_or_else(|| {
                    GatewayError::Configuration("registry.redis_url is required for the redis store".into())
                })?;
                Arc::new(RedisStore::connect(url).await?)
            }
        };
        Self::with_store(config, store).await
    }

    /// Build a gateway on top of an existing registry store.
    pub async fn with_store(
        config: GatewayConfig,
        store: Arc<dyn RegistryStore>,
    ) -> Result<Self, GatewayError> {
        let registry = Arc::new(ServiceRegistry::new(store, &config.registry));

        for seed in &config.services {
            let mut registration = ServiceRegistration::new(&seed.name, &seed.id, &seed.url)
                .with_weight(seed.weight);
            registration.metadata = seed.metadata.clone();
            registry.pin(registration).await?;
        }

        // Pick up instances other gateways already registered.
        if let Err(e) = registry.reconcile().await {
            tracing::warn!(error = %e, "Initial registry reconcile failed, starting from seeds only");
        }

        let routes = Arc::new(RouteTable::new(config.routes.clone(), config.timeouts.route_ms)?);
        let balancer = Arc::new(LoadBalancer::new(registry.clone(), &config.load_balancer));
        let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker.clone()));
        let stats = Arc::new(RouteStats::new());
        let dispatcher = Arc::new(Dispatcher::new(
            routes.clone(),
            balancer.clone(),
            breakers.clone(),
            stats.clone(),
            config.retries.clone(),
            config.limits.max_body_bytes,
        ));

        tracing::info!(
            routes = routes.len(),
            services = registry.services().len(),
            store = registry.store_name(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            registry,
            balancer,
            breakers,
            routes,
            stats,
            dispatcher,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn proxy_router(&self) -> Router {
        server::proxy_router(self.dispatcher.clone())
    }

    pub fn admin_router(self: &Arc<Self>) -> Router {
        admin::admin_router(self.clone())
    }

    pub fn prober(&self) -> HealthProber {
        HealthProber::new(self.registry.clone(), self.config.health_check.clone())
    }

    /// Swap in the routes of a reloaded configuration. Other sections need a
    /// restart.
    pub fn apply_config(&self, config: &GatewayConfig) -> Result<(), GatewayError> {
        self.routes.reload(config.routes.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{RouteConfig, StaticInstanceConfig};

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.routes = vec![RouteConfig::new("users", "/api/users/*", "backend")];
        config.services = vec![StaticInstanceConfig {
            name: "backend".into(),
            id: "b1".into(),
            url: "http://127.0.0.1:3001".into(),
            weight: 50,
            metadata: [("region".to_string(), "eu".to_string())].into(),
        }];
        config
    }

    #[tokio::test]
    async fn test_build_seeds_static_instances() {
        let gateway = Gateway::build(config()).await.unwrap();
        let instance = gateway.registry.find("backend", "b1").unwrap();
        assert_eq!(instance.weight, 50);
        assert_eq!(instance.metadata.get("region").map(String::as_str), Some("eu"));
        assert_eq!(gateway.routes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_instances_survive_ttl() {
        let gateway = Gateway::build(config()).await.unwrap();
        let ttl = gateway.registry.ttl();

        tokio::time::advance(ttl + Duration::from_secs(1)).await;
        assert_eq!(gateway.registry.expire().await.unwrap(), 0);
        gateway.registry.reconcile().await.unwrap();

        let found = gateway.registry.discover("backend");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b1");
        assert_eq!(found[0].weight, 50);
    }

    #[tokio::test]
    async fn test_redis_store_requires_url() {
        let mut config = config();
        config.registry.store = StoreKind::Redis;
        assert!(matches!(
            Gateway::build(config).await,
            Err(GatewayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_config_reloads_routes() {
        let gateway = Gateway::build(config()).await.unwrap();
        let mut next = config();
        next.routes.push(RouteConfig::new("orders", "/api/orders/*", "orders"));
        gateway.apply_config(&next).unwrap();
        assert!(gateway.routes.get("orders").is_some());
    }
}
