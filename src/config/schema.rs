//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::Strategy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener configuration.
    pub listener: ListenerConfig,

    /// Administrative API listener.
    pub admin: AdminConfig,

    /// Route definitions mapping requests to services.
    pub routes: Vec<RouteConfig>,

    /// Statically configured service instances, registered at startup.
    pub services: Vec<StaticInstanceConfig>,

    /// Service registry settings.
    pub registry: RegistryConfig,

    /// Health probe settings.
    pub health_check: HealthCheckConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Load balancer settings.
    pub load_balancer: LoadBalancerConfig,

    /// Default timeouts.
    pub timeouts: TimeoutConfig,

    /// Retry backoff configuration.
    pub retries: RetryConfig,

    /// Route table policy.
    pub routing: RoutingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request limits.
    pub limits: LimitsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// Bind address for the admin API.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Route configuration mapping a path pattern and method to a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Unique route identifier.
    pub id: String,

    /// Path pattern. A trailing `*` segment matches the rest of the path,
    /// `:name` segments match exactly one segment.
    pub path: String,

    /// HTTP method, or "ALL".
    #[serde(default = "default_method")]
    pub method: String,

    /// Logical service name to forward to.
    pub service: String,

    /// Per-route timeout in milliseconds (falls back to `timeouts.route_ms`).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Number of re-attempts for idempotent requests.
    #[serde(default)]
    pub retries: u32,

    /// Whether the circuit breaker guards this route.
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,

    /// Selection strategy override.
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// Static fallback base URL used when discovery yields no instances.
    #[serde(default)]
    pub target: Option<String>,

    /// Rate limit parameters, consumed by the rate limiter.
    #[serde(default)]
    pub rate_limit: Option<RouteRateLimit>,
}

impl RouteConfig {
    /// Minimal route for the given pattern and service.
    pub fn new(id: impl Into<String>, path: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            method: default_method(),
            service: service.into(),
            timeout_ms: None,
            retries: 0,
            circuit_breaker: true,
            strategy: None,
            target: None,
            rate_limit: None,
        }
    }

    /// Restrict the route to one method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the per-route timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Per-route rate limit parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct RouteRateLimit {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests permitted per window and client.
    pub max_requests: u32,
}

fn default_method() -> String {
    "ALL".to_string()
}

fn default_true() -> bool {
    true
}

/// A statically configured service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticInstanceConfig {
    /// Logical service name.
    pub name: String,

    /// Stable instance id.
    pub id: String,

    /// Base URL (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Weight for weighted selection.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Free-form metadata (version, region).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_weight() -> u32 {
    100
}

/// Which shared store backs the registry.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store; suitable for a single gateway and for tests.
    #[default]
    Memory,
    /// Redis, shared between gateway processes.
    Redis,
}

/// Service registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backing store.
    pub store: StoreKind,

    /// Redis connection URL (required for the redis store).
    pub redis_url: Option<String>,

    /// Key prefix for persisted registrations.
    pub key_prefix: String,

    /// Registration TTL in seconds.
    pub ttl_secs: u64,

    /// Interval between full reconciliations with the store.
    pub reconcile_interval_secs: u64,

    /// Interval between expiry passes.
    pub expire_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            redis_url: None,
            key_prefix: "gateway:registry".to_string(),
            ttl_secs: 60,
            reconcile_interval_secs: 30,
            expire_interval_secs: 60,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health probes.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe.
    pub path: String,

    /// Upper bound on probes in flight during one pass.
    pub max_concurrent_probes: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            max_concurrent_probes: 64,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a trial is allowed.
    pub recovery_timeout_secs: u64,

    /// Trial requests admitted while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Default strategy for routes without an override.
    pub strategy: Strategy,

    /// Seed for the weighted strategy's random source.
    pub seed: Option<u64>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-route timeout in milliseconds.
    pub route_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { route_ms: 30_000 }
    }
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Route table policy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutingConfig {
    /// Reject configurations where an earlier route shadows a later one.
    pub reject_shadowed_routes: bool,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body buffered for retries.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}
