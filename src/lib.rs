//! Gateway dispatch core.
//!
//! Matches inbound requests to routes, selects a healthy instance of the
//! target service from a shared registry, isolates failing routes behind
//! circuit breakers and forwards the request.

// Core subsystems
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod registry;
pub mod routing;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
