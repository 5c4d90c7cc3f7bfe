//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → circuit_breaker.rs (gate check per service:route key)
//!     → forward with per-route timeout (dispatcher)
//!     → On transport failure: retries.rs (retryable? delay from backoff.rs)
//!     → circuit_breaker.rs (one outcome recorded per dispatch)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerSnapshot, BreakerStats, CircuitBreakers, CircuitState};
pub use retries::RetryPolicy;
