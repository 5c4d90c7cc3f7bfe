//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Matched route + client address
//!     → rate_limit.rs (RateLimiter::check)
//!     → allowed: continue dispatch / denied: 429
//! ```
//!
//! # Design Decisions
//! - The dispatcher depends on the `RateLimiter` trait only
//! - Fail closed: a denied check never reaches the upstream

pub mod rate_limit;

pub use rate_limit::{RateLimiter, TokenBucketLimiter};
