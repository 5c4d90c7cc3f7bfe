//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each instance concurrently
//!     → Record health + latency on the instance
//!
//! Passive health checks (passive.rs):
//!     Dispatcher sees a connection-level failure
//!     → Instance marked unhealthy until the next good probe
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - Health state is per-instance, written only here
//! - A failed probe is retried on the next cycle

pub mod active;
pub mod passive;

pub use active::{HealthProber, ProbeSummary};
