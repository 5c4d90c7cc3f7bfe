//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build gateway → spawn prober, reconcile, expire → bind listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → listeners drain → background tasks joined
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast channel reaches every long-running task
//! - Listeners start last (traffic only when the registry is seeded)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::BackgroundTasks;
