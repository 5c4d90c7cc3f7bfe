//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (route lookup, registration order)
//!     → matcher.rs (evaluate path pattern + method)
//!     → Return: matched Route or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers
//!     → Swap into the table atomically
//! ```
//!
//! # Design Decisions
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use router::{Route, RouteTable, RouteView};
