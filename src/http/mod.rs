//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, correlation id, client deadline)
//!     → dispatcher.rs (route, breaker, balancer, forward)
//!     → request.rs (upstream URI, forwarded headers)
//!     → response.rs (strip hop-by-hop, add gateway headers)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::Dispatcher;
pub use request::{ClientDeadline, X_CORRELATION_ID};
pub use server::HttpServer;
