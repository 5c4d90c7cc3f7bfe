//! Retry logic.
//!
//! # Responsibilities
//! - Determine if request is retryable (idempotent methods only)
//! - Compute the delay before each re-attempt
//!
//! # Design Decisions
//! - Never retry POST/PATCH (non-idempotent)
//! - Only transport errors and timeouts are retried; any HTTP response,
//!   including 5xx, is returned to the caller as-is
//! - Jittered backoff prevents thundering herd

use std::time::Duration;

use axum::http::Method;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Returns true for methods that are safe to send twice.
pub fn is_retryable(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// Per-route retry plan.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, config: &RetryConfig) -> Self {
        Self {
            max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Policy for a request: no re-attempts for non-idempotent methods.
    pub fn for_request(max_retries: u32, method: &Method, config: &RetryConfig) -> Self {
        let retries = if is_retryable(method) { max_retries } else { 0 };
        Self::new(retries, config)
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before re-attempt `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay_ms, self.max_delay_ms)
    }
}
