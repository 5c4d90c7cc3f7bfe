//! Rate limiting.
//!
//! The dispatcher only asks "is this call allowed"; how the answer is
//! produced belongs to the `RateLimiter` implementation.
//!
//! Buckets are created per route and client on first use. A bucket that has
//! refilled to capacity is indistinguishable from a new one, so the periodic
//! cleanup drops it.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RouteRateLimit;
use crate::routing::Route;

/// Decides whether a request may proceed.
pub trait RateLimiter: Send + Sync {
    fn check(&self, route: &Route, client: &str) -> bool;

    /// Drop state that no longer affects decisions. Returns the number of
    /// entries removed.
    fn cleanup(&self) -> usize;
}

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    capacity: f64,
    refill_per_sec: f64,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            capacity,
            refill_per_sec,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.capacity = capacity;
        self.refill_per_sec = refill_per_sec;

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * self.refill_per_sec >= self.capacity
    }
}

/// Process-local token buckets keyed by route and client.
///
/// A route's `rate_limit` gives the bucket capacity (`max_requests`) and the
/// refill period (`window_ms`). Routes without one are unlimited.
#[derive(Debug, Default)]
pub struct TokenBucketLimiter {
    buckets: DashMap<String, TokenBucket>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_limit(&self, key: String, limit: RouteRateLimit) -> bool {
        let capacity = f64::from(limit.max_requests);
        let window = Duration::from_millis(limit.window_ms.max(1));
        let refill_per_sec = capacity / window.as_secs_f64();

        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(capacity, refill_per_sec));
        bucket.try_acquire(capacity, refill_per_sec)
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, route: &Route, client: &str) -> bool {
        let Some(limit) = route.config.rate_limit else {
            return true;
        };
        let allowed = self.check_limit(format!("{}:{}", route.id(), client), limit);
        if !allowed {
            tracing::warn!(route = %route.id(), client = %client, "Rate limit exceeded");
        }
        allowed
    }

    fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_full(now));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed = removed, remaining = self.buckets.len(), "Idle rate limit buckets dropped");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn limited_route(max_requests: u32, window_ms: u64) -> Route {
        let mut config = RouteConfig::new("limited", "/api/*", "svc");
        config.rate_limit = Some(RouteRateLimit {
            window_ms,
            max_requests,
        });
        Route::compile(config, 1000).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_exhausts_and_refills() {
        let limiter = TokenBucketLimiter::new();
        let route = limited_route(2, 1000);

        assert!(limiter.check(&route, "10.0.0.1"));
        assert!(limiter.check(&route, "10.0.0.1"));
        assert!(!limiter.check(&route, "10.0.0.1"));

        // other clients have their own bucket
        assert!(limiter.check(&route, "10.0.0.2"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check(&route, "10.0.0.1"));
        assert!(!limiter.check(&route, "10.0.0.1"));
    }

    #[test]
    fn test_routes_without_limit_are_unlimited() {
        let limiter = TokenBucketLimiter::new();
        let route = Route::compile(RouteConfig::new("open", "/*", "svc"), 1000).unwrap();
        for _ in 0..1000 {
            assert!(limiter.check(&route, "c"));
        }
        assert_eq!(limiter.buckets.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_refilled_buckets_only() {
        let limiter = TokenBucketLimiter::new();
        let route = limited_route(2, 1000);

        assert!(limiter.check(&route, "light"));
        assert!(limiter.check(&route, "heavy"));
        assert!(limiter.check(&route, "heavy"));
        assert_eq!(limiter.cleanup(), 0);

        // 2 tokens/s: "light" is back to 2, "heavy" only at 1.2.
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.buckets.len(), 1);
        assert!(limiter.buckets.contains_key("limited:heavy"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.cleanup(), 1);
        assert_eq!(limiter.buckets.len(), 0);

        // A recreated bucket starts full.
        assert!(limiter.check(&route, "heavy"));
        assert!(limiter.check(&route, "heavy"));
        assert!(!limiter.check(&route, "heavy"));
    }
}
