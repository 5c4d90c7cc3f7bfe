//! Per-key circuit breakers.
//!
//! Three states per key (`service:route`):
//! - **Closed**: requests pass; consecutive failures are counted
//! - **Open**: requests are rejected until the recovery timeout elapses
//! - **HalfOpen**: a bounded number of trial requests decide recovery
//!
//! # Design Decisions
//! - State is created lazily on first access and never removed, only reset
//! - Each key lives in its own map entry, so contention is per key
//! - Deadlines use tokio's clock; `nextAttempt` is reported in wall time

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    #[default]
    Closed,
    /// Too many failures, requests are rejected immediately
    Open,
    /// After the recovery timeout, trial requests probe the upstream
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    trials_in_flight: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            next_attempt: None,
            next_attempt_at: None,
            trials_in_flight: 0,
        }
    }

    fn open(&mut self, recovery: Duration) {
        self.state = CircuitState::Open;
        self.next_attempt = Some(Instant::now() + recovery);
        self.next_attempt_at = Some(wall_clock_after(recovery));
        self.trials_in_flight = 0;
    }

    fn close(&mut self) {
        *self = Self::new();
    }

    fn view(&self, key: &str) -> BreakerSnapshot {
        BreakerSnapshot {
            key: key.to_string(),
            state: self.state,
            failures: self.failures,
            last_failure: self.last_failure,
            next_attempt: match self.state {
                CircuitState::Closed => None,
                _ => self.next_attempt_at,
            },
        }
    }
}

fn wall_clock_after(d: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Serializable breaker state for the admin API.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Totals across all breakers.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// All circuit breakers of the gateway, keyed by `service:route`.
#[derive(Debug)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, BreakerState>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Gate check. Performs the open → half-open transition when due.
    pub fn allow(&self, key: &str) -> bool {
        self.try_acquire(key).is_ok()
    }

    /// Gate check returning the next allowed attempt when rejected.
    pub fn try_acquire(&self, key: &str) -> Result<(), DateTime<Utc>> {
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerState::new);
        let state = entry.value_mut();

        if state.state == CircuitState::Open {
            let due = state.next_attempt.map_or(true, |at| Instant::now() >= at);
            if !due {
                return Err(state.next_attempt_at.unwrap_or_else(Utc::now));
            }
            state.state = CircuitState::HalfOpen;
            state.trials_in_flight = 0;
            tracing::info!(circuit_key = %key, "Circuit breaker half-open, allowing trial");
            metrics::record_circuit_transition(key, CircuitState::HalfOpen.as_str());
        }

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if state.trials_in_flight < self.config.half_open_max_requests {
                    state.trials_in_flight += 1;
                    Ok(())
                } else {
                    Err(state.next_attempt_at.unwrap_or_else(Utc::now))
                }
            }
            CircuitState::Open => Err(state.next_attempt_at.unwrap_or_else(Utc::now)),
        }
    }

    /// Record a successful request.
    pub fn record_success(&self, key: &str) {
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerState::new);
        let state = entry.value_mut();
        match state.state {
            CircuitState::Closed => state.failures = 0,
            CircuitState::HalfOpen => {
                state.close();
                tracing::info!(circuit_key = %key, "Circuit breaker closed, upstream recovered");
                metrics::record_circuit_transition(key, CircuitState::Closed.as_str());
            }
            // Late success from a request admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self, key: &str) {
        let mut entry = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(BreakerState::new);
        let state = entry.value_mut();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Utc::now());

        match state.state {
            CircuitState::Closed if state.failures >= self.config.failure_threshold => {
                state.open(self.config.recovery_timeout());
                tracing::warn!(
                    circuit_key = %key,
                    failures = state.failures,
                    "Circuit breaker opened, threshold reached"
                );
                metrics::record_circuit_transition(key, CircuitState::Open.as_str());
            }
            CircuitState::HalfOpen => {
                state.open(self.config.recovery_timeout());
                tracing::warn!(circuit_key = %key, "Circuit breaker re-opened, trial request failed");
                metrics::record_circuit_transition(key, CircuitState::Open.as_str());
            }
            _ => {}
        }
    }

    /// The request ended without a verdict (client went away). Frees the
    /// trial slot it may hold; counters are untouched.
    pub fn record_abandoned(&self, key: &str) {
        if let Some(mut entry) = self.breakers.get_mut(key) {
            let state = entry.value_mut();
            if state.state == CircuitState::HalfOpen {
                state.trials_in_flight = state.trials_in_flight.saturating_sub(1);
            }
        }
    }

    /// Administrative reset to closed with zero failures.
    pub fn reset(&self, key: &str) {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(BreakerState::new)
            .close();
        tracing::info!(circuit_key = %key, "Circuit breaker reset");
        metrics::record_circuit_transition(key, CircuitState::Closed.as_str());
    }

    /// Administrative open; recovers after the usual timeout.
    pub fn force_open(&self, key: &str) {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(BreakerState::new)
            .open(self.config.recovery_timeout());
        tracing::warn!(circuit_key = %key, "Circuit breaker forced open");
        metrics::record_circuit_transition(key, CircuitState::Open.as_str());
    }

    /// Current state without creating the key.
    pub fn state(&self, key: &str) -> CircuitState {
        self.breakers
            .get(key)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(key).map(|s| s.view(key))
    }

    /// All known breakers, sorted by key.
    pub fn all(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().view(entry.key()))
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn stats(&self) -> BreakerStats {
        let mut stats = BreakerStats::default();
        for entry in self.breakers.iter() {
            stats.total += 1;
            match entry.state {
                CircuitState::Closed => stats.closed += 1,
                CircuitState::Open => stats.open += 1,
                CircuitState::HalfOpen => stats.half_open += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "backend:route1";

    fn breakers(threshold: u32, recovery_secs: u64) -> CircuitBreakers {
        CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_secs: recovery_secs,
            half_open_max_requests: 1,
        })
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"half-open\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_creation_and_threshold() {
        let cb = breakers(3, 60);
        assert!(cb.snapshot(KEY).is_none());
        assert!(cb.allow(KEY));
        assert_eq!(cb.snapshot(KEY).unwrap().failures, 0);

        cb.record_failure(KEY);
        cb.record_failure(KEY);
        assert_eq!(cb.state(KEY), CircuitState::Closed);
        assert!(cb.allow(KEY));

        cb.record_failure(KEY);
        assert_eq!(cb.state(KEY), CircuitState::Open);
        assert!(!cb.allow(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let cb = breakers(3, 60);
        cb.record_failure(KEY);
        cb.record_failure(KEY);
        cb.record_success(KEY);
        assert_eq!(cb.snapshot(KEY).unwrap().failures, 0);
        cb.record_failure(KEY);
        cb.record_failure(KEY);
        assert_eq!(cb.state(KEY), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_threshold_recovery_and_close() {
        let cb = breakers(5, 60);
        for _ in 0..5 {
            cb.record_failure(KEY);
        }
        assert!(!cb.allow(KEY));

        // Rejected regardless of call frequency until the deadline.
        for _ in 0..100 {
            assert!(!cb.allow(KEY));
        }
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cb.allow(KEY));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cb.allow(KEY));
        assert_eq!(cb.state(KEY), CircuitState::HalfOpen);
        assert!(!cb.allow(KEY), "only one trial while half-open");

        cb.record_success(KEY);
        let snap = cb.snapshot(KEY).unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert!(snap.next_attempt.is_none());
        assert!(cb.allow(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_new_deadline() {
        let cb = breakers(1, 10);
        cb.record_failure(KEY);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.allow(KEY));

        cb.record_failure(KEY);
        assert_eq!(cb.state(KEY), CircuitState::Open);
        assert!(!cb.allow(KEY));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!cb.allow(KEY));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cb.allow(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_slot() {
        let cb = breakers(1, 10);
        cb.record_failure(KEY);
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cb.allow(KEY));
        assert!(!cb.allow(KEY));
        cb.record_abandoned(KEY);
        assert_eq!(cb.state(KEY), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot(KEY).unwrap().failures, 1);
        assert!(cb.allow(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_bound_is_configurable() {
        let cb = CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 1,
            half_open_max_requests: 3,
        });
        cb.record_failure(KEY);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cb.allow(KEY));
        assert!(cb.allow(KEY));
        assert!(cb.allow(KEY));
        assert!(!cb.allow(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_operations() {
        let cb = breakers(5, 60);
        cb.force_open(KEY);
        assert!(matches!(cb.try_acquire(KEY), Err(_)));
        assert_eq!(
            cb.stats(),
            BreakerStats {
                total: 1,
                closed: 0,
                open: 1,
                half_open: 0
            }
        );

        cb.reset(KEY);
        assert!(cb.allow(KEY));
        assert_eq!(cb.all().len(), 1);
        assert_eq!(cb.all()[0].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let cb = breakers(1, 60);
        cb.record_failure("a:r");
        assert!(!cb.allow("a:r"));
        assert!(cb.allow("b:r"));
    }
}
