//! Shared registration store.
//!
//! # Responsibilities
//! - Abstract the TTL-expiring key/value store that gateway processes share
//! - Provide a process-local implementation for single-node use and tests
//!
//! # Design Decisions
//! - Values are opaque JSON strings; the registry owns the format
//! - Expiry in the memory store is lazy and uses tokio's clock, so paused-time
//!   tests see TTL lapse deterministically

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::registry::RegistryError;

/// A TTL-expiring key/value store.
#[async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    /// Write `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), RegistryError>;

    /// Delete `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, RegistryError>;

    /// Live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError>;

    /// Live key/value pairs starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, RegistryError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Instant)>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until availability is restored.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(RegistryError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), RegistryError> {
        self.check()?;
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, (_, expires_at))| expires_at > now)
            .unwrap_or(false))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        self.check()?;
        self.purge_expired();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, RegistryError> {
        self.check()?;
        self.purge_expired();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().0.clone()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
