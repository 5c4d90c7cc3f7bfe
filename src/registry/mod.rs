//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! register / heartbeat / unregister
//!     → store.rs or redis.rs (persist `{prefix}:{service}:{id}` with TTL)
//!     → local snapshot updated for this process
//!
//! Reconcile (periodic):
//!     scan store → build fresh snapshot → atomic swap
//!
//! Expire (periodic):
//!     list live keys → drop snapshot entries whose key lapsed
//!
//! discover(service) → read current snapshot (never touches the store)
//! ```
//!
//! # Design Decisions
//! - The snapshot is copy-on-write (`ArcSwap`); readers never lock
//! - Writers are serialized by one async mutex so a reconcile that read the
//!   store before an unregister cannot resurrect the instance
//! - Store outages keep the previous snapshot and log a warning
//! - Reconcile reuses unchanged instances so health, latency and connection
//!   counters survive
//! - Pinned instances (static config) are re-written to the store before every
//!   reconcile and expiry pass, so they never lapse while this process lives

pub mod instance;
pub mod redis;
pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, MissedTickBehavior};

use crate::config::RegistryConfig;

pub use instance::{HealthState, InstanceView, ServiceInstance, ServiceRegistration};
pub use store::{MemoryStore, RegistryStore};

/// Registry store errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry store unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
}

type Snapshot = BTreeMap<String, Vec<Arc<ServiceInstance>>>;

/// Known upstream instances per logical service.
pub struct ServiceRegistry {
    store: Arc<dyn RegistryStore>,
    snapshot: ArcSwap<Snapshot>,
    pinned: DashMap<String, ServiceRegistration>,
    write_lock: Mutex<()>,
    key_prefix: String,
    ttl: Duration,
    reconcile_interval: Duration,
    expire_interval: Duration,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, config: &RegistryConfig) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
            pinned: DashMap::new(),
            write_lock: Mutex::new(()),
            key_prefix: config.key_prefix.clone(),
            ttl: config.ttl(),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            expire_interval: Duration::from_secs(config.expire_interval_secs),
        }
    }

    /// Registry over a process-local store.
    pub fn in_memory(config: &RegistryConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Persisted key for an instance.
    pub fn key(&self, service: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, service, id)
    }

    fn scan_prefix(&self) -> String {
        format!("{}:", self.key_prefix)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Upsert a registration and refresh its TTL.
    pub async fn register(
        &self,
        mut registration: ServiceRegistration,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        registration.base_url()?;
        let _guard = self.write_lock.lock().await;

        let existing = self.find(&registration.service, &registration.id);
        if let Some(existing) = &existing {
            registration.registered_at = existing.registered_at;
        }
        registration.last_seen = Utc::now();
        registration.ttl_secs = Some(self.ttl.as_secs());

        let key = self.key(&registration.service, &registration.id);
        self.store
            .put(&key, serde_json::to_string(&registration)?, self.ttl)
            .await?;

        let instance = match existing {
            Some(inst) if inst.same_registration(&registration) => inst,
            _ => Arc::new(ServiceInstance::from_registration(&registration)?),
        };
        self.upsert_local(instance.clone());

        tracing::info!(
            service = %instance.service,
            instance = %instance.id,
            url = %instance.base_url,
            "Instance registered"
        );
        Ok(instance)
    }

    /// Register an instance this process keeps alive on its own, without
    /// external heartbeats. Unregistering it drops the pin.
    pub async fn pin(
        &self,
        registration: ServiceRegistration,
    ) -> Result<Arc<ServiceInstance>, RegistryError> {
        let key = self.key(&registration.service, &registration.id);
        let instance = self.register(registration.clone()).await?;
        self.pinned.insert(key, registration);
        Ok(instance)
    }

    /// Re-write pinned registrations with a fresh TTL. Caller holds the write lock.
    async fn refresh_pinned(&self) {
        let pinned: Vec<(String, ServiceRegistration)> = self
            .pinned
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, seed) in pinned {
            let now = Utc::now();
            let registration = match self.find(&seed.service, &seed.id) {
                Some(instance) => instance.to_registration(now, self.ttl),
                None => ServiceRegistration {
                    last_seen: now,
                    ttl_secs: Some(self.ttl.as_secs()),
                    ..seed
                },
            };
            let value = match serde_json::to_string(&registration) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cannot serialize pinned registration");
                    continue;
                }
            };
            if let Err(e) = self.store.put(&key, value, self.ttl).await {
                tracing::warn!(key = %key, error = %e, "Failed to refresh pinned registration");
                return;
            }
        }
    }

    /// Remove an instance. Returns whether anything was removed; never an
    /// error for an unknown id.
    pub async fn unregister(&self, service: &str, id: &str) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().await;
        self.pinned.remove(&self.key(service, id));
        let removed_local = self.remove_local(service, id);
        let removed_remote = self.store.delete(&self.key(service, id)).await?;

        if removed_local || removed_remote {
            tracing::info!(service = %service, instance = %id, "Instance unregistered");
        }
        Ok(removed_local || removed_remote)
    }

    /// Refresh the persisted TTL of a known instance.
    ///
    /// Returns `false` when the instance is not in this process' view; the
    /// caller should re-register.
    pub async fn heartbeat(&self, service: &str, id: &str) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let Some(instance) = self.find(service, id) else {
            return Ok(false);
        };
        let registration = instance.to_registration(Utc::now(), self.ttl);
        self.store
            .put(
                &self.key(service, id),
                serde_json::to_string(&registration)?,
                self.ttl,
            )
            .await?;
        tracing::debug!(service = %service, instance = %id, "Heartbeat");
        Ok(true)
    }

    /// Cached instances of a service.
    pub fn discover(&self, service: &str) -> Vec<Arc<ServiceInstance>> {
        self.snapshot.load().get(service).cloned().unwrap_or_default()
    }

    pub fn find(&self, service: &str, id: &str) -> Option<Arc<ServiceInstance>> {
        find_in(&self.snapshot.load(), service, id)
    }

    /// Names of services with at least one cached instance.
    pub fn services(&self) -> Vec<String> {
        self.snapshot.load().keys().cloned().collect()
    }

    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.snapshot
            .load()
            .values()
            .flat_map(|list| list.iter().cloned())
            .collect()
    }

    /// Re-read every registration from the store and swap the snapshot.
    pub async fn reconcile(&self) -> Result<usize, RegistryError> {
        let _guard = self.write_lock.lock().await;
        self.refresh_pinned().await;
        let entries = match self.store.scan(&self.scan_prefix()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    error = %e,
                    "Registry store unreachable, keeping previous snapshot"
                );
                return Err(e);
            }
        };

        let current = self.snapshot.load_full();
        let mut next = Snapshot::new();
        for (key, value) in entries {
            let registration: ServiceRegistration = match serde_json::from_str(&value) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed registration");
                    continue;
                }
            };
            let instance = match find_in(&current, &registration.service, &registration.id) {
                Some(existing) if existing.same_registration(&registration) => existing,
                _ => match ServiceInstance::from_registration(&registration) {
                    Ok(inst) => Arc::new(inst),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping invalid registration");
                        continue;
                    }
                },
            };
            next.entry(registration.service.clone())
                .or_default()
                .push(instance);
        }
        for list in next.values_mut() {
            list.sort_by(|a, b| a.id.cmp(&b.id));
            list.dedup_by(|a, b| a.id == b.id);
        }

        let count = next.values().map(Vec::len).sum();
        self.snapshot.store(Arc::new(next));
        tracing::debug!(instances = count, "Registry reconciled");
        Ok(count)
    }

    /// Drop cached instances whose persisted key has lapsed.
    pub async fn expire(&self) -> Result<usize, RegistryError> {
        let _guard = self.write_lock.lock().await;
        self.refresh_pinned().await;
        let live: HashSet<String> = match self.store.keys(&self.scan_prefix()).await {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                tracing::warn!(
                    store = self.store.name(),
                    error = %e,
                    "Registry store unreachable, skipping expiry pass"
                );
                return Err(e);
            }
        };

        let current = self.snapshot.load_full();
        let mut removed = 0;
        let next: Snapshot = current
            .iter()
            .filter_map(|(service, list)| {
                let kept: Vec<_> = list
                    .iter()
                    .filter(|i| live.contains(&self.key(&i.service, &i.id)))
                    .cloned()
                    .collect();
                removed += list.len() - kept.len();
                (!kept.is_empty()).then(|| (service.clone(), kept))
            })
            .collect();

        if removed > 0 {
            self.snapshot.store(Arc::new(next));
            tracing::info!(removed = removed, "Expired stale registrations");
        }
        Ok(removed)
    }

    /// Periodic reconciliation until shutdown.
    pub async fn run_reconcile_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are logged inside reconcile.
                    let _ = self.reconcile().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry reconcile loop stopping");
                    break;
                }
            }
        }
    }

    /// Periodic expiry until shutdown.
    pub async fn run_expire_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.expire_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have lapsed yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.expire().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry expire loop stopping");
                    break;
                }
            }
        }
    }

    fn upsert_local(&self, instance: Arc<ServiceInstance>) {
        let mut next = (**self.snapshot.load()).clone();
        let list = next.entry(instance.service.clone()).or_default();
        match list.iter().position(|i| i.id == instance.id) {
            Some(pos) => list[pos] = instance,
            None => {
                list.push(instance);
                list.sort_by(|a, b| a.id.cmp(&b.id));
            }
        }
        self.snapshot.store(Arc::new(next));
    }

    fn remove_local(&self, service: &str, id: &str) -> bool {
        let current = self.snapshot.load_full();
        let Some(list) = current.get(service) else {
            return false;
        };
        if !list.iter().any(|i| i.id == id) {
            return false;
        }

        let mut next = (*current).clone();
        let remaining: Vec<_> = list.iter().filter(|i| i.id != id).cloned().collect();
        if remaining.is_empty() {
            next.remove(service);
        } else {
            next.insert(service.to_string(), remaining);
        }
        self.snapshot.store(Arc::new(next));
        true
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("store", &self.store.name())
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .field("services", &self.snapshot.load().len())
            .finish()
    }
}

fn find_in(snapshot: &Snapshot, service: &str, id: &str) -> Option<Arc<ServiceInstance>> {
    snapshot
        .get(service)
        .and_then(|list| list.iter().find(|i| i.id == id).cloned())
}
