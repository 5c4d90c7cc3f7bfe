//! Service instances and their persisted registrations.
//!
//! # Responsibilities
//! - Represent one running copy of a service
//! - Track health, last probe time, observed latency and in-flight connections
//! - Convert to and from the persisted `ServiceRegistration` form
//!
//! # Design Decisions
//! - Mutable per-instance state is atomic so selection and release never lock
//! - The connection counter saturates at zero

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::registry::RegistryError;

const NO_LATENCY: u64 = u64::MAX;
const NEVER_PROBED: i64 = i64::MIN;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

fn default_weight() -> u32 {
    100
}

fn default_health() -> HealthState {
    HealthState::Healthy
}

/// Persisted form of a service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub service: String,
    pub id: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_health")]
    pub health: HealthState,
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl ServiceRegistration {
    pub fn new(service: impl Into<String>, id: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            service: service.into(),
            id: id.into(),
            url: url.into(),
            weight: default_weight(),
            metadata: BTreeMap::new(),
            health: default_health(),
            registered_at: now,
            last_seen: now,
            ttl_secs: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = health;
        self
    }

    /// Parse and check the base URL.
    pub fn base_url(&self) -> Result<Url, RegistryError> {
        if self.service.is_empty() || self.id.is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "service and id must not be empty".into(),
            ));
        }
        if self.service.contains(':') || self.id.contains(':') {
            return Err(RegistryError::InvalidRegistration(format!(
                "'{}:{}' must not contain ':'",
                self.service, self.id
            )));
        }
        let url = Url::parse(&self.url).map_err(|e| {
            RegistryError::InvalidRegistration(format!("invalid url '{}': {}", self.url, e))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(RegistryError::InvalidRegistration(format!(
                "unsupported scheme '{}'",
                other
            ))),
        }
    }
}

/// One running copy of a backend service.
#[derive(Debug)]
pub struct ServiceInstance {
    pub id: String,
    pub service: String,
    pub base_url: Url,
    pub weight: u32,
    pub metadata: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,

    health: AtomicU8,
    /// Epoch milliseconds of the last probe.
    last_probe_ms: AtomicI64,
    /// Last observed latency in milliseconds.
    latency_ms: AtomicU64,
    /// Number of currently active connections.
    connections: AtomicUsize,
}

impl ServiceInstance {
    pub fn from_registration(reg: &ServiceRegistration) -> Result<Self, RegistryError> {
        let base_url = reg.base_url()?;
        Ok(Self {
            id: reg.id.clone(),
            service: reg.service.clone(),
            base_url,
            weight: reg.weight,
            metadata: reg.metadata.clone(),
            registered_at: reg.registered_at,
            health: AtomicU8::new(reg.health as u8),
            last_probe_ms: AtomicI64::new(NEVER_PROBED),
            latency_ms: AtomicU64::new(NO_LATENCY),
            connections: AtomicUsize::new(0),
        })
    }

    /// True if the registration describes this same instance.
    pub fn same_registration(&self, reg: &ServiceRegistration) -> bool {
        self.service == reg.service
            && self.id == reg.id
            && self.weight == reg.weight
            && self.metadata == reg.metadata
            && reg.base_url().map(|u| u == self.base_url).unwrap_or(false)
    }

    /// Persisted form, stamped with the given last-seen time.
    pub fn to_registration(&self, last_seen: DateTime<Utc>, ttl: Duration) -> ServiceRegistration {
        ServiceRegistration {
            service: self.service.clone(),
            id: self.id.clone(),
            url: self.base_url.to_string(),
            weight: self.weight,
            metadata: self.metadata.clone(),
            health: self.health(),
            registered_at: self.registered_at,
            last_seen,
            ttl_secs: Some(ttl.as_secs()),
        }
    }

    // --- Health ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.health.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == HealthState::Healthy
    }

    /// Store a new health state, returning the previous one.
    fn set_health(&self, state: HealthState) -> HealthState {
        HealthState::from(self.health.swap(state as u8, Ordering::AcqRel))
    }

    /// Record the outcome of a liveness probe.
    pub fn record_probe(&self, healthy: bool, latency: Option<Duration>) -> HealthState {
        self.last_probe_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        if let Some(latency) = latency {
            self.latency_ms
                .store(latency.as_millis().min(u64::MAX as u128 - 1) as u64, Ordering::Release);
        }
        let state = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        self.set_health(state)
    }

    /// Hard transport failure observed while forwarding.
    pub fn mark_unhealthy(&self) -> HealthState {
        self.set_health(HealthState::Unhealthy)
    }

    pub fn last_probe(&self) -> Option<DateTime<Utc>> {
        match self.last_probe_ms.load(Ordering::Acquire) {
            NEVER_PROBED => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self.latency_ms.load(Ordering::Acquire) {
            NO_LATENCY => None,
            ms => Some(ms),
        }
    }

    // --- Connections ---

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Increment active connection count.
    pub fn acquire(&self) -> usize {
        self.connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement active connection count, floored at zero.
    pub fn release(&self) -> usize {
        match self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => 0,
        }
    }

    /// Serializable view for the admin API.
    pub fn view(&self) -> InstanceView {
        InstanceView {
            id: self.id.clone(),
            service: self.service.clone(),
            url: self.base_url.to_string(),
            health: self.health(),
            weight: self.weight,
            connections: self.connections(),
            latency_ms: self.latency_ms(),
            last_probe: self.last_probe(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Instance as exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub id: String,
    pub service: String,
    pub url: String,
    pub health: HealthState,
    pub weight: u32,
    pub connections: usize,
    pub latency_ms: Option<u64>,
    pub last_probe: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}
