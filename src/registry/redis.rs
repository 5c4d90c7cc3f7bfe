//! Redis-backed registration store.
//!
//! # Responsibilities
//! - Persist registrations with `SET key value EX ttl`
//! - Enumerate live registrations with `SCAN MATCH prefix*` + `MGET`
//!
//! # Design Decisions
//! - TTL lapse is Redis' own key expiry; nothing here sweeps keys
//! - `ConnectionManager` reconnects transparently; a failed call surfaces as
//!   `RegistryError::Redis` and the registry keeps its previous snapshot

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::registry::store::RegistryStore;
use crate::registry::RegistryError;

const SCAN_COUNT: usize = 200;

/// Registration store shared between gateway processes through Redis.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self, RegistryError> {
        let client = redis::Client::open(url)?;
        let connection_manager = ConnectionManager::new(client).await?;
        tracing::info!(url = %url, "Connected to Redis registry store");
        Ok(Self { connection_manager })
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl RegistryStore for RedisStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), RegistryError> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RegistryError> {
        let mut conn = self.connection_manager.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        self.scan_keys(prefix).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, RegistryError> {
        let keys = self.scan_keys(prefix).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection_manager.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // Keys that expired between SCAN and MGET come back as nil.
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
