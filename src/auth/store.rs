//! Key-value store with per-key expiry.
//!
//! Session records and failure counters both live here, separated by key
//! prefix. Production uses Redis; `memory://` selects an in-process store for
//! single-instance development and tests.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, instrument};

pub const MEMORY_STORE_URL: &str = "memory://";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),
}

/// Operations the token manager and the abuse engine need from the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Increment the integer at `key`, creating it at zero when missing.
    /// A newly created key has no expiry.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Reset the expiry of `key`. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Connect to the store named by `url`.
///
/// # Errors
/// Returns an error if the Redis URL is invalid or the first connection fails.
pub async fn connect(url: &str) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    if url == MEMORY_STORE_URL {
        debug!("Using in-process key-value store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    Ok(Arc::new(RedisStore::connect(url).await?))
}

/// Redis backend. `ConnectionManager` multiplexes one connection and
/// reconnects on failure; each operation works on its own clone.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// # Errors
    /// Returns an error if the URL is invalid or Redis is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip(self, value))]
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs())
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _deleted: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Minimum time between two full sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct MemoryEntries {
    map: HashMap<String, MemoryEntry>,
    swept_at: Option<Instant>,
}

impl MemoryEntries {
    /// Drop `key` if it has expired.
    fn purge(&mut self, key: &str, now: Instant) {
        if self.map.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.map.remove(key);
        }
    }

    /// Drop every expired entry, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        if self
            .swept_at
            .is_some_and(|swept_at| now.duration_since(swept_at) < SWEEP_INTERVAL)
        {
            return;
        }
        self.map.retain(|_, entry| entry.is_live(now));
        self.swept_at = Some(now);
    }
}

/// In-process store. Reads drop the expired key they touch and writes sweep
/// all expired keys, so memory stays bounded by the live sessions and
/// counters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<MemoryEntries>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.map.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.sweep(now);
        entries.map.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        entries.purge(key, Instant::now());
        Ok(entries.map.get(key).map(|entry| entry.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.map.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge(key, now);
        entries.sweep(now);

        let (current, expires_at) = match entries.map.get(key) {
            Some(entry) => (
                entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
                entry.expires_at,
            ),
            None => (0, None),
        };

        let next = current + 1;
        entries.map.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge(key, now);
        match entries.map.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
