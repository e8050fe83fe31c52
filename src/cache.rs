use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CacheError;

/// Shared key-value store with per-key expiry, as used by the rate limiter.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<u64>, CacheError>;

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), CacheError>;

    /// Time left before `key` expires, `None` if absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Adds one to `key` and returns the new value. A missing or expired key starts at 1
    /// with `ttl`; a live key keeps its remaining time.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;
}

#[derive(Debug)]
struct CacheEntry {
    value: u64,
    expires_at: Instant,
}

impl CacheEntry {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired keys. Lookups already ignore them; this only bounds memory.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.live(now));
        before - entries.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.expires_at - now))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.live(now) => {
                entry.value += 1;
                Ok(entry.value)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }
}
