//! Shared key-value store with TTL, the backing store of the cache layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use moka::Expiry;

use crate::error::Result;

/// String key-value store with per-entry expiry.
///
/// Expired entries must read as absent; physically removing them is left to
/// [`purge_expired`](KvStore::purge_expired).
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Default entry bound of [`MemoryKv::new`].
pub const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Process-local [`KvStore`] on a bounded moka cache.
///
/// Entries expire on their own TTL and the least useful ones are evicted
/// once `max_capacity` is reached.
pub struct MemoryKv {
    cache: Cache<String, Entry>,
    expired: Arc<AtomicU64>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let expired = Arc::new(AtomicU64::new(0));
        let counter = expired.clone();
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .eviction_listener(move |_key, _entry, cause| {
                if cause == RemovalCause::Expired {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();
        Self { cache, expired }
    }

    /// Entries currently held, after pending evictions have run.
    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.get(key).map(|e| e.value))
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.cache.insert(key.to_string(), Entry { value, ttl });
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key.as_str()).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Runs moka's pending maintenance; returns how many entries it expired.
    async fn purge_expired(&self) -> Result<u64> {
        let before = self.expired.load(Ordering::Relaxed);
        self.cache.run_pending_tasks();
        Ok(self.expired.load(Ordering::Relaxed).saturating_sub(before))
    }
}
