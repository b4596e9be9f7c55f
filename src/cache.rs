//! Cache layer over a shared [`KvStore`].
//!
//! Values are wrapped in a [`CacheEntry`] envelope and stored as JSON.
//! Collection-scoped keys embed the collection generation, so a generation
//! bump by the ingestion coordinator makes every older entry unreachable;
//! the envelope's `version_tag` is checked again on read.
//!
//! The cache is best-effort. A backend error or a read slower than
//! `read_timeout_ms` is a miss, and failed writes are logged and dropped.
//! Writes produced while answering a query are staged in
//! [`PendingWrites`] and flushed only once the request has completed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use groundwork_core::cache_key::{self, CacheEntry, CacheKind};
use groundwork_core::catalog::Catalog;
use groundwork_core::kv::KvStore;
use groundwork_core::Result;

use crate::config::CacheConfig;

/// Generation tag used for keys that are not collection-scoped.
pub const UNVERSIONED: u64 = 0;

/// Cache writes staged during a request.
#[derive(Debug, Default)]
pub struct PendingWrites {
    entries: Vec<(String, String, Duration)>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` under `key`. Values that fail to serialize are skipped.
    pub fn stage<T: Serialize>(&mut self, key: String, value: &T, ttl: Duration, version_tag: u64) {
        let entry = CacheEntry::new(key.clone(), value, ttl, version_tag);
        match serde_json::to_string(&entry) {
            Ok(json) => self.entries.push((key, json, ttl)),
            Err(e) => warn!(key = %key, error = %e, "cache value not serializable"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CacheLayer {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(kv: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>, config: CacheConfig) -> Self {
        Self {
            kv,
            catalog,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn ttl(&self, kind: CacheKind) -> Duration {
        Duration::from_secs(match kind {
            CacheKind::Answer => self.config.answer_ttl_secs,
            CacheKind::VectorHits => self.config.vector_ttl_secs,
            CacheKind::Rerank => self.config.rerank_ttl_secs,
        })
    }

    /// Key for a collection-scoped value under `generation`.
    pub fn collection_key(
        &self,
        kind: CacheKind,
        collection: &str,
        generation: u64,
        model_version: &str,
        query: &str,
        params: &str,
    ) -> String {
        cache_key::collection_key(
            &self.config.namespace,
            kind,
            collection,
            generation,
            model_version,
            query,
            params,
        )
    }

    pub fn rerank_key(&self, query: &str, chunk_id: &str, model_version: &str) -> String {
        cache_key::rerank_key(&self.config.namespace, query, chunk_id, model_version)
    }

    /// Look up `key`, treating anything not written under `generation` as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, generation: u64) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        let read = tokio::time::timeout(
            Duration::from_millis(self.config.read_timeout_ms),
            self.kv.get(key),
        )
        .await;

        let raw = match read {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
            Err(_) => {
                warn!(key, "cache read timed out");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if entry.is_valid(generation, Utc::now()) => Some(entry.value),
            Ok(_) => {
                debug!(key, generation, "stale cache entry");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry");
                None
            }
        }
    }

    /// Write a single value immediately.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, version_tag: u64) {
        let mut writes = PendingWrites::new();
        writes.stage(key.to_string(), value, ttl, version_tag);
        self.flush(writes).await;
    }

    /// Persist staged writes.
    pub async fn flush(&self, writes: PendingWrites) {
        if !self.config.enabled {
            return;
        }
        for (key, json, ttl) in writes.entries {
            if let Err(e) = self.kv.put(&key, json, ttl).await {
                warn!(key = %key, error = %e, "cache write failed");
            }
        }
    }

    /// Make every cached value of `collection` unreachable.
    ///
    /// Bumps the collection generation, then reclaims the previous
    /// generation's entries. Returns the new generation.
    pub async fn invalidate_collection(&self, collection: &str) -> Result<u64> {
        let generation = self.catalog.bump_generation(collection).await?;
        self.reclaim(collection, generation.saturating_sub(1)).await;
        Ok(generation)
    }

    /// Delete entries of an old generation and any expired entries.
    pub async fn reclaim(&self, collection: &str, old_generation: u64) {
        for kind in [CacheKind::Answer, CacheKind::VectorHits] {
            let prefix =
                cache_key::collection_prefix(&self.config.namespace, kind, collection, old_generation);
            if let Err(e) = self.kv.delete_prefix(&prefix).await {
                debug!(prefix = %prefix, error = %e, "cache reclaim skipped");
            }
        }
        if let Err(e) = self.kv.purge_expired().await {
            debug!(error = %e, "cache purge skipped");
        }
    }
}
