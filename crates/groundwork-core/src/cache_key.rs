//! Deterministic cache keys and cache entry envelopes.
//!
//! Collection-scoped keys embed the collection generation in a readable
//! prefix (`{namespace}:{kind}:{collection}:g{generation}:{digest}`). A
//! generation bump makes every older key unreachable, so invalidation is a
//! single counter increment. Entries also carry the generation as
//! `version_tag`, checked again on read.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fingerprint::normalize;

/// What a cached value holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Answer,
    VectorHits,
    Rerank,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Answer => "answer",
            CacheKind::VectorHits => "vector",
            CacheKind::Rerank => "rerank",
        }
    }
}

/// Normalize a query for cache keying.
///
/// Case and whitespace differences, plus trailing `?`, `.` and `!`, do not
/// produce distinct keys.
pub fn normalize_query(query: &str) -> String {
    normalize(query)
        .trim_end_matches(['?', '.', '!'])
        .trim_end()
        .to_string()
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key prefix shared by every entry of one collection generation.
pub fn collection_prefix(namespace: &str, kind: CacheKind, collection: &str, generation: u64) -> String {
    format!("{}:{}:{}:g{}:", namespace, kind.as_str(), collection, generation)
}

/// Key for a collection-scoped value (answers, vector hits).
///
/// `params` is the canonical JSON of the retrieval parameters.
pub fn collection_key(
    namespace: &str,
    kind: CacheKind,
    collection: &str,
    generation: u64,
    model_version: &str,
    query: &str,
    params: &str,
) -> String {
    let normalized = normalize_query(query);
    format!(
        "{}{}",
        collection_prefix(namespace, kind, collection, generation),
        digest(&[&normalized, collection, model_version, params])
    )
}

/// Key for a rerank score of one `(query, chunk, model)` triple.
///
/// Chunk ids are content-derived, so these keys need no generation.
pub fn rerank_key(namespace: &str, query: &str, chunk_id: &str, model_version: &str) -> String {
    format!(
        "{}:{}:{}",
        namespace,
        CacheKind::Rerank.as_str(),
        digest(&[&normalize_query(query), chunk_id, model_version])
    )
}

/// Envelope stored in the key-value backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Collection generation at write time.
    pub version_tag: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(key: String, value: T, ttl: Duration, version_tag: u64) -> Self {
        Self {
            key,
            value,
            created_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            version_tag,
        }
    }

    /// Valid when unexpired and written under `generation`.
    pub fn is_valid(&self, generation: u64, now: DateTime<Utc>) -> bool {
        let expires = self.created_at + chrono::Duration::seconds(self.ttl_secs as i64);
        self.version_tag == generation && now < expires
    }
}
