//! Collection metadata and the live chunk ledger.
//!
//! The [`Catalog`] is the durable source of truth for which chunks are live,
//! which embedding model a collection is served by, and the per-collection
//! generation counter that versions every cache key. Index backends hold
//! derived state; the catalog decides what is real.
//!
//! It also stores the compensation queue: index operations that succeeded
//! on one backend but not the other and must be retried.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Chunk, Collection};

/// Index operation still owed to one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// Remove vectors from a vector space.
    VectorDelete { space: String },
    /// Remove entries from the keyword index.
    KeywordDelete,
}

/// A queued compensating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: String,
    pub collection: String,
    pub action: PendingAction,
    pub chunk_ids: Vec<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingOp {
    pub fn new(collection: &str, action: PendingAction, chunk_ids: Vec<String>, error: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.to_string(),
            action,
            chunk_ids,
            attempts: 1,
            last_error: Some(error),
            created_at: Utc::now(),
        }
    }
}

/// Durable collection records and chunk ledger.
///
/// Implementations must make [`bump_generation`](Catalog::bump_generation)
/// and [`set_active_version`](Catalog::set_active_version) atomic
/// read-modify-write operations.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Return the collection, creating it with `model_version` if absent.
    async fn ensure_collection(&self, name: &str, model_version: &str) -> Result<Collection>;

    async fn collection(&self, name: &str) -> Result<Option<Collection>>;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Increment the generation counter and return the new value.
    async fn bump_generation(&self, name: &str) -> Result<u64>;

    /// Swap the active embedding model if it still equals `expected`.
    ///
    /// Bumps the generation in the same step and returns it. Fails with a
    /// validation error when another migration got there first.
    async fn set_active_version(&self, name: &str, expected: &str, new_version: &str)
        -> Result<u64>;

    /// Live chunks of one source, ordered by position.
    async fn chunks_for_source(&self, collection: &str, source_id: &str) -> Result<Vec<Chunk>>;

    /// Every live chunk of a collection, ordered by source then position.
    async fn all_chunks(&self, collection: &str) -> Result<Vec<Chunk>>;

    /// Look up chunks by id. Unknown ids are skipped.
    async fn get_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<Vec<Chunk>>;

    /// Insert or replace chunks, keeping `chunk_count` current.
    async fn put_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Remove chunks from the ledger, keeping `chunk_count` current.
    async fn remove_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<()>;

    /// Record that chunks are now embedded under `model_version`.
    async fn retag_chunks(&self, collection: &str, chunk_ids: &[String], model_version: &str)
        -> Result<()>;

    async fn enqueue_pending(&self, op: &PendingOp) -> Result<()>;

    /// Oldest queued operations first.
    async fn pending_ops(&self, limit: usize) -> Result<Vec<PendingOp>>;

    async fn resolve_pending(&self, id: &str) -> Result<()>;

    /// Record a failed retry of a queued operation.
    async fn record_pending_failure(&self, id: &str, error: &str) -> Result<()>;
}
