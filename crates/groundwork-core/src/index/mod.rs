//! Keyword and vector index capability traits.
//!
//! The query pipeline and the ingestion coordinator only ever talk to these
//! two traits. Which backend sits behind them (in-memory, SQLite FTS5, a
//! hosted vector store) is chosen once at startup.
//!
//! Vector entries live in a *space*: one collection embedded under one
//! model version (see [`vector_space`]). A migration writes the new model's
//! vectors into a fresh space while queries keep reading the old one.
//!
//! Searching an unknown collection or space returns an empty list.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Metadata, RetrievalCandidate};

/// Name of the vector space holding `collection` embedded with `model_version`.
pub fn vector_space(collection: &str, model_version: &str) -> String {
    format!("{}@{}", collection, model_version)
}

/// BM25-style full-text index.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    /// Ranked hits for `query`, best first, at most `top_n`.
    async fn search(&self, collection: &str, query: &str, top_n: usize)
        -> Result<Vec<RetrievalCandidate>>;

    /// Index (or re-index) one chunk's text.
    async fn index(
        &self,
        collection: &str,
        chunk_id: &str,
        text: &str,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Remove chunks. Unknown ids are ignored.
    async fn delete(&self, collection: &str, chunk_ids: &[String]) -> Result<()>;

    /// Remove every entry of a collection.
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

/// Nearest-neighbour vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Ranked hits by similarity to `vector`, best first, at most `top_n`.
    async fn search(&self, space: &str, vector: &[f32], top_n: usize)
        -> Result<Vec<RetrievalCandidate>>;

    /// Insert or replace the vector for one chunk.
    async fn upsert(
        &self,
        space: &str,
        chunk_id: &str,
        vector: &[f32],
        metadata: &Metadata,
    ) -> Result<()>;

    /// Remove vectors. Unknown ids are ignored.
    async fn delete(&self, space: &str, chunk_ids: &[String]) -> Result<()>;

    /// Remove an entire space.
    async fn drop_space(&self, space: &str) -> Result<()>;

    /// Number of vectors stored in a space.
    async fn count(&self, space: &str) -> Result<usize>;
}
