//! In-memory [`Catalog`] for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{Chunk, Collection};

use super::{Catalog, PendingOp};

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Collection>,
    /// collection → chunk_id → chunk
    chunks: HashMap<String, HashMap<String, Chunk>>,
    pending: Vec<PendingOp>,
}

impl State {
    fn refresh_count(&mut self, collection: &str) {
        let count = self.chunks.get(collection).map(|c| c.len()).unwrap_or(0) as u64;
        if let Some(c) = self.collections.get_mut(collection) {
            c.chunk_count = count;
            c.last_updated_at = Utc::now();
        }
    }
}

/// Catalog held entirely in process memory.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unknown(name: &str) -> Error {
    Error::Validation(format!("unknown collection '{}'", name))
}

fn sorted(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by(|a, b| {
        a.source_id
            .cmp(&b.source_id)
            .then(a.position.cmp(&b.position))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    chunks
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn ensure_collection(&self, name: &str, model_version: &str) -> Result<Collection> {
        let mut state = self.state.write()?;
        let now = Utc::now();
        Ok(state
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                name: name.to_string(),
                embedding_model_version: model_version.to_string(),
                generation: 0,
                chunk_count: 0,
                created_at: now,
                last_updated_at: now,
            })
            .clone())
    }

    async fn collection(&self, name: &str) -> Result<Option<Collection>> {
        Ok(self.state.read()?.collections.get(name).cloned())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.state.read()?.collections.values().cloned().collect())
    }

    async fn bump_generation(&self, name: &str) -> Result<u64> {
        let mut state = self.state.write()?;
        let c = state.collections.get_mut(name).ok_or_else(|| unknown(name))?;
        c.generation += 1;
        c.last_updated_at = Utc::now();
        Ok(c.generation)
    }

    async fn set_active_version(
        &self,
        name: &str,
        expected: &str,
        new_version: &str,
    ) -> Result<u64> {
        let mut state = self.state.write()?;
        let c = state.collections.get_mut(name).ok_or_else(|| unknown(name))?;
        if c.embedding_model_version != expected {
            return Err(Error::Validation(format!(
                "collection '{}' is on '{}', expected '{}'",
                name, c.embedding_model_version, expected
            )));
        }
        c.embedding_model_version = new_version.to_string();
        c.generation += 1;
        c.last_updated_at = Utc::now();
        Ok(c.generation)
    }

    async fn chunks_for_source(&self, collection: &str, source_id: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read()?;
        let chunks = state
            .chunks
            .get(collection)
            .map(|m| m.values().filter(|c| c.source_id == source_id).cloned().collect())
            .unwrap_or_default();
        Ok(sorted(chunks))
    }

    async fn all_chunks(&self, collection: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read()?;
        let chunks = state
            .chunks
            .get(collection)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        Ok(sorted(chunks))
    }

    async fn get_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        let state = self.state.read()?;
        Ok(match state.chunks.get(collection) {
            Some(m) => chunk_ids.iter().filter_map(|id| m.get(id).cloned()).collect(),
            None => Vec::new(),
        })
    }

    async fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write()?;
        for chunk in chunks {
            if !state.collections.contains_key(&chunk.collection) {
                return Err(unknown(&chunk.collection));
            }
            state
                .chunks
                .entry(chunk.collection.clone())
                .or_default()
                .insert(chunk.chunk_id.clone(), chunk.clone());
        }
        let touched: Vec<String> = chunks.iter().map(|c| c.collection.clone()).collect();
        for name in touched {
            state.refresh_count(&name);
        }
        Ok(())
    }

    async fn remove_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        let mut state = self.state.write()?;
        if let Some(m) = state.chunks.get_mut(collection) {
            for id in chunk_ids {
                m.remove(id);
            }
        }
        state.refresh_count(collection);
        Ok(())
    }

    async fn retag_chunks(
        &self,
        collection: &str,
        chunk_ids: &[String],
        model_version: &str,
    ) -> Result<()> {
        let mut state = self.state.write()?;
        if let Some(m) = state.chunks.get_mut(collection) {
            for id in chunk_ids {
                if let Some(c) = m.get_mut(id) {
                    c.embedding_model_version = model_version.to_string();
                }
            }
        }
        Ok(())
    }

    async fn enqueue_pending(&self, op: &PendingOp) -> Result<()> {
        self.state.write()?.pending.push(op.clone());
        Ok(())
    }

    async fn pending_ops(&self, limit: usize) -> Result<Vec<PendingOp>> {
        Ok(self.state.read()?.pending.iter().take(limit).cloned().collect())
    }

    async fn resolve_pending(&self, id: &str) -> Result<()> {
        self.state.write()?.pending.retain(|op| op.id != id);
        Ok(())
    }

    async fn record_pending_failure(&self, id: &str, error: &str) -> Result<()> {
        let mut state = self.state.write()?;
        if let Some(op) = state.pending.iter_mut().find(|op| op.id == id) {
            op.attempts += 1;
            op.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PendingAction;
    use crate::models::Metadata;

    fn chunk(id: &str, source: &str, position: u32) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            collection: "docs".to_string(),
            source_id: source.to_string(),
            position,
            text: format!("text {}", id),
            content_hash: format!("hash-{}", id),
            embedding_model_version: "m1".to_string(),
            metadata: Metadata::new(),
            section_path: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_chunk_count_tracks_ledger() {
        let cat = MemoryCatalog::new();
        cat.ensure_collection("docs", "m1").await.unwrap();
        cat.put_chunks(&[chunk("a", "s1", 0), chunk("b", "s1", 1), chunk("c", "s2", 0)])
            .await
            .unwrap();
        assert_eq!(cat.collection("docs").await.unwrap().unwrap().chunk_count, 3);

        let s1 = cat.chunks_for_source("docs", "s1").await.unwrap();
        assert_eq!(s1.iter().map(|c| c.chunk_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        cat.remove_chunks("docs", &["a".to_string()]).await.unwrap();
        assert_eq!(cat.collection("docs").await.unwrap().unwrap().chunk_count, 2);
    }

    #[tokio::test]
    async fn test_put_into_unknown_collection_fails() {
        let cat = MemoryCatalog::new();
        assert!(cat.put_chunks(&[chunk("a", "s1", 0)]).await.is_err());
    }

    #[tokio::test]
    async fn test_generation_and_version_flip() {
        let cat = MemoryCatalog::new();
        cat.ensure_collection("docs", "m1").await.unwrap();
        assert_eq!(cat.bump_generation("docs").await.unwrap(), 1);

        assert!(cat.set_active_version("docs", "m0", "m2").await.is_err());
        assert_eq!(cat.set_active_version("docs", "m1", "m2").await.unwrap(), 2);

        let c = cat.collection("docs").await.unwrap().unwrap();
        assert_eq!(c.embedding_model_version, "m2");
        assert_eq!(c.generation, 2);
    }

    #[tokio::test]
    async fn test_pending_queue() {
        let cat = MemoryCatalog::new();
        let op = PendingOp::new(
            "docs",
            PendingAction::KeywordDelete,
            vec!["a".into()],
            "timeout".into(),
        );
        cat.enqueue_pending(&op).await.unwrap();
        cat.record_pending_failure(&op.id, "again").await.unwrap();

        let queued = cat.pending_ops(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attempts, 2);

        cat.resolve_pending(&op.id).await.unwrap();
        assert!(cat.pending_ops(10).await.unwrap().is_empty());
    }
}
