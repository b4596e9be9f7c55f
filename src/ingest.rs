//! Ingestion coordinator.
//!
//! Owns every write to the catalog and the two indexes:
//!
//! - [`IngestionCoordinator::upsert`] fingerprints incoming chunks, skips
//!   the ones already live for the source, embeds and indexes the rest, and
//!   removes the source's chunks that are no longer present.
//! - [`IngestionCoordinator::delete_by_source`] removes a source from both
//!   indexes and the catalog.
//! - [`IngestionCoordinator::migrate_embeddings`] re-embeds a collection
//!   into a shadow vector space and flips the active version.
//! - [`IngestionCoordinator::reset_collection`] empties a collection.
//! - [`IngestionCoordinator::retry_pending`] drains the compensation queue.
//!
//! A chunk is recorded in the catalog only after both its vector and its
//! keyword entry are written. When the keyword write fails after the vector
//! write succeeded, the vector is rolled back; if the rollback fails too,
//! a pending vector delete is queued and logged at `error!`.
//!
//! Writers on the same `(collection, source_id)` are serialized. Every
//! mutation that changes the catalog bumps the collection generation, which
//! invalidates cached answers for that collection.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use groundwork_core::catalog::{Catalog, PendingAction, PendingOp};
use groundwork_core::embedding::EmbeddingGateway;
use groundwork_core::fingerprint::{chunk_id, fingerprint};
use groundwork_core::index::{vector_space, KeywordIndex, VectorIndex};
use groundwork_core::models::{validate_collection_name, Chunk, ChunkInput};
use groundwork_core::{Error, Result};

use crate::cache::CacheLayer;
use crate::locks::SourceLocks;
use crate::retry::{with_backoff, Backoff};

/// Model version recorded for collections without an embedding provider.
pub const DISABLED_MODEL: &str = "disabled";

/// Approximate chars-per-token ratio used for cost estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Catch-up passes a migration makes before counting still-arriving chunks
/// as failed.
const CATCH_UP_ROUNDS: usize = 3;

/// Outcome of an upsert. Partial success when `failed_chunk_ids` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub collection: String,
    pub source_id: String,
    pub written: usize,
    pub skipped_unchanged: usize,
    pub removed_stale: usize,
    pub failed_chunk_ids: Vec<String>,
    pub generation: u64,
}

impl UpsertReport {
    pub fn is_partial(&self) -> bool {
        !self.failed_chunk_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub collection: String,
    pub source_id: String,
    pub removed: usize,
    /// Index deletes queued for compensation.
    pub pending_ops: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Report counts and estimated cost without writing.
    pub dry_run: bool,
    /// Flip even when some chunks failed to re-embed.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub collection: String,
    pub from_version: String,
    pub to_version: String,
    pub total: usize,
    pub migrated: usize,
    pub failed: usize,
    pub failed_chunk_ids: Vec<String>,
    pub estimated_tokens: u64,
    pub dry_run: bool,
    pub forced: bool,
    pub flipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
}

pub struct IngestionCoordinator {
    catalog: Arc<dyn Catalog>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingGateway>>,
    locks: SourceLocks,
    /// Held shared by writers, exclusively for a version flip or reset.
    gate: RwLock<()>,
    migration: Mutex<()>,
    batch_size: usize,
    backoff: Backoff,
    cache: Option<Arc<CacheLayer>>,
}

impl IngestionCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        keyword: Arc<dyn KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn EmbeddingGateway>>,
        batch_size: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            catalog,
            keyword,
            vector,
            embedder,
            locks: SourceLocks::new(),
            gate: RwLock::new(()),
            migration: Mutex::new(()),
            batch_size: batch_size.max(1),
            backoff,
            cache: None,
        }
    }

    /// Reclaim cache entries made unreachable by each generation bump.
    pub fn with_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bump the collection generation, reclaiming the previous one's cache
    /// entries when a cache is attached.
    async fn advance_generation(&self, collection: &str) -> Result<u64> {
        match &self.cache {
            Some(cache) => cache.invalidate_collection(collection).await,
            None => self.catalog.bump_generation(collection).await,
        }
    }

    /// Model version new collections are created with.
    pub fn model_version(&self) -> &str {
        self.embedder
            .as_ref()
            .map(|e| e.model_version())
            .unwrap_or(DISABLED_MODEL)
    }

    /// Create `collection` if needed and check it matches the configured model.
    async fn open_collection(&self, collection: &str) -> Result<String> {
        validate_collection_name(collection)?;
        let coll = self
            .catalog
            .ensure_collection(collection, self.model_version())
            .await?;
        if coll.embedding_model_version != self.model_version() {
            return Err(Error::Validation(format!(
                "collection '{}' is embedded with '{}' but the configured model is '{}'; run a migration first",
                collection,
                coll.embedding_model_version,
                self.model_version()
            )));
        }
        Ok(coll.embedding_model_version)
    }

    /// Replace the chunk set of `source_id` with `inputs`.
    ///
    /// Chunks whose `(source_id, content_hash)` is already live are left
    /// untouched. Stale chunks are removed only when every new chunk was
    /// written, so a partial failure never shrinks the previous version.
    pub async fn upsert(
        &self,
        collection: &str,
        source_id: &str,
        inputs: Vec<ChunkInput>,
    ) -> Result<UpsertReport> {
        if source_id.trim().is_empty() {
            return Err(Error::Validation("source_id must not be empty".into()));
        }
        let _source = self.locks.acquire(collection, source_id).await;
        let _gate = self.gate.read().await;
        let version = self.open_collection(collection).await?;

        let existing = self.catalog.chunks_for_source(collection, source_id).await?;
        let existing_ids: HashSet<&str> = existing.iter().map(|c| c.chunk_id.as_str()).collect();

        let mut seen_hashes = HashSet::new();
        let mut wanted: HashSet<String> = HashSet::new();
        let mut to_write: Vec<Chunk> = Vec::new();
        let mut skipped_unchanged = 0;

        for input in inputs {
            if input.text.trim().is_empty() {
                continue;
            }
            let content_hash = fingerprint(&input.text);
            if !seen_hashes.insert(content_hash.clone()) {
                debug!(source_id, position = input.position, "duplicate chunk within source skipped");
                continue;
            }
            let id = chunk_id(source_id, &content_hash);
            wanted.insert(id.clone());
            if existing_ids.contains(id.as_str()) {
                skipped_unchanged += 1;
                continue;
            }
            to_write.push(Chunk {
                chunk_id: id,
                collection: collection.to_string(),
                source_id: source_id.to_string(),
                position: input.position,
                text: input.text,
                content_hash,
                embedding_model_version: version.clone(),
                metadata: input.metadata,
                section_path: input.section_path,
            });
        }

        let mut written = 0;
        let mut failed_chunk_ids = Vec::new();
        for batch in to_write.chunks(self.batch_size) {
            let (ok, failed) = self.write_batch(collection, &version, batch).await?;
            written += ok;
            failed_chunk_ids.extend(failed);
        }

        let stale: Vec<String> = existing
            .iter()
            .filter(|c| !wanted.contains(&c.chunk_id))
            .map(|c| c.chunk_id.clone())
            .collect();
        let mut removed_stale = 0;
        if !stale.is_empty() {
            if failed_chunk_ids.is_empty() {
                self.remove_from_indexes(collection, &version, &stale).await?;
                self.catalog.remove_chunks(collection, &stale).await?;
                removed_stale = stale.len();
            } else {
                warn!(
                    collection,
                    source_id,
                    stale = stale.len(),
                    "keeping previous chunks until every new chunk is written"
                );
            }
        }

        let generation = if written > 0 || removed_stale > 0 {
            self.advance_generation(collection).await?
        } else {
            self.current_generation(collection).await?
        };

        if failed_chunk_ids.is_empty() {
            info!(collection, source_id, written, skipped_unchanged, removed_stale, generation, "upsert complete");
        } else {
            warn!(
                collection,
                source_id,
                written,
                failed = failed_chunk_ids.len(),
                generation,
                "upsert partially failed"
            );
        }

        Ok(UpsertReport {
            collection: collection.to_string(),
            source_id: source_id.to_string(),
            written,
            skipped_unchanged,
            removed_stale,
            failed_chunk_ids,
            generation,
        })
    }

    async fn current_generation(&self, collection: &str) -> Result<u64> {
        Ok(self
            .catalog
            .collection(collection)
            .await?
            .map(|c| c.generation)
            .unwrap_or(0))
    }

    /// Embed and index one batch. Returns the written count and failed ids.
    async fn write_batch(
        &self,
        collection: &str,
        version: &str,
        batch: &[Chunk],
    ) -> Result<(usize, Vec<String>)> {
        let all_ids = || batch.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>();

        let vectors: Option<Vec<Vec<f32>>> = match &self.embedder {
            None => None,
            Some(embedder) => {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                match embedder.embed(&texts).await {
                    Ok(out) if out.model_version == version && out.vectors.len() == texts.len() => {
                        Some(out.vectors)
                    }
                    Ok(out) => {
                        warn!(
                            collection,
                            expected = version,
                            got = %out.model_version,
                            "embedding batch returned unexpected model or count"
                        );
                        return Ok((0, all_ids()));
                    }
                    Err(e) => {
                        warn!(collection, size = batch.len(), error = %e, "embedding batch failed");
                        return Ok((0, all_ids()));
                    }
                }
            }
        };

        let space = vector_space(collection, version);
        let mut recorded = Vec::with_capacity(batch.len());
        let mut failed = Vec::new();

        for (i, chunk) in batch.iter().enumerate() {
            let vector = vectors.as_ref().map(|v| v[i].as_slice());
            let result = with_backoff(self.backoff, "index chunk", || {
                self.write_unit(&space, chunk, vector)
            })
            .await;
            match result {
                Ok(()) => recorded.push(chunk.clone()),
                Err(e) => {
                    warn!(collection, chunk_id = %chunk.chunk_id, error = %e, "chunk not indexed");
                    failed.push(chunk.chunk_id.clone());
                }
            }
        }

        self.catalog.put_chunks(&recorded).await?;
        Ok((recorded.len(), failed))
    }

    /// Write the vector and keyword entries of one chunk as a unit.
    async fn write_unit(&self, space: &str, chunk: &Chunk, vector: Option<&[f32]>) -> Result<()> {
        if let Some(v) = vector {
            self.vector
                .upsert(space, &chunk.chunk_id, v, &chunk.metadata)
                .await?;
        }

        let Err(e) = self
            .keyword
            .index(&chunk.collection, &chunk.chunk_id, &chunk.text, &chunk.metadata)
            .await
        else {
            return Ok(());
        };

        if vector.is_none() {
            return Err(e);
        }
        let ids = [chunk.chunk_id.clone()];
        if let Err(rollback) = self.vector.delete(space, &ids).await {
            let message = format!("keyword write failed ({}), vector rollback failed ({})", e, rollback);
            self.enqueue(
                &chunk.collection,
                PendingAction::VectorDelete {
                    space: space.to_string(),
                },
                ids.to_vec(),
                &message,
            )
            .await;
            return Err(Error::ConsistencyViolation {
                chunk_id: chunk.chunk_id.clone(),
                message,
            });
        }
        Err(e)
    }

    /// Persist a compensation op and raise the operational alert.
    async fn enqueue(&self, collection: &str, action: PendingAction, chunk_ids: Vec<String>, message: &str) {
        let op = PendingOp::new(collection, action, chunk_ids, message.to_string());
        error!(
            collection,
            op_id = %op.id,
            chunks = op.chunk_ids.len(),
            error = message,
            "consistency violation queued for compensation"
        );
        if let Err(e) = self.catalog.enqueue_pending(&op).await {
            error!(collection, op_id = %op.id, error = %e, "failed to persist compensation op");
        }
    }

    /// Delete ids from both indexes, queueing whatever fails.
    /// Returns the number of ops queued.
    async fn remove_from_indexes(&self, collection: &str, version: &str, ids: &[String]) -> Result<usize> {
        let mut queued = 0;
        if version != DISABLED_MODEL {
            let space = vector_space(collection, version);
            if let Err(e) = with_backoff(self.backoff, "vector delete", || self.vector.delete(&space, ids)).await {
                self.enqueue(
                    collection,
                    PendingAction::VectorDelete { space },
                    ids.to_vec(),
                    &e.to_string(),
                )
                .await;
                queued += 1;
            }
        }
        if let Err(e) = with_backoff(self.backoff, "keyword delete", || self.keyword.delete(collection, ids)).await {
            self.enqueue(collection, PendingAction::KeywordDelete, ids.to_vec(), &e.to_string())
                .await;
            queued += 1;
        }
        Ok(queued)
    }

    /// Remove every chunk of `source_id` from the indexes and the catalog.
    pub async fn delete_by_source(&self, collection: &str, source_id: &str) -> Result<DeleteReport> {
        validate_collection_name(collection)?;
        let _source = self.locks.acquire(collection, source_id).await;
        let _gate = self.gate.read().await;

        let Some(coll) = self.catalog.collection(collection).await? else {
            return Ok(DeleteReport {
                collection: collection.to_string(),
                source_id: source_id.to_string(),
                removed: 0,
                pending_ops: 0,
                generation: 0,
            });
        };

        let chunks = self.catalog.chunks_for_source(collection, source_id).await?;
        if chunks.is_empty() {
            return Ok(DeleteReport {
                collection: collection.to_string(),
                source_id: source_id.to_string(),
                removed: 0,
                pending_ops: 0,
                generation: coll.generation,
            });
        }

        let ids: Vec<String> = chunks.into_iter().map(|c| c.chunk_id).collect();
        let pending_ops = self
            .remove_from_indexes(collection, &coll.embedding_model_version, &ids)
            .await?;
        self.catalog.remove_chunks(collection, &ids).await?;
        let generation = self.advance_generation(collection).await?;

        info!(collection, source_id, removed = ids.len(), pending_ops, generation, "source deleted");
        Ok(DeleteReport {
            collection: collection.to_string(),
            source_id: source_id.to_string(),
            removed: ids.len(),
            pending_ops,
            generation,
        })
    }

    /// Remove every chunk of a collection. Returns the number removed.
    pub async fn reset_collection(&self, collection: &str) -> Result<usize> {
        validate_collection_name(collection)?;
        let _gate = self.gate.write().await;
        let Some(coll) = self.catalog.collection(collection).await? else {
            return Ok(0);
        };

        let ids: Vec<String> = self
            .catalog
            .all_chunks(collection)
            .await?
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();

        self.keyword.drop_collection(collection).await?;
        if coll.embedding_model_version != DISABLED_MODEL {
            self.vector
                .drop_space(&vector_space(collection, &coll.embedding_model_version))
                .await?;
        }
        self.catalog.remove_chunks(collection, &ids).await?;
        let generation = self.advance_generation(collection).await?;
        info!(collection, removed = ids.len(), generation, "collection reset");
        Ok(ids.len())
    }

    /// Re-embed `collection` with `gateway` and flip its active version.
    ///
    /// New vectors go to a shadow space while queries keep using the old
    /// one. The flip happens only when every chunk succeeded, unless
    /// `force` is set. Writers are held off only for the final catch-up
    /// and flip.
    pub async fn migrate_embeddings(
        &self,
        collection: &str,
        gateway: Arc<dyn EmbeddingGateway>,
        options: MigrateOptions,
    ) -> Result<MigrationReport> {
        validate_collection_name(collection)?;
        let _migration = self.migration.lock().await;

        let coll = self
            .catalog
            .collection(collection)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown collection '{}'", collection)))?;
        let from_version = coll.embedding_model_version.clone();
        let to_version = gateway.model_version().to_string();
        if from_version == to_version {
            return Err(Error::Validation(format!(
                "collection '{}' already uses '{}'",
                collection, to_version
            )));
        }

        let chunks = self.catalog.all_chunks(collection).await?;
        let estimated_tokens = chunks
            .iter()
            .map(|c| (c.text.chars().count() / CHARS_PER_TOKEN) as u64)
            .sum();
        let mut report = MigrationReport {
            collection: collection.to_string(),
            from_version: from_version.clone(),
            to_version: to_version.clone(),
            total: chunks.len(),
            migrated: 0,
            failed: 0,
            failed_chunk_ids: Vec::new(),
            estimated_tokens,
            dry_run: options.dry_run,
            forced: options.force,
            flipped: false,
        };
        if options.dry_run {
            info!(collection, total = report.total, estimated_tokens, "migration dry run");
            return Ok(report);
        }

        let shadow = vector_space(collection, &to_version);
        let mut migrated: HashSet<String> = HashSet::new();
        let mut failed: Vec<String> = Vec::new();
        self.embed_into(&shadow, &gateway, &chunks, &mut migrated, &mut failed).await;
        info!(collection, shadow = %shadow, migrated = migrated.len(), failed = failed.len(), "shadow embedding done");

        // Catch up with writes that landed while the shadow was filling. The
        // exclusive gate is taken only to confirm nothing new arrived and to
        // flip the active version.
        let mut rounds = 0;
        let (gate, live) = loop {
            let live = self.catalog.all_chunks(collection).await?;
            let arrivals = unmigrated(&live, &migrated, &failed);
            if !arrivals.is_empty() {
                debug!(collection, arrivals = arrivals.len(), "embedding late arrivals");
                self.embed_into(&shadow, &gateway, &arrivals, &mut migrated, &mut failed).await;
            }
            let departed = departed_from(&live, &mut migrated);
            if !departed.is_empty() {
                self.vector.delete(&shadow, &departed).await?;
            }

            let gate = self.gate.write().await;
            let live = self.catalog.all_chunks(collection).await?;
            let late = unmigrated(&live, &migrated, &failed);
            if late.is_empty() {
                break (gate, live);
            }
            rounds += 1;
            if rounds >= CATCH_UP_ROUNDS {
                warn!(collection, late = late.len(), "chunks still arriving; counting them as failed");
                failed.extend(late.into_iter().map(|c| c.chunk_id));
                break (gate, live);
            }
            drop(gate);
        };

        let departed = departed_from(&live, &mut migrated);
        let live_ids: HashSet<&str> = live.iter().map(|c| c.chunk_id.as_str()).collect();
        failed.retain(|id| live_ids.contains(id.as_str()));

        report.total = live.len();
        report.migrated = migrated.len();
        report.failed = failed.len();
        report.failed_chunk_ids = failed;

        if report.failed > 0 && !options.force {
            drop(gate);
            warn!(
                collection,
                failed = report.failed,
                "migration incomplete; active version unchanged"
            );
            self.vector.drop_space(&shadow).await?;
            return Ok(report);
        }
        if report.failed > 0 {
            warn!(
                collection,
                failed = report.failed,
                total = report.total,
                "forced cutover with partial coverage; failed chunks are keyword-only until re-ingested"
            );
        }

        // Chunks removed after the last catch-up pass are cleaned up through
        // the pending queue rather than under the gate.
        if !departed.is_empty() {
            let op = PendingOp::new(
                collection,
                PendingAction::VectorDelete {
                    space: shadow.clone(),
                },
                departed,
                "removed during migration".into(),
            );
            self.catalog.enqueue_pending(&op).await?;
        }
        let ids: Vec<String> = migrated.into_iter().collect();
        self.catalog.retag_chunks(collection, &ids, &to_version).await?;
        let generation = self
            .catalog
            .set_active_version(collection, &from_version, &to_version)
            .await?;
        drop(gate);
        report.flipped = true;
        if let Some(cache) = &self.cache {
            cache.reclaim(collection, generation.saturating_sub(1)).await;
        }

        if from_version != DISABLED_MODEL {
            let old = vector_space(collection, &from_version);
            if let Err(e) = self.vector.drop_space(&old).await {
                warn!(collection, space = %old, error = %e, "old vector space not dropped");
            }
        }

        info!(collection, from = %from_version, to = %to_version, generation, "active embedding version flipped");
        Ok(report)
    }

    async fn embed_into(
        &self,
        space: &str,
        gateway: &Arc<dyn EmbeddingGateway>,
        chunks: &[Chunk],
        migrated: &mut HashSet<String>,
        failed: &mut Vec<String>,
    ) {
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match gateway.embed(&texts).await {
                Ok(out) if out.vectors.len() == batch.len() => out.vectors,
                Ok(_) => {
                    failed.extend(batch.iter().map(|c| c.chunk_id.clone()));
                    continue;
                }
                Err(e) => {
                    warn!(space, size = batch.len(), error = %e, "migration batch failed");
                    failed.extend(batch.iter().map(|c| c.chunk_id.clone()));
                    continue;
                }
            };
            for (chunk, vector) in batch.iter().zip(&vectors) {
                let result = with_backoff(self.backoff, "shadow upsert", || {
                    self.vector.upsert(space, &chunk.chunk_id, vector, &chunk.metadata)
                })
                .await;
                match result {
                    Ok(()) => {
                        migrated.insert(chunk.chunk_id.clone());
                    }
                    Err(e) => {
                        warn!(space, chunk_id = %chunk.chunk_id, error = %e, "shadow upsert failed");
                        failed.push(chunk.chunk_id.clone());
                    }
                }
            }
        }
    }

    /// Retry queued compensation ops, oldest first.
    ///
    /// Chunks that are live again (re-ingested since the op was queued)
    /// are left alone.
    pub async fn retry_pending(&self, limit: usize) -> Result<PendingReport> {
        let ops = self.catalog.pending_ops(limit).await?;
        let mut report = PendingReport {
            attempted: ops.len(),
            ..PendingReport::default()
        };

        for op in ops {
            let live: HashSet<String> = self
                .catalog
                .get_chunks(&op.collection, &op.chunk_ids)
                .await?
                .into_iter()
                .map(|c| c.chunk_id)
                .collect();
            let ids: Vec<String> = op
                .chunk_ids
                .iter()
                .filter(|id| !live.contains(*id))
                .cloned()
                .collect();

            let result = if ids.is_empty() {
                Ok(())
            } else {
                match &op.action {
                    PendingAction::VectorDelete { space } => self.vector.delete(space, &ids).await,
                    PendingAction::KeywordDelete => self.keyword.delete(&op.collection, &ids).await,
                }
            };

            match result {
                Ok(()) => {
                    self.catalog.resolve_pending(&op.id).await?;
                    report.resolved += 1;
                    info!(op_id = %op.id, collection = %op.collection, chunks = ids.len(), "compensation op resolved");
                }
                Err(e) => {
                    self.catalog.record_pending_failure(&op.id, &e.to_string()).await?;
                    report.failed += 1;
                    error!(op_id = %op.id, attempts = op.attempts + 1, error = %e, "compensation op failed again");
                }
            }
        }
        Ok(report)
    }
}

/// Live chunks neither migrated nor already counted as failed.
fn unmigrated(live: &[Chunk], migrated: &HashSet<String>, failed: &[String]) -> Vec<Chunk> {
    live.iter()
        .filter(|c| !migrated.contains(&c.chunk_id) && !failed.contains(&c.chunk_id))
        .cloned()
        .collect()
}

/// Take migrated ids that are no longer live out of `migrated`.
fn departed_from(live: &[Chunk], migrated: &mut HashSet<String>) -> Vec<String> {
    let live_ids: HashSet<&str> = live.iter().map(|c| c.chunk_id.as_str()).collect();
    let departed: Vec<String> = migrated
        .iter()
        .filter(|id| !live_ids.contains(id.as_str()))
        .cloned()
        .collect();
    for id in &departed {
        migrated.remove(id);
    }
    departed
}

