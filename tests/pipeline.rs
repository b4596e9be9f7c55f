//! End-to-end tests of the query pipeline and the ingestion coordinator
//! over in-memory backends.
//!
//! Failure injection wraps the in-memory indexes so individual operations
//! can be made to fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use groundwork::app::App;
use groundwork::backends::Backends;
use groundwork::config::{parse_config, CacheConfig, Config};
use groundwork::ingest::{IngestionCoordinator, MigrateOptions, DISABLED_MODEL};
use groundwork::pipeline::QueryRequest;
use groundwork::retry::Backoff;
use groundwork_core::catalog::memory::MemoryCatalog;
use groundwork_core::catalog::Catalog;
use groundwork_core::embedding::{Embedded, EmbeddingGateway, HashingEmbedder};
use groundwork_core::index::memory::{MemoryKeywordIndex, MemoryVectorIndex};
use groundwork_core::index::{vector_space, KeywordIndex, VectorIndex};
use groundwork_core::kv::{KvStore, MemoryKv};
use groundwork_core::cache_key::{collection_prefix, CacheKind};
use groundwork_core::catalog::PendingOp;
use groundwork_core::models::{Chunk, ChunkInput, Collection, Metadata, RetrievalCandidate, Stage};
use groundwork_core::planner::Strategy;
use groundwork_core::{Error, ErrorKind, Result};

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(extra: &str) -> Config {
    let toml = format!(
        r#"[db]
path = "unused.sqlite"

[backends]
catalog = "memory"
vector = "memory"
keyword = "memory"
cache = "memory"

[ingest]
backoff_base_ms = 1

{}
"#,
        extra
    );
    parse_config(&toml).unwrap()
}

fn app_with(backends: Backends, extra: &str) -> App {
    App::with_backends(test_config(extra), backends).unwrap()
}

fn chunks(texts: &[&str]) -> Vec<ChunkInput> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| ChunkInput::new(i as u32, *t))
        .collect()
}

fn fast_backoff() -> Backoff {
    Backoff::new(1, 1)
}

/// Counts how many texts reach the embedder.
struct CountingEmbedder {
    inner: HashingEmbedder,
    texts: AtomicUsize,
}

impl CountingEmbedder {
    fn new(dims: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dims),
            texts: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for CountingEmbedder {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

/// Embeds normally except for texts containing `poison`.
struct PoisonedEmbedder {
    inner: HashingEmbedder,
    poison: &'static str,
}

#[async_trait]
impl EmbeddingGateway for PoisonedEmbedder {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        if texts.iter().any(|t| t.contains(self.poison)) {
            return Err(Error::EmbeddingUnavailable("model overloaded".into()));
        }
        self.inner.embed(texts).await
    }
}

/// Vector index whose search can be switched off.
#[derive(Default)]
struct FlakyVectorIndex {
    inner: MemoryVectorIndex,
    fail_search: AtomicBool,
}

#[async_trait]
impl VectorIndex for FlakyVectorIndex {
    async fn search(&self, space: &str, vector: &[f32], top_n: usize) -> Result<Vec<RetrievalCandidate>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(Error::backend("vector", "connection refused"));
        }
        self.inner.search(space, vector, top_n).await
    }

    async fn upsert(&self, space: &str, chunk_id: &str, vector: &[f32], metadata: &Metadata) -> Result<()> {
        self.inner.upsert(space, chunk_id, vector, metadata).await
    }

    async fn delete(&self, space: &str, chunk_ids: &[String]) -> Result<()> {
        self.inner.delete(space, chunk_ids).await
    }

    async fn drop_space(&self, space: &str) -> Result<()> {
        self.inner.drop_space(space).await
    }

    async fn count(&self, space: &str) -> Result<usize> {
        self.inner.count(space).await
    }
}

/// Keyword index with switchable write, delete, and search failures.
#[derive(Default)]
struct FlakyKeywordIndex {
    inner: MemoryKeywordIndex,
    fail_index: AtomicBool,
    fail_delete: AtomicBool,
    slow_search: AtomicBool,
}

#[async_trait]
impl KeywordIndex for FlakyKeywordIndex {
    async fn search(&self, collection: &str, query: &str, top_n: usize) -> Result<Vec<RetrievalCandidate>> {
        if self.slow_search.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.search(collection, query, top_n).await
    }

    async fn index(&self, collection: &str, chunk_id: &str, text: &str, metadata: &Metadata) -> Result<()> {
        if self.fail_index.load(Ordering::SeqCst) {
            return Err(Error::backend("keyword", "index unavailable"));
        }
        self.inner.index(collection, chunk_id, text, metadata).await
    }

    async fn delete(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::backend("keyword", "index unavailable"));
        }
        self.inner.delete(collection, chunk_ids).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.inner.drop_collection(collection).await
    }
}

/// Catalog whose query-path lookups fail a set number of times.
#[derive(Default)]
struct FlakyCatalog {
    inner: MemoryCatalog,
    failing_collection: AtomicUsize,
    failing_get_chunks: AtomicUsize,
}

fn trip(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn ensure_collection(&self, name: &str, model_version: &str) -> Result<Collection> {
        self.inner.ensure_collection(name, model_version).await
    }

    async fn collection(&self, name: &str) -> Result<Option<Collection>> {
        if trip(&self.failing_collection) {
            return Err(Error::backend("catalog", "database is locked"));
        }
        self.inner.collection(name).await
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.inner.list_collections().await
    }

    async fn bump_generation(&self, name: &str) -> Result<u64> {
        self.inner.bump_generation(name).await
    }

    async fn set_active_version(&self, name: &str, expected: &str, new_version: &str) -> Result<u64> {
        self.inner.set_active_version(name, expected, new_version).await
    }

    async fn chunks_for_source(&self, collection: &str, source_id: &str) -> Result<Vec<Chunk>> {
        self.inner.chunks_for_source(collection, source_id).await
    }

    async fn all_chunks(&self, collection: &str) -> Result<Vec<Chunk>> {
        self.inner.all_chunks(collection).await
    }

    async fn get_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        if trip(&self.failing_get_chunks) {
            return Err(Error::backend("catalog", "database is locked"));
        }
        self.inner.get_chunks(collection, chunk_ids).await
    }

    async fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.inner.put_chunks(chunks).await
    }

    async fn remove_chunks(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        self.inner.remove_chunks(collection, chunk_ids).await
    }

    async fn retag_chunks(&self, collection: &str, chunk_ids: &[String], model_version: &str) -> Result<()> {
        self.inner.retag_chunks(collection, chunk_ids, model_version).await
    }

    async fn enqueue_pending(&self, op: &PendingOp) -> Result<()> {
        self.inner.enqueue_pending(op).await
    }

    async fn pending_ops(&self, limit: usize) -> Result<Vec<PendingOp>> {
        self.inner.pending_ops(limit).await
    }

    async fn resolve_pending(&self, id: &str) -> Result<()> {
        self.inner.resolve_pending(id).await
    }

    async fn record_pending_failure(&self, id: &str, error: &str) -> Result<()> {
        self.inner.record_pending_failure(id, error).await
    }
}

/// Migration target that writes to the collection while it re-embeds it:
/// once during the first pass and once while the resulting late arrival is
/// being embedded.
struct ArrivingWritesEmbedder {
    inner: HashingEmbedder,
    coordinator: OnceLock<Arc<IngestionCoordinator>>,
    wrote_during_pass: AtomicBool,
    wrote_during_catch_up: AtomicBool,
}

#[async_trait]
impl EmbeddingGateway for ArrivingWritesEmbedder {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        if let Some(coordinator) = self.coordinator.get() {
            if !self.wrote_during_pass.swap(true, Ordering::SeqCst) {
                coordinator
                    .upsert("docs", "late", chunks(&["late arrival text"]))
                    .await?;
            } else if texts.iter().any(|t| t.contains("late arrival"))
                && !self.wrote_during_catch_up.load(Ordering::SeqCst)
            {
                let write = coordinator.upsert("docs", "later", chunks(&["later arrival text"]));
                tokio::time::timeout(Duration::from_secs(2), write)
                    .await
                    .map_err(|_| Error::EmbeddingUnavailable("writer blocked".into()))??;
                self.wrote_during_catch_up.store(true, Ordering::SeqCst);
            }
        }
        self.inner.embed(texts).await
    }
}

// ─── Query pipeline ─────────────────────────────────────────────────

#[tokio::test]
async fn test_reingest_of_single_chunk_document() {
    let app = app_with(Backends::memory(), "");
    let first = app
        .coordinator
        .upsert("docs", "doc1", chunks(&["ML is AI subset"]))
        .await
        .unwrap();
    assert_eq!(first.written, 1);

    let ask = || QueryRequest::new("What is machine learning?", "docs");
    let answer = app.pipeline.answer(ask()).await.unwrap();
    assert!(!answer.degraded);
    assert!(!answer.cache_hit);
    assert_eq!(answer.evidence[0].source_id, "doc1");
    assert_eq!(answer.citations[0].source_id, "doc1");
    let original_chunk = answer.evidence[0].chunk_id.clone();

    assert!(app.pipeline.answer(ask()).await.unwrap().cache_hit);

    // Identical text: nothing written, generation unchanged, cache still valid.
    let again = app
        .coordinator
        .upsert("docs", "doc1", chunks(&["ML is AI subset"]))
        .await
        .unwrap();
    assert_eq!(again.written, 0);
    assert_eq!(again.skipped_unchanged, 1);
    assert_eq!(again.generation, first.generation);
    assert!(app.pipeline.answer(ask()).await.unwrap().cache_hit);

    // Changed text: chunk replaced, generation bumped, cached answer gone.
    let changed = app
        .coordinator
        .upsert("docs", "doc1", chunks(&["Machine learning is a subset of AI"]))
        .await
        .unwrap();
    assert_eq!(changed.written, 1);
    assert_eq!(changed.removed_stale, 1);
    assert!(changed.generation > first.generation);

    let fresh = app.pipeline.answer(ask()).await.unwrap();
    assert!(!fresh.cache_hit);
    assert_eq!(fresh.evidence.len(), 1);
    assert_ne!(fresh.evidence[0].chunk_id, original_chunk);
}

#[tokio::test]
async fn test_mutation_leaves_other_collection_cache_intact() {
    let app = app_with(Backends::memory(), "");
    app.coordinator
        .upsert("docs", "a", chunks(&["Rust ownership rules"]))
        .await
        .unwrap();
    app.coordinator
        .upsert("notes", "b", chunks(&["Kubernetes deployment notes"]))
        .await
        .unwrap();

    let notes = || QueryRequest::new("kubernetes deployment", "notes");
    assert!(!app.pipeline.answer(notes()).await.unwrap().cache_hit);
    assert!(app.pipeline.answer(notes()).await.unwrap().cache_hit);

    app.coordinator.delete_by_source("docs", "a").await.unwrap();
    assert!(app.pipeline.answer(notes()).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_vector_failure_degrades_to_keyword_only() {
    let vector = Arc::new(FlakyVectorIndex::default());
    let backends = Backends {
        vector: vector.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "[timeouts]\nretrieval_backoff_ms = 1\n");
    app.coordinator
        .upsert(
            "docs",
            "runbook",
            chunks(&["Restart the ingest worker after rotating credentials"]),
        )
        .await
        .unwrap();

    vector.fail_search.store(true, Ordering::SeqCst);
    let request = || QueryRequest::new("rotating credentials", "docs").with_strategy(Strategy::Hybrid);
    let answer = app.pipeline.answer(request()).await.unwrap();

    assert!(answer.degraded);
    assert!(answer
        .degradations
        .iter()
        .any(|d| matches!(d.stage, Stage::VectorRetrieval)));
    assert_eq!(answer.evidence.len(), 1);
    assert_eq!(answer.evidence[0].source_id, "runbook");

    // Degraded answers are not cached.
    assert!(!app.pipeline.answer(request()).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_empty_collection_answers_without_evidence() {
    let app = app_with(Backends::memory(), "");
    let answer = app
        .pipeline
        .answer(QueryRequest::new("anything at all", "empty"))
        .await
        .unwrap();
    assert!(answer.evidence.is_empty());
    assert!(answer.citations.is_empty());
    assert!(answer.low_confidence);
}

#[tokio::test]
async fn test_disabled_embeddings_force_keyword_retrieval() {
    let app = app_with(Backends::memory(), "[embedding]\nprovider = \"disabled\"\n");
    app.coordinator
        .upsert("docs", "faq", chunks(&["Backups run nightly at 02:00 UTC"]))
        .await
        .unwrap();

    let coll = app.backends.catalog.collection("docs").await.unwrap().unwrap();
    assert_eq!(coll.embedding_model_version, DISABLED_MODEL);

    let answer = app
        .pipeline
        .answer(QueryRequest::new("when do backups run", "docs"))
        .await
        .unwrap();
    assert!(!answer.plan.use_vector);
    assert_eq!(answer.evidence[0].source_id, "faq");

    let err = app
        .pipeline
        .answer(QueryRequest::new("backups", "docs").with_strategy(Strategy::Vector))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_cancelled_request_returns_cancelled() {
    let keyword = Arc::new(FlakyKeywordIndex::default());
    let backends = Backends {
        keyword: keyword.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "");
    app.coordinator
        .upsert("docs", "a", chunks(&["slow search target"]))
        .await
        .unwrap();
    keyword.slow_search.store(true, Ordering::SeqCst);

    let request = QueryRequest::new("slow search", "docs");
    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = app.pipeline.answer(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_request_deadline_fails_with_timeout() {
    let keyword = Arc::new(FlakyKeywordIndex::default());
    let backends = Backends {
        keyword: keyword.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "[timeouts]\nrequest_ms = 100\n");
    app.coordinator
        .upsert("docs", "a", chunks(&["deadline target"]))
        .await
        .unwrap();
    keyword.slow_search.store(true, Ordering::SeqCst);

    let err = app
        .pipeline
        .answer(QueryRequest::new("deadline", "docs"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_lone_weak_match_is_low_confidence() {
    let app = app_with(Backends::memory(), "");
    app.coordinator
        .upsert(
            "docs",
            "k8s",
            chunks(&["Kubernetes schedules containers across a cluster of nodes"]),
        )
        .await
        .unwrap();

    let weak = app
        .pipeline
        .answer(QueryRequest::new(
            "best ramen recipe with noodles broth eggs and kubernetes",
            "docs",
        ))
        .await
        .unwrap();
    assert!(!weak.degraded);
    assert_eq!(weak.evidence.len(), 1);
    assert!(weak.evidence[0].final_score < 1.0);
    assert!(weak.low_confidence, "confidence {}", weak.confidence);

    let strong = app
        .pipeline
        .answer(QueryRequest::new(
            "how does kubernetes schedule containers across nodes",
            "docs",
        ))
        .await
        .unwrap();
    assert!(!strong.low_confidence, "confidence {}", strong.confidence);
    assert!(strong.confidence > weak.confidence);
}

#[tokio::test]
async fn test_slow_branch_times_out_and_query_still_answers() {
    let keyword = Arc::new(FlakyKeywordIndex::default());
    let backends = Backends {
        keyword: keyword.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "[timeouts]\nretrieval_ms = 50\nrequest_ms = 10000\n");
    app.coordinator
        .upsert("docs", "runbook", chunks(&["Rotate credentials every quarter"]))
        .await
        .unwrap();
    keyword.slow_search.store(true, Ordering::SeqCst);

    let answer = app
        .pipeline
        .answer(QueryRequest::new("rotating credentials", "docs").with_strategy(Strategy::Hybrid))
        .await
        .unwrap();

    assert!(answer.degraded);
    let timed_out = answer
        .degradations
        .iter()
        .find(|d| d.stage == Stage::KeywordRetrieval)
        .unwrap();
    assert!(timed_out.reason.contains("timed out"), "{}", timed_out.reason);
    assert_eq!(answer.evidence.len(), 1);
    assert_eq!(answer.evidence[0].source_id, "runbook");
}

#[tokio::test]
async fn test_transient_catalog_failure_is_retried() {
    let catalog = Arc::new(FlakyCatalog::default());
    let backends = Backends {
        catalog: catalog.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "");
    app.coordinator
        .upsert("docs", "faq", chunks(&["Backups run nightly at 02:00 UTC"]))
        .await
        .unwrap();

    catalog.failing_collection.store(1, Ordering::SeqCst);
    catalog.failing_get_chunks.store(1, Ordering::SeqCst);
    let answer = app
        .pipeline
        .answer(QueryRequest::new("when do backups run", "docs"))
        .await
        .unwrap();

    assert!(!answer.degraded);
    assert_eq!(answer.evidence[0].source_id, "faq");
}

#[tokio::test]
async fn test_persistent_catalog_failure_degrades_to_empty_answer() {
    let catalog = Arc::new(FlakyCatalog::default());
    let backends = Backends {
        catalog: catalog.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "[timeouts]\nretrieval_backoff_ms = 1\n");
    app.coordinator
        .upsert("docs", "faq", chunks(&["Backups run nightly at 02:00 UTC"]))
        .await
        .unwrap();

    let request = || QueryRequest::new("when do backups run", "docs");

    catalog.failing_get_chunks.store(usize::MAX, Ordering::SeqCst);
    let answer = app.pipeline.answer(request()).await.unwrap();
    assert!(answer.degraded);
    assert!(answer.evidence.is_empty());
    assert!(answer.citations.is_empty());
    assert!(answer.low_confidence);
    assert!(answer.degradations.iter().any(|d| d.stage == Stage::Catalog));

    catalog.failing_get_chunks.store(0, Ordering::SeqCst);
    catalog.failing_collection.store(usize::MAX, Ordering::SeqCst);
    let answer = app.pipeline.answer(request()).await.unwrap();
    assert!(answer.degraded);
    assert!(answer.evidence.is_empty());
    assert_eq!(answer.degradations[0].stage, Stage::Catalog);

    // Neither degraded answer was cached.
    catalog.failing_collection.store(0, Ordering::SeqCst);
    let answer = app.pipeline.answer(request()).await.unwrap();
    assert!(!answer.cache_hit);
    assert!(!answer.degraded);
}

#[tokio::test]
async fn test_reingest_reclaims_previous_generation_cache_entries() {
    let kv = Arc::new(MemoryKv::new());
    let backends = Backends {
        kv: kv.clone(),
        ..Backends::memory()
    };
    let app = app_with(backends, "");
    app.coordinator
        .upsert("docs", "doc1", chunks(&["ML is AI subset"]))
        .await
        .unwrap();
    let generation = app
        .backends
        .catalog
        .collection("docs")
        .await
        .unwrap()
        .unwrap()
        .generation;

    app.pipeline
        .answer(QueryRequest::new("What is machine learning?", "docs"))
        .await
        .unwrap();
    let before = kv.len();

    app.coordinator
        .upsert("docs", "doc1", chunks(&["Machine learning is a subset of AI"]))
        .await
        .unwrap();

    // Answer and vector hits of the old generation are gone; rerank scores
    // are keyed by chunk, not generation, and stay.
    assert_eq!(kv.len(), before - 2);
    let namespace = CacheConfig::default().namespace;
    for kind in [CacheKind::Answer, CacheKind::VectorHits] {
        let prefix = collection_prefix(&namespace, kind, "docs", generation);
        assert_eq!(kv.delete_prefix(&prefix).await.unwrap(), 0);
    }
}

// ─── Ingestion coordinator ──────────────────────────────────────────

struct Fixture {
    catalog: Arc<MemoryCatalog>,
    keyword: Arc<FlakyKeywordIndex>,
    vector: Arc<FlakyVectorIndex>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            keyword: Arc::new(FlakyKeywordIndex::default()),
            vector: Arc::new(FlakyVectorIndex::default()),
        }
    }

    fn coordinator(&self, embedder: Arc<dyn EmbeddingGateway>, batch_size: usize) -> IngestionCoordinator {
        IngestionCoordinator::new(
            self.catalog.clone(),
            self.keyword.clone(),
            self.vector.clone(),
            Some(embedder),
            batch_size,
            fast_backoff(),
        )
    }
}

#[tokio::test]
async fn test_unchanged_reingest_makes_no_embedding_calls() {
    let fx = Fixture::new();
    let embedder = Arc::new(CountingEmbedder::new(32));
    let coordinator = fx.coordinator(embedder.clone(), 16);

    let texts = ["First paragraph.", "Second paragraph."];
    let first = coordinator.upsert("docs", "guide", chunks(&texts)).await.unwrap();
    assert_eq!(first.written, 2);
    assert_eq!(embedder.count(), 2);

    // Whitespace and case changes normalize to the same fingerprint.
    let again = coordinator
        .upsert("docs", "guide", chunks(&["first   PARAGRAPH.", "Second paragraph."]))
        .await
        .unwrap();
    assert_eq!(again.written, 0);
    assert_eq!(again.skipped_unchanged, 2);
    assert_eq!(again.generation, first.generation);
    assert_eq!(embedder.count(), 2);

    let edited = coordinator
        .upsert("docs", "guide", chunks(&["First paragraph.", "A rewritten second paragraph."]))
        .await
        .unwrap();
    assert_eq!(edited.written, 1);
    assert_eq!(edited.skipped_unchanged, 1);
    assert_eq!(edited.removed_stale, 1);
    assert_eq!(embedder.count(), 3);
    assert_eq!(fx.catalog.chunks_for_source("docs", "guide").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_chunks_within_source_are_written_once() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator(Arc::new(HashingEmbedder::new(16)), 16);
    let report = coordinator
        .upsert("docs", "dup", chunks(&["same text", "Same  text", "other text"]))
        .await
        .unwrap();
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn test_keyword_failure_rolls_back_vector_and_keeps_previous_version() {
    let fx = Fixture::new();
    let embedder = HashingEmbedder::new(16);
    let space = vector_space("docs", embedder.model_version());
    let coordinator = fx.coordinator(Arc::new(embedder), 16);

    coordinator
        .upsert("docs", "page", chunks(&["original text"]))
        .await
        .unwrap();

    fx.keyword.fail_index.store(true, Ordering::SeqCst);
    let report = coordinator
        .upsert("docs", "page", chunks(&["replacement text"]))
        .await
        .unwrap();
    assert!(report.is_partial());
    assert_eq!(report.written, 0);
    assert_eq!(report.removed_stale, 0);

    // The previous chunk survives and the new vector was rolled back.
    let live = fx.catalog.chunks_for_source("docs", "page").await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].text, "original text");
    assert_eq!(fx.vector.count(&space).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_index_delete_is_queued_and_retried() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator(Arc::new(HashingEmbedder::new(16)), 16);
    coordinator
        .upsert("docs", "old", chunks(&["to be removed", "also removed"]))
        .await
        .unwrap();

    fx.keyword.fail_delete.store(true, Ordering::SeqCst);
    let report = coordinator.delete_by_source("docs", "old").await.unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.pending_ops, 1);
    assert!(fx.catalog.chunks_for_source("docs", "old").await.unwrap().is_empty());

    // Still failing: recorded as another failed attempt.
    let retry = coordinator.retry_pending(10).await.unwrap();
    assert_eq!((retry.attempted, retry.resolved, retry.failed), (1, 0, 1));

    fx.keyword.fail_delete.store(false, Ordering::SeqCst);
    let retry = coordinator.retry_pending(10).await.unwrap();
    assert_eq!((retry.attempted, retry.resolved, retry.failed), (1, 1, 0));
    assert!(fx.catalog.pending_ops(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_empties_collection_and_bumps_generation() {
    let fx = Fixture::new();
    let embedder = HashingEmbedder::new(16);
    let space = vector_space("docs", embedder.model_version());
    let coordinator = fx.coordinator(Arc::new(embedder), 16);
    coordinator
        .upsert("docs", "a", chunks(&["one", "two"]))
        .await
        .unwrap();
    let before = fx.catalog.collection("docs").await.unwrap().unwrap().generation;

    assert_eq!(coordinator.reset_collection("docs").await.unwrap(), 2);
    let after = fx.catalog.collection("docs").await.unwrap().unwrap();
    assert!(after.generation > before);
    assert!(fx.catalog.all_chunks("docs").await.unwrap().is_empty());
    assert_eq!(fx.vector.count(&space).await.unwrap(), 0);
}

#[tokio::test]
async fn test_migration_dry_run_then_flip() {
    let fx = Fixture::new();
    let old = HashingEmbedder::new(16);
    let old_space = vector_space("docs", old.model_version());
    let coordinator = fx.coordinator(Arc::new(old), 16);
    coordinator
        .upsert("docs", "a", chunks(&["alpha chunk text", "beta chunk text", "gamma chunk text"]))
        .await
        .unwrap();
    let before = fx.catalog.collection("docs").await.unwrap().unwrap();

    let target: Arc<dyn EmbeddingGateway> = Arc::new(HashingEmbedder::new(32));
    let dry = coordinator
        .migrate_embeddings(
            "docs",
            target.clone(),
            MigrateOptions {
                dry_run: true,
                force: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(dry.total, 3);
    assert!(dry.estimated_tokens > 0);
    assert!(!dry.flipped);
    let unchanged = fx.catalog.collection("docs").await.unwrap().unwrap();
    assert_eq!(unchanged.embedding_model_version, before.embedding_model_version);
    assert_eq!(unchanged.generation, before.generation);

    let report = coordinator
        .migrate_embeddings("docs", target, MigrateOptions::default())
        .await
        .unwrap();
    assert!(report.flipped);
    assert_eq!(report.migrated, 3);

    let coll = fx.catalog.collection("docs").await.unwrap().unwrap();
    assert_eq!(coll.embedding_model_version, "hashing-32");
    assert!(coll.generation > before.generation);
    assert_eq!(fx.vector.count("docs@hashing-32").await.unwrap(), 3);
    assert_eq!(fx.vector.count(&old_space).await.unwrap(), 0);

    // The old model can no longer write into the collection.
    let err = coordinator
        .upsert("docs", "b", chunks(&["late arrival"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_migration_embeds_late_arrivals_without_blocking_writers() {
    let fx = Fixture::new();
    let coordinator = Arc::new(fx.coordinator(Arc::new(HashingEmbedder::new(16)), 16));
    coordinator
        .upsert("docs", "a", chunks(&["alpha chunk text"]))
        .await
        .unwrap();

    let target = Arc::new(ArrivingWritesEmbedder {
        inner: HashingEmbedder::new(32),
        coordinator: OnceLock::new(),
        wrote_during_pass: AtomicBool::new(false),
        wrote_during_catch_up: AtomicBool::new(false),
    });
    assert!(target.coordinator.set(coordinator.clone()).is_ok());

    let report = coordinator
        .migrate_embeddings("docs", target.clone(), MigrateOptions::default())
        .await
        .unwrap();

    assert!(target.wrote_during_catch_up.load(Ordering::SeqCst));
    assert!(report.flipped);
    assert_eq!(report.failed, 0);
    assert_eq!(report.total, 3);
    assert_eq!(report.migrated, 3);
    assert_eq!(fx.vector.count("docs@hashing-32").await.unwrap(), 3);
}

#[tokio::test]
async fn test_partial_migration_requires_force() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator(Arc::new(HashingEmbedder::new(16)), 1);
    coordinator
        .upsert("docs", "a", chunks(&["alpha text", "beta text", "gamma text"]))
        .await
        .unwrap();

    let target: Arc<dyn EmbeddingGateway> = Arc::new(PoisonedEmbedder {
        inner: HashingEmbedder::new(32),
        poison: "beta",
    });

    let refused = coordinator
        .migrate_embeddings("docs", target.clone(), MigrateOptions::default())
        .await
        .unwrap();
    assert!(!refused.flipped);
    assert_eq!(refused.failed, 1);
    assert_eq!(fx.vector.count("docs@hashing-32").await.unwrap(), 0);
    let coll = fx.catalog.collection("docs").await.unwrap().unwrap();
    assert_eq!(coll.embedding_model_version, "hashing-16");

    let forced = coordinator
        .migrate_embeddings(
            "docs",
            target,
            MigrateOptions {
                dry_run: false,
                force: true,
            },
        )
        .await
        .unwrap();
    assert!(forced.flipped);
    assert!(forced.forced);
    assert_eq!(forced.migrated, 2);
    assert_eq!(forced.failed, 1);
    assert_eq!(fx.vector.count("docs@hashing-32").await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_upserts_of_same_source_converge() {
    let fx = Fixture::new();
    let coordinator = Arc::new(fx.coordinator(Arc::new(HashingEmbedder::new(16)), 4));

    let mut handles = Vec::new();
    for i in 0..8 {
        let c = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let text = format!("revision {}", i % 2);
            c.upsert("docs", "shared", chunks(&[text.as_str()])).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    // Serialized writers leave exactly one live revision.
    let live = fx.catalog.chunks_for_source("docs", "shared").await.unwrap();
    assert_eq!(live.len(), 1);
    let space = vector_space("docs", "hashing-16");
    assert_eq!(fx.vector.count(&space).await.unwrap(), 1);
}
