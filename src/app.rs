//! Wiring and command runners for the `gw` binary.
//!
//! [`App::open`] builds every component from configuration once; the
//! `run_*` functions implement the CLI commands and print human-readable
//! output (or JSON where requested).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use groundwork_core::planner::Strategy;

use crate::backends::{self, Backends};
use crate::cache::CacheLayer;
use crate::chunk::chunk_text;
use crate::composer::create_composer;
use crate::config::{Config, EmbeddingConfig};
use crate::embedding::create_gateway;
use crate::ingest::{IngestionCoordinator, MigrateOptions};
use crate::pipeline::{QueryPipeline, QueryRequest};
use crate::rerank::{create_scorer, Reranker};
use crate::retry::Backoff;
use crate::scan::scan_path;
use crate::stats;

/// Every long-lived component, built from one config.
pub struct App {
    pub config: Config,
    pub backends: Backends,
    pub cache: Arc<CacheLayer>,
    pub coordinator: IngestionCoordinator,
    pub pipeline: QueryPipeline,
}

impl App {
    pub async fn open(config: Config) -> Result<Self> {
        let backends = backends::open(&config).await?;
        Self::with_backends(config, backends)
    }

    /// Build the app over already-opened backends.
    pub fn with_backends(config: Config, backends: Backends) -> Result<Self> {
        let embedder = create_gateway(&config.embedding)?;
        let cache = Arc::new(CacheLayer::new(
            backends.kv.clone(),
            backends.catalog.clone(),
            config.cache.clone(),
        ));

        let rerank_timeout = Duration::from_millis(config.timeouts.rerank_ms);
        let reranker = Reranker::new(
            create_scorer(&config.rerank, rerank_timeout)?,
            cache.clone(),
            &config.rerank,
            rerank_timeout,
        );
        let composer = create_composer(
            &config.composer,
            Duration::from_millis(config.timeouts.compose_ms),
        )?;

        let coordinator = IngestionCoordinator::new(
            backends.catalog.clone(),
            backends.keyword.clone(),
            backends.vector.clone(),
            embedder.clone(),
            config.ingest.batch_size,
            Backoff::new(config.ingest.max_retries, config.ingest.backoff_base_ms),
        )
        .with_cache(cache.clone());
        let pipeline = QueryPipeline::new(&backends, embedder, cache.clone(), reranker, composer, &config);

        Ok(Self {
            config,
            backends,
            cache,
            coordinator,
            pipeline,
        })
    }

    fn collection<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.config.ingest.collection)
    }
}

/// `gw ingest`: chunk every document under `path` and upsert it.
pub async fn run_ingest(
    app: &App,
    path: &Path,
    source_id: Option<String>,
    collection: Option<&str>,
) -> Result<()> {
    let collection = app.collection(collection);
    let mut docs = scan_path(path, &app.config.ingest)?;
    if let Some(id) = source_id {
        if docs.len() != 1 {
            bail!("--source-id applies to a single file, but {} documents were found", docs.len());
        }
        docs[0].source_id = id;
    }

    let (mut written, mut skipped, mut removed, mut partial) = (0, 0, 0, 0);
    for doc in &docs {
        let chunks = chunk_text(&doc.body, app.config.chunking.max_tokens);
        let report = app
            .coordinator
            .upsert(collection, &doc.source_id, chunks)
            .await?;
        written += report.written;
        skipped += report.skipped_unchanged;
        removed += report.removed_stale;
        if report.is_partial() {
            partial += 1;
            println!(
                "  partial: {} ({} chunk(s) failed)",
                report.source_id,
                report.failed_chunk_ids.len()
            );
        }
    }

    println!("ingest {} → {}", path.display(), collection);
    println!("  documents:        {}", docs.len());
    println!("  chunks written:   {}", written);
    println!("  chunks unchanged: {}", skipped);
    println!("  chunks removed:   {}", removed);
    if partial > 0 {
        println!("  partial failures: {}", partial);
    }
    Ok(())
}

/// `gw delete`: remove one source from a collection.
pub async fn run_delete(app: &App, source_id: &str, collection: Option<&str>) -> Result<()> {
    let report = app
        .coordinator
        .delete_by_source(app.collection(collection), source_id)
        .await?;
    println!(
        "deleted {} chunk(s) of {} from {} (generation {})",
        report.removed, report.source_id, report.collection, report.generation
    );
    if report.pending_ops > 0 {
        println!(
            "  {} index delete(s) queued for retry. Run `gw retry-pending`.",
            report.pending_ops
        );
    }
    Ok(())
}

/// `gw reset`: empty a collection.
pub async fn run_reset(app: &App, collection: Option<&str>) -> Result<()> {
    let collection = app.collection(collection);
    let removed = app.coordinator.reset_collection(collection).await?;
    println!("reset {}: {} chunk(s) removed", collection, removed);
    Ok(())
}

/// `gw query`: answer a question.
pub async fn run_query(
    app: &App,
    question: &str,
    collection: Option<&str>,
    strategy: Option<&str>,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut request = QueryRequest::new(question, app.collection(collection));
    if let Some(s) = strategy {
        request = request.with_strategy(s.parse::<Strategy>()?);
    }
    if let Some(k) = top_k {
        request = request.with_top_k(k);
    }

    let cancel: CancellationToken = request.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = match app.pipeline.answer(request).await {
        Ok(r) => r,
        Err(e) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&e.to_response())?);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.answer_text);
    println!();
    for c in &result.citations {
        let marker = result
            .evidence
            .iter()
            .position(|e| e.chunk_id == c.chunk_id)
            .map(|p| p + 1)
            .unwrap_or(0);
        println!("  [{}] {} ({})", marker, c.source_id, c.chunk_id);
    }
    println!();
    println!(
        "confidence: {:.2}{}{}",
        result.confidence,
        if result.low_confidence { " (low)" } else { "" },
        if result.cache_hit { " [cached]" } else { "" }
    );
    for d in &result.degradations {
        println!("degraded: {:?}: {}", d.stage, d.reason);
    }
    Ok(())
}

/// `gw migrate`: re-embed a collection under `model`.
pub async fn run_migrate(
    app: &App,
    model: &str,
    collection: Option<&str>,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let collection = app.collection(collection);
    let target = EmbeddingConfig {
        model: Some(model.to_string()),
        ..app.config.embedding.clone()
    };
    let Some(gateway) = create_gateway(&target)? else {
        bail!("cannot migrate to a disabled embedding provider");
    };

    let report = app
        .coordinator
        .migrate_embeddings(collection, gateway, MigrateOptions { dry_run, force })
        .await?;

    println!(
        "migrate {}: {} → {}{}",
        report.collection,
        report.from_version,
        report.to_version,
        if report.dry_run { " (dry-run)" } else { "" }
    );
    println!("  chunks:           {}", report.total);
    println!("  estimated tokens: {}", report.estimated_tokens);
    if !report.dry_run {
        println!("  migrated:         {}", report.migrated);
        println!("  failed:           {}", report.failed);
        if report.flipped {
            println!("  active version is now {}", report.to_version);
        } else {
            println!("  active version unchanged (use --force to accept partial coverage)");
        }
    }
    Ok(())
}

/// `gw retry-pending`: drain the compensation queue.
pub async fn run_retry_pending(app: &App, limit: usize) -> Result<()> {
    let report = app.coordinator.retry_pending(limit).await?;
    println!(
        "pending ops: {} attempted, {} resolved, {} still failing",
        report.attempted, report.resolved, report.failed
    );
    Ok(())
}

/// `gw stats`.
pub async fn run_stats(app: &App) -> Result<()> {
    stats::run_stats(&app.backends).await
}
