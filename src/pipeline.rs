//! Query pipeline.
//!
//! ```text
//! validate → plan → answer cache ─hit──────────────────────────────▶ result
//!                         │miss
//!                         ▼
//!          keyword branch ∥ vector branch (vector-hit cache)
//!                         ▼
//!                fuse → load chunks → rerank → confidence
//!                         ▼
//!              compose → confidence over used citations → result
//! ```
//!
//! Each retrieval branch runs under `timeouts.retrieval_ms`. A branch that
//! fails or times out contributes no candidates and is recorded as a
//! [`Degradation`]; the request still answers. Catalog lookups are retried
//! with backoff and, if they keep failing, leave the answer without
//! evidence. Reranking and composition degrade the same way. Only
//! validation errors, cancellation, and the overall request deadline fail a
//! request.
//!
//! Cache writes are staged while the request runs and flushed only after
//! it completes. A cancelled or timed-out request writes nothing, and a
//! degraded answer is never cached.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use groundwork_core::cache_key::CacheKind;
use groundwork_core::catalog::Catalog;
use groundwork_core::composer::{AnswerComposer, EvidencePassage, ExtractiveComposer};
use groundwork_core::confidence::{self, ConfidenceConfig};
use groundwork_core::embedding::EmbeddingGateway;
use groundwork_core::fusion::fuse;
use groundwork_core::index::{vector_space, KeywordIndex, VectorIndex};
use groundwork_core::models::{
    validate_collection_name, AnswerResult, Citation, Degradation, RerankedCandidate,
    RetrievalCandidate, Stage,
};
use groundwork_core::planner::{self, PlannerConfig, RetrievalPlan, Strategy};
use groundwork_core::{Error, Result};

use crate::backends::Backends;
use crate::cache::{CacheLayer, PendingWrites};
use crate::config::{Config, FusionConfig, TimeoutsConfig};
use crate::ingest::DISABLED_MODEL;
use crate::rerank::Reranker;
use crate::retry::{with_backoff, Backoff};

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 4096;

/// A question against one collection.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub collection: String,
    pub strategy: Option<Strategy>,
    /// Evidence passages to keep; defaults to `fusion.final_limit`.
    pub top_k: Option<usize>,
    pub cancel: CancellationToken,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            strategy: None,
            top_k: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        if self.query.chars().count() > MAX_QUERY_CHARS {
            return Err(Error::Validation(format!(
                "query exceeds {} characters",
                MAX_QUERY_CHARS
            )));
        }
        if self.top_k == Some(0) {
            return Err(Error::Validation("top_k must be at least 1".into()));
        }
        validate_collection_name(&self.collection)
    }
}

/// Collection state a request is answered against.
struct Snapshot {
    generation: u64,
    model_version: String,
}

pub struct QueryPipeline {
    catalog: Arc<dyn Catalog>,
    keyword: Arc<dyn KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn EmbeddingGateway>>,
    cache: Arc<CacheLayer>,
    reranker: Reranker,
    composer: Arc<dyn AnswerComposer>,
    planner: PlannerConfig,
    fusion: FusionConfig,
    confidence: ConfidenceConfig,
    timeouts: TimeoutsConfig,
}

impl QueryPipeline {
    pub fn new(
        backends: &Backends,
        embedder: Option<Arc<dyn EmbeddingGateway>>,
        cache: Arc<CacheLayer>,
        reranker: Reranker,
        composer: Arc<dyn AnswerComposer>,
        config: &Config,
    ) -> Self {
        Self {
            catalog: backends.catalog.clone(),
            keyword: backends.keyword.clone(),
            vector: backends.vector.clone(),
            embedder,
            cache,
            reranker,
            composer,
            planner: config.planner.clone(),
            fusion: config.fusion.clone(),
            confidence: config.confidence.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Answer `request`, or fail with a validation, cancellation, or
    /// deadline error.
    pub async fn answer(&self, request: QueryRequest) -> Result<AnswerResult> {
        request.validate()?;

        let deadline = Duration::from_millis(self.timeouts.request_ms);
        let cancel = request.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout(deadline, self.run(&request)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout {
                    stage: "request".into(),
                    elapsed_ms: self.timeouts.request_ms,
                }),
            },
        };

        match outcome {
            Ok((result, writes)) => {
                self.cache.flush(writes).await;
                Ok(result)
            }
            Err(e) => {
                warn!(collection = %request.collection, kind = %e.kind(), error = %e, "query failed");
                Err(e)
            }
        }
    }

    async fn snapshot(&self, collection: &str) -> Result<Snapshot> {
        Ok(match self.catalog.collection(collection).await? {
            Some(c) => Snapshot {
                generation: c.generation,
                model_version: c.embedding_model_version,
            },
            None => Snapshot {
                generation: 0,
                model_version: self
                    .embedder
                    .as_ref()
                    .map(|e| e.model_version().to_string())
                    .unwrap_or_else(|| DISABLED_MODEL.to_string()),
            },
        })
    }

    fn plan(&self, request: &QueryRequest) -> Result<RetrievalPlan> {
        let strategy = match (&self.embedder, request.strategy) {
            (None, Some(Strategy::Vector)) => {
                return Err(Error::Validation(
                    "vector strategy requires an embedding provider".into(),
                ))
            }
            (None, _) => Some(Strategy::Keyword),
            (Some(_), s) => s,
        };
        Ok(planner::plan(&request.query, &self.planner, strategy))
    }

    async fn run(&self, request: &QueryRequest) -> Result<(AnswerResult, PendingWrites)> {
        let collection = request.collection.as_str();
        let query = request.query.trim();
        let top_k = request.top_k.unwrap_or(self.fusion.final_limit);
        let plan = self.plan(request)?;
        let mut writes = PendingWrites::new();

        let snapshot = match with_backoff(self.retrieval_backoff(), "collection lookup", || {
            self.snapshot(collection)
        })
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(collection, error = %e, "collection lookup failed; answering without evidence");
                let degradation = Degradation {
                    stage: Stage::Catalog,
                    reason: e.to_string(),
                };
                return Ok((self.without_evidence(query, plan, degradation).await?, writes));
            }
        };

        let params = json!({
            "plan": plan,
            "top_k": top_k,
            "budget": self.fusion.candidate_budget,
            "reranker": self.reranker.model_version(),
            "composer": self.composer.model_version(),
        })
        .to_string();
        let answer_key = self.cache.collection_key(
            CacheKind::Answer,
            collection,
            snapshot.generation,
            &snapshot.model_version,
            query,
            &params,
        );
        if let Some(mut cached) = self
            .cache
            .get::<AnswerResult>(&answer_key, snapshot.generation)
            .await
        {
            debug!(collection, generation = snapshot.generation, "answer cache hit");
            cached.cache_hit = true;
            return Ok((cached, writes));
        }

        let mut degradations: Vec<Degradation> = Vec::new();

        // Retrieval
        let keyword_query = if plan.expand_query {
            let terms = planner::expansion_terms(query, &self.planner);
            if terms.is_empty() {
                query.to_string()
            } else {
                format!("{} {}", query, terms.join(" "))
            }
        } else {
            query.to_string()
        };

        let keyword_branch = async {
            if !plan.use_keyword {
                return Ok(Vec::new());
            }
            self.within(Stage::KeywordRetrieval, self.keyword_search(collection, &keyword_query))
                .await
        };
        let vector_branch = async {
            if !plan.use_vector {
                return Ok((Vec::new(), None));
            }
            self.within(Stage::VectorRetrieval, self.vector_search(collection, query, &snapshot))
                .await
        };
        let (keyword_hits, vector_hits) = tokio::join!(keyword_branch, vector_branch);

        let keyword_hits = keyword_hits.unwrap_or_else(|d| {
            degradations.push(d);
            Vec::new()
        });
        let vector_hits = match vector_hits {
            Ok((hits, staged)) => {
                if let Some((key, value)) = staged {
                    writes.stage(
                        key,
                        &value,
                        self.cache.ttl(CacheKind::VectorHits),
                        snapshot.generation,
                    );
                }
                hits
            }
            Err(d) => {
                degradations.push(d);
                Vec::new()
            }
        };

        // Fusion
        let mut fused = fuse(
            &keyword_hits,
            &vector_hits,
            plan.keyword_weight,
            plan.vector_weight,
            self.fusion.candidate_budget,
        );

        let ids: Vec<String> = fused.iter().map(|f| f.chunk_id.clone()).collect();
        let chunks = match with_backoff(self.retrieval_backoff(), "chunk lookup", || {
            self.catalog.get_chunks(collection, &ids)
        })
        .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(collection, error = %e, "chunk lookup failed; answering without evidence");
                degradations.push(Degradation {
                    stage: Stage::Catalog,
                    reason: e.to_string(),
                });
                fused.clear();
                Vec::new()
            }
        };
        let texts: HashMap<String, String> = chunks
            .iter()
            .map(|c| (c.chunk_id.clone(), c.text.clone()))
            .collect();
        let source_ids: HashMap<String, String> = chunks
            .iter()
            .map(|c| (c.chunk_id.clone(), c.source_id.clone()))
            .collect();
        let fused: Vec<_> = fused
            .into_iter()
            .filter(|f| {
                let live = texts.contains_key(&f.chunk_id);
                if !live {
                    debug!(collection, chunk_id = %f.chunk_id, "dropping index entry without catalog record");
                }
                live
            })
            .collect();

        // Rerank
        let outcome = self
            .reranker
            .rerank(
                query,
                &fused,
                plan.keyword_weight + plan.vector_weight,
                &texts,
                &source_ids,
                &mut writes,
                &request.cancel,
            )
            .await?;
        if let Some(d) = outcome.degradation {
            degradations.push(d);
        }
        let mut evidence = outcome.candidates;
        evidence.truncate(top_k);

        // Compose
        let passages: Vec<EvidencePassage> = evidence
            .iter()
            .map(|e| EvidencePassage {
                chunk_id: e.chunk_id.clone(),
                source_id: e.source_id.clone(),
                text: texts.get(&e.chunk_id).cloned().unwrap_or_default(),
                final_score: e.final_score,
            })
            .collect();

        let compose_budget = Duration::from_millis(self.timeouts.compose_ms);
        let composed = match tokio::time::timeout(
            compose_budget,
            self.composer.compose(query, &passages),
        )
        .await
        {
            Ok(Ok(c)) => c,
            failure => {
                let reason = match failure {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("timed out after {} ms", self.timeouts.compose_ms),
                };
                warn!(collection, reason = %reason, "composer failed; falling back to extractive answer");
                degradations.push(Degradation {
                    stage: Stage::Compose,
                    reason,
                });
                ExtractiveComposer::default().compose(query, &passages).await?
            }
        };

        let used = used_evidence(&evidence, &composed.used_citations);
        let confidence = confidence::score(&used, degradations.len(), &self.confidence);
        let low_confidence = confidence::is_low(confidence, &self.confidence);

        let result = AnswerResult {
            answer_text: composed.answer_text,
            citations: composed.used_citations,
            confidence,
            low_confidence,
            evidence,
            degraded: !degradations.is_empty(),
            degradations,
            plan,
            cache_hit: false,
        };

        if result.degraded {
            warn!(
                collection,
                degradations = result.degradations.len(),
                confidence,
                "answered with degraded evidence"
            );
        } else {
            writes.stage(
                answer_key,
                &result,
                self.cache.ttl(CacheKind::Answer),
                snapshot.generation,
            );
        }
        info!(
            collection,
            generation = snapshot.generation,
            evidence = result.evidence.len(),
            confidence,
            "query answered"
        );
        Ok((result, writes))
    }

    /// Degraded, uncached answer for a request that could not read the
    /// collection.
    async fn without_evidence(
        &self,
        query: &str,
        plan: RetrievalPlan,
        degradation: Degradation,
    ) -> Result<AnswerResult> {
        let composed = ExtractiveComposer::default().compose(query, &[]).await?;
        let confidence = confidence::score(&[], 1, &self.confidence);
        Ok(AnswerResult {
            answer_text: composed.answer_text,
            citations: composed.used_citations,
            confidence,
            low_confidence: confidence::is_low(confidence, &self.confidence),
            evidence: Vec::new(),
            degraded: true,
            degradations: vec![degradation],
            plan,
            cache_hit: false,
        })
    }

    /// Run a retrieval branch with local retries under the retrieval budget.
    async fn within<T, Fut>(&self, stage: Stage, branch: Fut) -> std::result::Result<T, Degradation>
    where
        Fut: Future<Output = Result<T>>,
    {
        let budget = Duration::from_millis(self.timeouts.retrieval_ms);
        match tokio::time::timeout(budget, branch).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                warn!(?stage, error = %e, "retrieval branch failed");
                Err(Degradation {
                    stage,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(?stage, timeout_ms = self.timeouts.retrieval_ms, "retrieval branch timed out");
                Err(Degradation {
                    stage,
                    reason: format!("timed out after {} ms", self.timeouts.retrieval_ms),
                })
            }
        }
    }

    fn retrieval_backoff(&self) -> Backoff {
        Backoff::new(self.timeouts.retrieval_retries, self.timeouts.retrieval_backoff_ms)
    }

    async fn keyword_search(&self, collection: &str, query: &str) -> Result<Vec<RetrievalCandidate>> {
        with_backoff(self.retrieval_backoff(), "keyword search", || {
            self.keyword
                .search(collection, query, self.fusion.candidate_k_keyword)
        })
        .await
    }

    /// Vector hits plus a cache entry to stage when they were computed fresh.
    async fn vector_search(
        &self,
        collection: &str,
        query: &str,
        snapshot: &Snapshot,
    ) -> Result<(Vec<RetrievalCandidate>, Option<(String, Vec<RetrievalCandidate>)>)> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| Error::Validation("no embedding provider configured".into()))?;
        if embedder.model_version() != snapshot.model_version {
            return Err(Error::EmbeddingRejected(format!(
                "query model '{}' does not match collection model '{}'",
                embedder.model_version(),
                snapshot.model_version
            )));
        }

        let top_n = self.fusion.candidate_k_vector;
        let key = self.cache.collection_key(
            CacheKind::VectorHits,
            collection,
            snapshot.generation,
            &snapshot.model_version,
            query,
            &json!({ "top_n": top_n }).to_string(),
        );
        if let Some(hits) = self
            .cache
            .get::<Vec<RetrievalCandidate>>(&key, snapshot.generation)
            .await
        {
            return Ok((hits, None));
        }

        let embedded = embedder.embed(&[query.to_string()]).await?;
        let vector = embedded
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingRejected("no vector returned for query".into()))?;
        let space = vector_space(collection, &snapshot.model_version);
        let hits = with_backoff(self.retrieval_backoff(), "vector search", || {
            self.vector.search(&space, &vector, top_n)
        })
        .await?;
        Ok((hits.clone(), Some((key, hits))))
    }
}

/// Evidence entries the composer actually cited, in evidence order.
fn used_evidence(evidence: &[RerankedCandidate], citations: &[Citation]) -> Vec<RerankedCandidate> {
    let cited: HashSet<&str> = citations.iter().map(|c| c.chunk_id.as_str()).collect();
    evidence
        .iter()
        .filter(|e| cited.contains(e.chunk_id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64) -> RerankedCandidate {
        RerankedCandidate {
            chunk_id: id.into(),
            source_id: format!("src-{}", id),
            rerank_score: Some(score),
            fused_score: score,
            final_score: score,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(QueryRequest::new("what is ml", "docs").validate().is_ok());
        assert!(QueryRequest::new("   ", "docs").validate().is_err());
        assert!(QueryRequest::new("q", "bad name").validate().is_err());
        assert!(QueryRequest::new("x".repeat(MAX_QUERY_CHARS + 1), "docs")
            .validate()
            .is_err());
        assert!(QueryRequest::new("q", "docs").with_top_k(0).validate().is_err());
    }

    #[test]
    fn test_used_evidence_keeps_evidence_order() {
        let evidence = vec![candidate("a", 0.9), candidate("b", 0.5), candidate("c", 0.2)];
        let citations = vec![
            Citation {
                chunk_id: "c".into(),
                source_id: "src-c".into(),
            },
            Citation {
                chunk_id: "a".into(),
                source_id: "src-a".into(),
            },
        ];
        let used = used_evidence(&evidence, &citations);
        let ids: Vec<&str> = used.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
