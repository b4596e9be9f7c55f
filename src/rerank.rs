//! Rerank stage: cached, batched relevance scoring with graceful fallback.
//!
//! Scores are cached per `(normalized query, chunk id, scorer model)`; a hit
//! skips the scorer entirely. Misses are sent to the scorer in batches of
//! `batch_size` under one stage deadline. A batch that fails, or every
//! batch left when the deadline passes, falls back to fused scores and the
//! stage is reported as degraded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use groundwork_core::cache_key::CacheKind;
use groundwork_core::models::{Degradation, FusedCandidate, RerankedCandidate, Stage};
use groundwork_core::rerank::{blend, LexicalOverlapScorer, Passage, RelevanceScorer};
use groundwork_core::{Error, Result};

use crate::cache::{CacheLayer, PendingWrites, UNVERSIONED};
use crate::config::RerankConfig;

/// Reranked candidates plus any degradation incurred.
#[derive(Debug)]
pub struct RerankOutcome {
    pub candidates: Vec<RerankedCandidate>,
    pub degradation: Option<Degradation>,
    /// Scores served from the cache.
    pub cache_hits: usize,
}

pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    cache: Arc<CacheLayer>,
    enabled: bool,
    weight: f64,
    batch_size: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(
        scorer: Arc<dyn RelevanceScorer>,
        cache: Arc<CacheLayer>,
        config: &RerankConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            cache,
            enabled: config.enabled,
            weight: config.rerank_weight,
            batch_size: config.batch_size.max(1),
            timeout,
        }
    }

    pub fn model_version(&self) -> &str {
        self.scorer.model_version()
    }

    /// Rerank `fused` against `query`.
    ///
    /// `texts` and `source_ids` are keyed by chunk id. `fused_ceiling` is the
    /// largest fused score the plan allows. New scores are staged in
    /// `writes`. Only cancellation is returned as an error.
    #[allow(clippy::too_many_arguments)]
    pub async fn rerank(
        &self,
        query: &str,
        fused: &[FusedCandidate],
        fused_ceiling: f64,
        texts: &HashMap<String, String>,
        source_ids: &HashMap<String, String>,
        writes: &mut PendingWrites,
        cancel: &CancellationToken,
    ) -> Result<RerankOutcome> {
        if !self.enabled || fused.is_empty() {
            return Ok(RerankOutcome {
                candidates: blend(fused, &HashMap::new(), source_ids, self.weight, fused_ceiling),
                degradation: None,
                cache_hits: 0,
            });
        }

        let model = self.scorer.model_version().to_string();
        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut misses: Vec<Passage> = Vec::new();

        for candidate in fused {
            let key = self.cache.rerank_key(query, &candidate.chunk_id, &model);
            match self.cache.get::<f64>(&key, UNVERSIONED).await {
                Some(score) => {
                    scores.insert(candidate.chunk_id.clone(), score);
                }
                None => misses.push(Passage {
                    chunk_id: candidate.chunk_id.clone(),
                    text: texts.get(&candidate.chunk_id).cloned().unwrap_or_default(),
                }),
            }
        }
        let cache_hits = scores.len();

        let mut failures: Vec<String> = Vec::new();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let ttl = self.cache.ttl(CacheKind::Rerank);

        for (i, batch) in misses.chunks(self.batch_size).enumerate() {
            let call = tokio::time::timeout_at(deadline, self.scorer.score(query, batch));
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = call => r,
            };

            match result {
                Ok(Ok(batch_scores)) => {
                    for (passage, score) in batch.iter().zip(batch_scores) {
                        match score {
                            Some(s) if s.is_finite() => {
                                let key = self.cache.rerank_key(query, &passage.chunk_id, &model);
                                writes.stage(key, &s, ttl, UNVERSIONED);
                                scores.insert(passage.chunk_id.clone(), s);
                            }
                            _ => failures.push(format!("{} unscored", passage.chunk_id)),
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(batch = i, size = batch.len(), error = %e, "rerank batch failed");
                    failures.push(e.to_string());
                }
                Err(_) => {
                    let remaining = misses.len() - i * self.batch_size;
                    warn!(remaining, timeout_ms = self.timeout.as_millis() as u64, "rerank timed out");
                    failures.push(format!(
                        "timed out after {} ms; {} candidates kept fused scores",
                        self.timeout.as_millis(),
                        remaining
                    ));
                    break;
                }
            }
        }

        debug!(
            candidates = fused.len(),
            cache_hits,
            scored = scores.len(),
            "rerank complete"
        );

        let degradation = if failures.is_empty() {
            None
        } else {
            Some(Degradation {
                stage: Stage::Rerank,
                reason: failures.join("; "),
            })
        };

        Ok(RerankOutcome {
            candidates: blend(fused, &scores, source_ids, self.weight, fused_ceiling),
            degradation,
            cache_hits,
        })
    }
}

// ============ HTTP scorer ============

/// Cross-encoder behind a `POST {url}/rerank` endpoint.
///
/// Request: `{"model", "query", "documents": [..]}`.
/// Response: `{"results": [{"index", "relevance_score"}]}`; documents
/// missing from the results are left unscored.
pub struct HttpScorer {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpScorer {
    pub fn new(url: &str, model: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| "http".to_string()),
        })
    }
}

fn parse_rerank_response(json: &serde_json::Value, count: usize) -> Result<Vec<Option<f64>>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| Error::backend("rerank", "response missing results array"))?;

    let mut scores = vec![None; count];
    for item in results {
        let index = item.get("index").and_then(|i| i.as_u64()).map(|i| i as usize);
        let score = item.get("relevance_score").and_then(|s| s.as_f64());
        if let (Some(index), Some(score)) = (index, score) {
            if index < count {
                scores[index] = Some(score);
            }
        }
    }
    Ok(scores)
}

#[async_trait]
impl RelevanceScorer for HttpScorer {
    fn model_version(&self) -> &str {
        &self.model
    }

    async fn score(&self, query: &str, passages: &[Passage]) -> Result<Vec<Option<f64>>> {
        let documents: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });

        let response = self
            .client
            .post(format!("{}/rerank", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend("rerank", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend("rerank", format!("HTTP {}: {}", status, text)));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| Error::backend("rerank", e))?;
        parse_rerank_response(&json, passages.len())
    }
}

/// Build the configured relevance scorer.
pub fn create_scorer(config: &RerankConfig, timeout: Duration) -> anyhow::Result<Arc<dyn RelevanceScorer>> {
    match config.scorer.as_str() {
        "lexical" => Ok(Arc::new(LexicalOverlapScorer)),
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| Error::FatalConfig("rerank.url is required for the http scorer".into()))?;
            Ok(Arc::new(HttpScorer::new(url, config.model.clone(), timeout)?))
        }
        other => Err(Error::FatalConfig(format!("unknown rerank scorer: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundwork_core::catalog::memory::MemoryCatalog;
    use groundwork_core::kv::MemoryKv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::CacheConfig;

    /// Scores by passage length; fails for any passage containing "boom".
    struct LengthScorer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelevanceScorer for LengthScorer {
        fn model_version(&self) -> &str {
            "length"
        }
        async fn score(&self, _query: &str, passages: &[Passage]) -> Result<Vec<Option<f64>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if passages.iter().any(|p| p.text.contains("boom")) {
                return Err(Error::backend("rerank", "boom"));
            }
            Ok(passages
                .iter()
                .map(|p| Some((p.text.len() as f64 / 100.0).min(1.0)))
                .collect())
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl RelevanceScorer for SlowScorer {
        fn model_version(&self) -> &str {
            "slow"
        }
        async fn score(&self, _query: &str, passages: &[Passage]) -> Result<Vec<Option<f64>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![Some(1.0); passages.len()])
        }
    }

    fn fused(ids: &[&str]) -> Vec<FusedCandidate> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| FusedCandidate {
                chunk_id: id.to_string(),
                fused_score: 1.0 - i as f64 * 0.1,
                keyword_rank: Some(i + 1),
                vector_rank: None,
            })
            .collect()
    }

    fn texts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn cache() -> Arc<CacheLayer> {
        Arc::new(CacheLayer::new(
            Arc::new(MemoryKv::new()),
            Arc::new(MemoryCatalog::new()),
            CacheConfig::default(),
        ))
    }

    fn config(batch_size: usize) -> RerankConfig {
        RerankConfig {
            batch_size,
            ..RerankConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cached_scores_skip_scorer() {
        let scorer = Arc::new(LengthScorer {
            calls: AtomicUsize::new(0),
        });
        let cache = cache();
        let reranker = Reranker::new(scorer.clone(), cache.clone(), &config(8), Duration::from_secs(1));
        let fused = fused(&["a", "b"]);
        let texts = texts(&[("a", "short"), ("b", "a much longer passage")]);
        let token = CancellationToken::new();

        let mut writes = PendingWrites::new();
        let first = reranker
            .rerank("q", &fused, 1.0, &texts, &HashMap::new(), &mut writes, &token)
            .await
            .unwrap();
        assert_eq!(first.candidates[0].chunk_id, "b");
        assert_eq!(writes.len(), 2);
        cache.flush(writes).await;

        let mut writes = PendingWrites::new();
        let second = reranker
            .rerank("Q?", &fused, 1.0, &texts, &HashMap::new(), &mut writes, &token)
            .await
            .unwrap();
        assert_eq!(second.cache_hits, 2);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.candidates, first.candidates);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_fused() {
        let scorer = Arc::new(LengthScorer {
            calls: AtomicUsize::new(0),
        });
        let reranker = Reranker::new(scorer, cache(), &config(1), Duration::from_secs(1));
        let fused = fused(&["a", "b"]);
        let texts = texts(&[("a", "boom"), ("b", "fine")]);
        let mut writes = PendingWrites::new();

        let out = reranker
            .rerank("q", &fused, 1.0, &texts, &HashMap::new(), &mut writes, &CancellationToken::new())
            .await
            .unwrap();
        let a = out.candidates.iter().find(|c| c.chunk_id == "a").unwrap();
        assert_eq!(a.rerank_score, None);
        let b = out.candidates.iter().find(|c| c.chunk_id == "b").unwrap();
        assert_eq!(b.rerank_score, Some(0.04));
        assert_eq!(out.degradation.unwrap().stage, Stage::Rerank);
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let reranker = Reranker::new(Arc::new(SlowScorer), cache(), &config(4), Duration::from_millis(20));
        let fused = fused(&["a", "b"]);
        let mut writes = PendingWrites::new();
        let out = reranker
            .rerank("q", &fused, 1.0, &HashMap::new(), &HashMap::new(), &mut writes, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.degradation.is_some());
        assert!(out.candidates.iter().all(|c| c.rerank_score.is_none()));
        assert_eq!(out.candidates[0].chunk_id, "a");
        assert!(writes.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let reranker = Reranker::new(Arc::new(SlowScorer), cache(), &config(4), Duration::from_secs(10));
        let token = CancellationToken::new();
        token.cancel();
        let mut writes = PendingWrites::new();
        let err = reranker
            .rerank("q", &fused(&["a"]), 1.0, &HashMap::new(), &HashMap::new(), &mut writes, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_parse_rerank_response() {
        let json = serde_json::json!({
            "results": [
                {"index": 1, "relevance_score": 0.9},
                {"index": 0, "relevance_score": 0.2},
                {"index": 9, "relevance_score": 0.5}
            ]
        });
        assert_eq!(parse_rerank_response(&json, 3).unwrap(), vec![Some(0.2), Some(0.9), None]);
    }
}
