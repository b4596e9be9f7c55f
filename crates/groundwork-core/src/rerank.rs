//! Relevance scoring and rerank blending.
//!
//! A [`RelevanceScorer`] assigns a calibrated query/passage relevance in
//! `[0, 1]`. Scores are blended with fused scores as
//! `final = w × rerank + (1 - w) × fused / fused_ceiling`, where
//! `fused_ceiling` is the largest fused score the plan's weights allow. Both
//! terms therefore sit on an absolute scale: a lone weak hit is not lifted
//! to `1.0` just because it has no competitors. A candidate without a
//! rerank score falls back to its scaled fused score.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FusedCandidate, RerankedCandidate};
use crate::planner::tokenize;

/// Text of a candidate handed to a scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub chunk_id: String,
    pub text: String,
}

/// Pairwise query/passage relevance model.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Identifier used to key cached scores.
    fn model_version(&self) -> &str;

    /// Score each passage against `query`, in input order.
    ///
    /// Scores are calibrated to `[0, 1]`; values outside are clamped.
    /// `None` marks a passage the model could not score.
    async fn score(&self, query: &str, passages: &[Passage]) -> Result<Vec<Option<f64>>>;
}

/// Blend rerank scores into fused candidates and sort by final score.
///
/// `rerank_scores` holds scorer output keyed by chunk id; `source_ids` maps
/// chunk ids to their source for citation. `fused_ceiling` is the maximum
/// attainable fused score (the sum of the active branch weights).
pub fn blend(
    fused: &[FusedCandidate],
    rerank_scores: &HashMap<String, f64>,
    source_ids: &HashMap<String, String>,
    rerank_weight: f64,
    fused_ceiling: f64,
) -> Vec<RerankedCandidate> {
    let mut out: Vec<RerankedCandidate> = fused
        .iter()
        .map(|f| {
            let nf = scale_fused(f.fused_score, fused_ceiling);
            let rerank_score = rerank_scores
                .get(&f.chunk_id)
                .filter(|s| s.is_finite())
                .map(|s| s.clamp(0.0, 1.0));
            let final_score = match rerank_score {
                Some(r) => rerank_weight * r + (1.0 - rerank_weight) * nf,
                None => nf,
            };
            RerankedCandidate {
                chunk_id: f.chunk_id.clone(),
                source_id: source_ids.get(&f.chunk_id).cloned().unwrap_or_default(),
                rerank_score,
                fused_score: f.fused_score,
                final_score,
            }
        })
        .collect();

    out.sort_by(compare_reranked);
    out
}

fn scale_fused(score: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 || !score.is_finite() {
        return 0.0;
    }
    (score / ceiling).clamp(0.0, 1.0)
}

/// Final ordering: final score desc, fused score desc, chunk id asc.
pub fn compare_reranked(a: &RerankedCandidate, b: &RerankedCandidate) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then(
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.chunk_id.cmp(&b.chunk_id))
}

/// Offline scorer: fraction of query terms present in the passage,
/// weighted toward longer terms.
///
/// Used when no cross-encoder endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LexicalOverlapScorer;

#[async_trait]
impl RelevanceScorer for LexicalOverlapScorer {
    fn model_version(&self) -> &str {
        "lexical-overlap-v1"
    }

    async fn score(&self, query: &str, passages: &[Passage]) -> Result<Vec<Option<f64>>> {
        let terms: HashSet<String> = tokenize(&query.to_lowercase()).into_iter().collect();
        let total: f64 = terms.iter().map(|t| t.len() as f64).sum();

        Ok(passages
            .iter()
            .map(|p| {
                if total <= 0.0 {
                    return Some(0.0);
                }
                let words: HashSet<String> =
                    tokenize(&p.text.to_lowercase()).into_iter().collect();
                let hit: f64 = terms
                    .iter()
                    .filter(|t| words.contains(*t))
                    .map(|t| t.len() as f64)
                    .sum();
                Some(hit / total)
            })
            .collect())
    }
}
