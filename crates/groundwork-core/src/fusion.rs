//! Hybrid fusion of keyword and vector candidate lists.
//!
//! # Algorithm
//!
//! 1. Keep the first (best) occurrence of each chunk per list.
//! 2. Min-max normalize each list to `[0, 1]` independently.
//! 3. `fused = keyword_weight × keyword + vector_weight × vector`, with a
//!    missing side contributing `0`.
//! 4. Sort by fused score (desc), number of lists present (desc), best
//!    original rank (asc), chunk id (asc).
//! 5. Truncate to the candidate budget.
//!
//! The result is fully determined by the inputs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::models::{FusedCandidate, RetrievalCandidate};

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[RetrievalCandidate]) -> Vec<(&RetrievalCandidate, f64)> {
    let raw: Vec<f64> = candidates.iter().map(|c| c.score).collect();
    candidates.iter().zip(min_max(&raw)).collect()
}

/// Min-max normalize a slice of scores.
///
/// Non-finite scores are treated as the list minimum.
pub fn min_max(scores: &[f64]) -> Vec<f64> {
    let finite = scores.iter().copied().filter(|s| s.is_finite());
    let s_min = finite.clone().fold(f64::INFINITY, f64::min);
    let s_max = finite.fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|&s| {
            if !s_min.is_finite() {
                return 0.0;
            }
            if (s_max - s_min).abs() < f64::EPSILON {
                return 1.0;
            }
            let s = if s.is_finite() { s } else { s_min };
            (s - s_min) / (s_max - s_min)
        })
        .collect()
}

fn dedup_by_chunk(candidates: &[RetrievalCandidate]) -> Vec<RetrievalCandidate> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.chunk_id.as_str()))
        .cloned()
        .collect()
}

#[derive(Default)]
struct Slot {
    keyword: f64,
    vector: f64,
    keyword_rank: Option<usize>,
    vector_rank: Option<usize>,
}

/// Merge keyword and vector lists into one ranked list.
pub fn fuse(
    keyword: &[RetrievalCandidate],
    vector: &[RetrievalCandidate],
    keyword_weight: f64,
    vector_weight: f64,
    budget: usize,
) -> Vec<FusedCandidate> {
    let keyword = dedup_by_chunk(keyword);
    let vector = dedup_by_chunk(vector);

    let mut slots: BTreeMap<&str, Slot> = BTreeMap::new();
    for (c, norm) in normalize_scores(&keyword) {
        let slot = slots.entry(c.chunk_id.as_str()).or_default();
        slot.keyword = norm;
        slot.keyword_rank = Some(c.rank);
    }
    for (c, norm) in normalize_scores(&vector) {
        let slot = slots.entry(c.chunk_id.as_str()).or_default();
        slot.vector = norm;
        slot.vector_rank = Some(c.rank);
    }

    let mut fused: Vec<FusedCandidate> = slots
        .into_iter()
        .map(|(chunk_id, slot)| FusedCandidate {
            chunk_id: chunk_id.to_string(),
            fused_score: keyword_weight * slot.keyword + vector_weight * slot.vector,
            keyword_rank: slot.keyword_rank,
            vector_rank: slot.vector_rank,
        })
        .collect();

    fused.sort_by(compare_fused);
    fused.truncate(budget);
    fused
}

/// Ordering used for fused output.
pub fn compare_fused(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then(b.sources_present().cmp(&a.sources_present()))
        .then(a.best_rank().cmp(&b.best_rank()))
        .then(a.chunk_id.cmp(&b.chunk_id))
}

/// Assign 1-based ranks in list order.
pub fn ranked(mut candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    candidates
}
