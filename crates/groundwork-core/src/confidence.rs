//! Answer confidence from the final evidence list.
//!
//! ```text
//! confidence = clamp(
//!     top_weight × top.relevance
//!   + min(agreement_cap, agreement_bonus × (supporting_sources - 1))
//!   - ambiguity_penalty × max(0, 1 - gap / ambiguity_gap)
//!   - degradation_penalty × degradations,
//!   floor, ceiling)
//! ```
//!
//! `relevance` is the candidate's calibrated rerank score, or its final
//! score when it was not reranked (see [`RerankedCandidate::relevance`]).
//! Fused scores are relative to the other candidates of the same request,
//! so they only decide confidence when no scorer ran.
//!
//! `supporting_sources` counts distinct `source_id`s among evidence whose
//! relevance is at least `support_threshold`. `gap` is the difference
//! between the first and second final scores; a single candidate has no gap
//! penalty. Raising the top score never lowers confidence.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::RerankedCandidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub top_weight: f64,
    pub agreement_bonus: f64,
    pub agreement_cap: f64,
    pub support_threshold: f64,
    pub ambiguity_gap: f64,
    pub ambiguity_penalty: f64,
    pub degradation_penalty: f64,
    pub floor: f64,
    pub ceiling: f64,
    /// Answers below this are flagged low-confidence, not suppressed.
    pub low_confidence_threshold: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            top_weight: 0.85,
            agreement_bonus: 0.05,
            agreement_cap: 0.15,
            support_threshold: 0.5,
            ambiguity_gap: 0.1,
            ambiguity_penalty: 0.1,
            degradation_penalty: 0.1,
            floor: 0.0,
            ceiling: 1.0,
            low_confidence_threshold: 0.3,
        }
    }
}

/// Confidence in `[floor, ceiling]` for evidence sorted by final score.
pub fn score(evidence: &[RerankedCandidate], degradations: usize, config: &ConfidenceConfig) -> f64 {
    let (top, top_relevance) = match evidence.first() {
        Some(top) => (top.final_score, top.relevance()),
        None => return config.floor,
    };

    let supporting: HashSet<&str> = evidence
        .iter()
        .filter(|c| c.relevance() >= config.support_threshold && !c.source_id.is_empty())
        .map(|c| c.source_id.as_str())
        .collect();
    let agreement = (config.agreement_bonus * supporting.len().saturating_sub(1) as f64)
        .min(config.agreement_cap);

    let ambiguity = match evidence.get(1) {
        Some(second) if config.ambiguity_gap > 0.0 => {
            let gap = (top - second.final_score).max(0.0);
            config.ambiguity_penalty * (1.0 - gap / config.ambiguity_gap).max(0.0)
        }
        _ => 0.0,
    };

    let raw = config.top_weight * top_relevance + agreement
        - ambiguity
        - config.degradation_penalty * degradations as f64;

    raw.clamp(config.floor, config.ceiling)
}

/// Whether a confidence value falls below the low-confidence threshold.
pub fn is_low(confidence: f64, config: &ConfidenceConfig) -> bool {
    confidence < config.low_confidence_threshold
}
