//! Core data models used throughout Groundwork.
//!
//! Chunks and collections are persisted by the catalog; every candidate
//! type below is produced per query and never stored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::planner::RetrievalPlan;

/// Longest accepted collection name.
pub const MAX_COLLECTION_NAME: usize = 64;

/// Collection names are 1-64 ASCII letters, digits, `_` or `-`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid collection name '{}': use 1-{} characters from [A-Za-z0-9_-]",
            name, MAX_COLLECTION_NAME
        )))
    }
}

/// Ordered key → value metadata attached to a chunk.
pub type Metadata = BTreeMap<String, String>;

/// A chunk as handed over by the external chunking step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    /// Offset of this chunk within its source.
    pub position: u32,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Heading trail leading to this chunk, outermost first.
    #[serde(default)]
    pub section_path: Vec<String>,
}

impl ChunkInput {
    pub fn new(position: u32, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
            metadata: Metadata::new(),
            section_path: Vec::new(),
        }
    }
}

/// A live chunk recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `source_id` and `content_hash`.
    pub chunk_id: String,
    pub collection: String,
    pub source_id: String,
    pub position: u32,
    pub text: String,
    /// SHA-256 of the normalized text.
    pub content_hash: String,
    pub embedding_model_version: String,
    pub metadata: Metadata,
    pub section_path: Vec<String>,
}

/// Collection metadata. `generation` increases on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub embedding_model_version: String,
    pub generation: u64,
    pub chunk_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Which retrieval branch produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Keyword,
    Vector,
}

/// A ranked hit from one retrieval branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    /// Native backend score (BM25 or cosine similarity).
    pub score: f64,
    pub source: CandidateSource,
    /// 1-based rank within the branch.
    pub rank: usize,
}

/// A candidate after keyword and vector lists were merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub fused_score: f64,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

impl FusedCandidate {
    /// Number of branches this chunk appeared in.
    pub fn sources_present(&self) -> usize {
        usize::from(self.keyword_rank.is_some()) + usize::from(self.vector_rank.is_some())
    }

    /// Best rank across branches.
    pub fn best_rank(&self) -> usize {
        match (self.keyword_rank, self.vector_rank) {
            (Some(k), Some(v)) => k.min(v),
            (Some(k), None) => k,
            (None, Some(v)) => v,
            (None, None) => usize::MAX,
        }
    }
}

/// A candidate after reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedCandidate {
    pub chunk_id: String,
    pub source_id: String,
    /// Calibrated relevance in `[0, 1]`; `None` when the scorer failed for
    /// this chunk or reranking is off.
    pub rerank_score: Option<f64>,
    pub fused_score: f64,
    pub final_score: f64,
}

impl RerankedCandidate {
    /// Absolute evidence strength: the calibrated relevance when the chunk
    /// was scored, otherwise its final score.
    pub fn relevance(&self) -> f64 {
        self.rerank_score.unwrap_or(self.final_score)
    }
}

/// A chunk cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub source_id: String,
}

/// Pipeline stage that can degrade without failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Collection or chunk lookup in the catalog.
    Catalog,
    KeywordRetrieval,
    VectorRetrieval,
    Rerank,
    Compose,
}

/// A record of reduced evidence quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub stage: Stage,
    pub reason: String,
}

/// The response to a question.
///
/// Always carries a confidence value, even when degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub evidence: Vec<RerankedCandidate>,
    pub degraded: bool,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    pub plan: RetrievalPlan,
    #[serde(default)]
    pub cache_hit: bool,
}
