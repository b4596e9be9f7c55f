//! Embedding gateway trait and vector utilities.
//!
//! Defines the [`EmbeddingGateway`] trait that every embedding backend
//! implements, the deterministic [`HashingEmbedder`], and pure helpers for
//! vector serialization and similarity computation.
//!
//! Network-backed providers (OpenAI, Ollama, fastembed) live in the
//! `groundwork` app crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::planner::tokenize;

/// Vectors for a batch of texts, tagged with the model that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    pub model_version: String,
}

/// Turns text into fixed-length vectors.
///
/// Implementations report transport and quota failures as
/// [`Error::EmbeddingUnavailable`] and refused input as
/// [`Error::EmbeddingRejected`].
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Model identifier written onto every chunk it embeds.
    fn model_version(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Embedded>;
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase token and adjacent token pair is hashed into one of
/// `dims` buckets with a signed weight; the result is L2-normalized. Texts
/// sharing vocabulary land close together, which is enough for offline use
/// and tests. No model download or network access is needed.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model_version: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            model_version: format!("hashing-{}", dims.max(1)),
        }
    }

    /// Same hashing scheme under a different version tag.
    pub fn with_version(dims: usize, version: impl Into<String>) -> Self {
        Self {
            dims: dims.max(1),
            model_version: version.into(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let tokens = tokenize(&text.to_lowercase());

        let mut add = |feature: &str, weight: f32| {
            let digest = Sha256::digest(feature.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = u64::from_le_bytes(head);
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[(bucket % self.dims as u64) as usize] += sign * weight;
        };

        for t in &tokens {
            add(t, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingGateway for HashingEmbedder {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(Error::EmbeddingRejected(format!("input {} is empty", i)));
        }
        Ok(Embedded {
            vectors: texts.iter().map(|t| self.embed_one(t)).collect(),
            model_version: self.model_version.clone(),
        })
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use groundwork_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
