//! In-memory index backends.
//!
//! Both use `HashMap`s behind `std::sync::RwLock`. Keyword search is Okapi
//! BM25 over lowercase tokens; vector search is brute-force cosine
//! similarity. Ties are broken by chunk id so results are reproducible.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::fusion::ranked;
use crate::models::{CandidateSource, Metadata, RetrievalCandidate};
use crate::planner::tokenize;

use super::{KeywordIndex, VectorIndex};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct IndexedText {
    term_freq: HashMap<String, u32>,
    len: usize,
}

#[derive(Default)]
struct Postings {
    docs: HashMap<String, IndexedText>,
    total_len: usize,
}

/// In-memory BM25 keyword index.
#[derive(Default)]
pub struct MemoryKeywordIndex {
    collections: RwLock<HashMap<String, Postings>>,
}

impl MemoryKeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn terms(text: &str) -> Vec<String> {
    tokenize(&text.to_lowercase())
}

fn sort_hits(hits: &mut [(String, f64)]) {
    hits.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

fn to_candidates(hits: Vec<(String, f64)>, source: CandidateSource) -> Vec<RetrievalCandidate> {
    ranked(
        hits.into_iter()
            .map(|(chunk_id, score)| RetrievalCandidate {
                chunk_id,
                score,
                source,
                rank: 0,
            })
            .collect(),
    )
}

#[async_trait]
impl KeywordIndex for MemoryKeywordIndex {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let mut query_terms = terms(query);
        let mut seen = HashSet::new();
        query_terms.retain(|t| seen.insert(t.clone()));
        if query_terms.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let collections = self.collections.read()?;
        let postings = match collections.get(collection) {
            Some(p) if !p.docs.is_empty() => p,
            _ => return Ok(Vec::new()),
        };

        let n = postings.docs.len() as f64;
        let avg_len = (postings.total_len as f64 / n).max(1.0);
        let idf: HashMap<&str, f64> = query_terms
            .iter()
            .map(|t| {
                let df = postings
                    .docs
                    .values()
                    .filter(|d| d.term_freq.contains_key(t))
                    .count() as f64;
                (t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let mut hits: Vec<(String, f64)> = postings
            .docs
            .iter()
            .filter_map(|(chunk_id, doc)| {
                let mut score = 0.0;
                for t in &query_terms {
                    if let Some(&tf) = doc.term_freq.get(t) {
                        let tf = tf as f64;
                        let norm = 1.0 - BM25_B + BM25_B * doc.len as f64 / avg_len;
                        score += idf[t.as_str()] * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
                    }
                }
                (score > 0.0).then(|| (chunk_id.clone(), score))
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(top_n);
        Ok(to_candidates(hits, CandidateSource::Keyword))
    }

    async fn index(
        &self,
        collection: &str,
        chunk_id: &str,
        text: &str,
        _metadata: &Metadata,
    ) -> Result<()> {
        let tokens = terms(text);
        let mut term_freq = HashMap::new();
        for t in &tokens {
            *term_freq.entry(t.clone()).or_insert(0u32) += 1;
        }

        let mut collections = self.collections.write()?;
        let postings = collections.entry(collection.to_string()).or_default();
        if let Some(old) = postings.docs.remove(chunk_id) {
            postings.total_len -= old.len;
        }
        postings.total_len += tokens.len();
        postings.docs.insert(
            chunk_id.to_string(),
            IndexedText {
                term_freq,
                len: tokens.len(),
            },
        );
        Ok(())
    }

    async fn delete(&self, collection: &str, chunk_ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write()?;
        if let Some(postings) = collections.get_mut(collection) {
            for id in chunk_ids {
                if let Some(old) = postings.docs.remove(id) {
                    postings.total_len -= old.len;
                }
            }
        }
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.write()?.remove(collection);
        Ok(())
    }
}

/// In-memory brute-force cosine vector index.
#[derive(Default)]
pub struct MemoryVectorIndex {
    spaces: RwLock<HashMap<String, HashMap<String, Vec<f32>>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn search(
        &self,
        space: &str,
        vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let spaces = self.spaces.read()?;
        let entries = match spaces.get(space) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<(String, f64)> = entries
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(vector, v) as f64))
            .collect();
        sort_hits(&mut hits);
        hits.truncate(top_n);
        Ok(to_candidates(hits, CandidateSource::Vector))
    }

    async fn upsert(
        &self,
        space: &str,
        chunk_id: &str,
        vector: &[f32],
        _metadata: &Metadata,
    ) -> Result<()> {
        self.spaces
            .write()?
            .entry(space.to_string())
            .or_default()
            .insert(chunk_id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn delete(&self, space: &str, chunk_ids: &[String]) -> Result<()> {
        let mut spaces = self.spaces.write()?;
        if let Some(entries) = spaces.get_mut(space) {
            for id in chunk_ids {
                entries.remove(id);
            }
        }
        Ok(())
    }

    async fn drop_space(&self, space: &str) -> Result<()> {
        self.spaces.write()?.remove(space);
        Ok(())
    }

    async fn count(&self, space: &str) -> Result<usize> {
        Ok(self.spaces.read()?.get(space).map(|e| e.len()).unwrap_or(0))
    }
}
