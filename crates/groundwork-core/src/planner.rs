//! Query planner: pure mapping from query features to a [`RetrievalPlan`].
//!
//! # Heuristics
//!
//! Starting from the configured base weights:
//!
//! 1. Short queries (`<= short_query_tokens`) shift `bias_step` toward keyword.
//! 2. Quoted phrases shift `phrase_bias` toward keyword.
//! 3. A rare-token ratio at or above `rare_token_ratio` shifts `bias_step`
//!    toward keyword. A token is rare when it looks like an identifier:
//!    digits, underscores, `::`, inner dots, camelCase, or an all-caps acronym.
//! 4. Long queries (`>= long_query_tokens`) shift `bias_step` toward vector.
//!
//! Weights are clamped to `[0, 1]` and renormalized to sum to one. A branch
//! whose weight reaches zero is not run. Every threshold lives in
//! [`PlannerConfig`].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fingerprint::normalize;

/// Explicit retrieval strategy, as requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Keyword,
    Vector,
    Hybrid,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Strategy::Keyword),
            "vector" | "semantic" => Ok(Strategy::Vector),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(Error::Validation(format!(
                "unknown strategy '{}'. Use keyword, vector, or hybrid.",
                other
            ))),
        }
    }
}

/// Coarse intent of a question, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Factual,
    Procedural,
    Conceptual,
    Search,
}

/// Which branches to run and how to weight them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub use_keyword: bool,
    pub use_vector: bool,
    pub keyword_weight: f64,
    pub vector_weight: f64,
    pub expand_query: bool,
    pub query_type: QueryType,
}

/// Planner thresholds and weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub base_keyword_weight: f64,
    pub base_vector_weight: f64,
    pub short_query_tokens: usize,
    pub long_query_tokens: usize,
    pub rare_token_ratio: f64,
    pub bias_step: f64,
    pub phrase_bias: f64,
    pub expand_queries: bool,
    /// Expansion only applies to queries with at most this many tokens.
    pub expansion_max_tokens: usize,
    /// Maximum number of terms added by expansion.
    pub expansion_max_terms: usize,
    /// Phrase → related terms, matched against the normalized query.
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Leading question word → related terms.
    pub question_expansions: BTreeMap<String, Vec<String>>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let synonyms = [
            ("machine learning", &["ml", "artificial intelligence"][..]),
            ("data", &["information", "dataset"]),
            ("algorithm", &["method", "technique"]),
            ("model", &["system", "framework"]),
            ("performance", &["efficiency", "accuracy"]),
            ("optimization", &["improvement", "tuning"]),
        ];
        let questions = [
            ("what", &["definition", "meaning"][..]),
            ("how", &["method", "steps"]),
            ("why", &["reason", "cause"]),
        ];
        Self {
            base_keyword_weight: 0.3,
            base_vector_weight: 0.7,
            short_query_tokens: 3,
            long_query_tokens: 10,
            rare_token_ratio: 0.5,
            bias_step: 0.15,
            phrase_bias: 0.2,
            expand_queries: true,
            expansion_max_tokens: 6,
            expansion_max_terms: 4,
            synonyms: to_table(&synonyms),
            question_expansions: to_table(&questions),
        }
    }
}

fn to_table(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

/// Features extracted from a raw query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    pub token_count: usize,
    pub quoted_phrases: Vec<String>,
    pub rare_token_ratio: f64,
    pub query_type: QueryType,
}

impl QueryFeatures {
    pub fn extract(query: &str) -> Self {
        let tokens = tokenize(query);
        let rare = tokens.iter().filter(|t| is_rare_token(t)).count();
        let rare_token_ratio = if tokens.is_empty() {
            0.0
        } else {
            rare as f64 / tokens.len() as f64
        };
        Self {
            token_count: tokens.len(),
            quoted_phrases: quoted_phrases(query),
            rare_token_ratio,
            query_type: classify(&normalize(query)),
        }
    }
}

/// Decide which retrieval branches to run for `query`.
pub fn plan(query: &str, config: &PlannerConfig, strategy: Option<Strategy>) -> RetrievalPlan {
    let features = QueryFeatures::extract(query);

    let (keyword_weight, vector_weight) = match strategy {
        Some(Strategy::Keyword) => (1.0, 0.0),
        Some(Strategy::Vector) => (0.0, 1.0),
        Some(Strategy::Hybrid) | None => heuristic_weights(&features, config),
    };

    let use_keyword = keyword_weight > 0.0;
    let use_vector = vector_weight > 0.0;
    let expand_query = use_keyword
        && config.expand_queries
        && features.quoted_phrases.is_empty()
        && features.token_count <= config.expansion_max_tokens;

    RetrievalPlan {
        use_keyword,
        use_vector,
        keyword_weight,
        vector_weight,
        expand_query,
        query_type: features.query_type,
    }
}

fn heuristic_weights(features: &QueryFeatures, config: &PlannerConfig) -> (f64, f64) {
    let mut kw = config.base_keyword_weight;
    let mut vec = config.base_vector_weight;

    if features.token_count <= config.short_query_tokens {
        kw += config.bias_step;
        vec -= config.bias_step;
    }
    if !features.quoted_phrases.is_empty() {
        kw += config.phrase_bias;
        vec -= config.phrase_bias;
    }
    if features.rare_token_ratio >= config.rare_token_ratio {
        kw += config.bias_step;
        vec -= config.bias_step;
    }
    if features.token_count >= config.long_query_tokens {
        kw -= config.bias_step;
        vec += config.bias_step;
    }

    let kw = kw.clamp(0.0, 1.0);
    let vec = vec.clamp(0.0, 1.0);
    let total = kw + vec;
    if total <= f64::EPSILON {
        return (0.5, 0.5);
    }
    (kw / total, vec / total)
}

/// Terms to append to the keyword query. Never repeats a query token.
pub fn expansion_terms(query: &str, config: &PlannerConfig) -> Vec<String> {
    let normalized = normalize(query);
    let present: BTreeSet<String> = tokenize(&normalized).into_iter().collect();
    let mut terms: Vec<String> = Vec::new();

    let push = |term: &String, terms: &mut Vec<String>| {
        if !present.contains(term.as_str()) && !terms.contains(term) {
            terms.push(term.clone());
        }
    };

    if let Some(first) = tokenize(&normalized).first() {
        if let Some(related) = config.question_expansions.get(first) {
            for term in related {
                push(term, &mut terms);
            }
        }
    }

    for (phrase, related) in &config.synonyms {
        if contains_phrase(&normalized, phrase) {
            for term in related {
                push(term, &mut terms);
            }
        }
    }

    terms.truncate(config.expansion_max_terms);
    terms
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let padded = format!(" {} ", tokenize(normalized).join(" "));
    padded.contains(&format!(" {} ", phrase))
}

/// Split on whitespace and strip surrounding punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_rare_token(token: &str) -> bool {
    if token.chars().any(|c| c.is_ascii_digit()) || token.contains('_') || token.contains("::") {
        return true;
    }
    if token.trim_matches('.').contains('.') {
        return true;
    }
    let chars: Vec<char> = token.chars().collect();
    let camel = chars
        .windows(2)
        .any(|w| w[0].is_lowercase() && w[1].is_uppercase());
    let acronym = chars.len() >= 2 && chars.iter().all(|c| c.is_uppercase());
    camel || acronym
}

fn quoted_phrases(query: &str) -> Vec<String> {
    let closed = query.matches('"').count() / 2;
    query
        .split('"')
        .skip(1)
        .step_by(2)
        .take(closed)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

const FACTUAL: &[&str] = &[
    "what", "who", "when", "where", "which", "define", "definition", "meaning", "explain",
    "compare", "difference", "versus", "vs",
];
const PROCEDURAL: &[&str] = &[
    "how", "steps", "process", "procedure", "implement", "create", "build", "setup",
    "configure", "tutorial", "guide", "example",
];
const CONCEPTUAL: &[&str] = &[
    "why", "reason", "cause", "purpose", "benefit", "advantage", "concept", "theory",
    "principle", "understand",
];
const SEARCH: &[&str] = &[
    "find", "search", "locate", "list", "show", "available", "options", "alternatives",
];

fn classify(normalized: &str) -> QueryType {
    let tokens = tokenize(normalized);
    let score = |words: &[&str]| tokens.iter().filter(|t| words.contains(&t.as_str())).count();

    let candidates = [
        (QueryType::Factual, score(FACTUAL)),
        (QueryType::Procedural, score(PROCEDURAL)),
        (QueryType::Conceptual, score(CONCEPTUAL)),
        (QueryType::Search, score(SEARCH)),
    ];

    let mut best = (QueryType::Factual, 0);
    for (kind, s) in candidates {
        if s > best.1 {
            best = (kind, s);
        }
    }
    best.0
}
