//! TOML configuration.
//!
//! Every weighting constant and threshold used by the pipeline is read from
//! here; nothing in the planner, fusion, rerank, or confidence code is
//! hard-wired. Only `[db]` is required; every other section has defaults.
//!
//! Invalid configuration fails with [`Error::FatalConfig`] so the process
//! refuses to start instead of serving with a half-configured backend.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use groundwork_core::confidence::ConfidenceConfig;
use groundwork_core::planner::PlannerConfig;
use groundwork_core::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Storage backend for one capability.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendsConfig {
    #[serde(default = "default_backend")]
    pub catalog: BackendKind,
    #[serde(default = "default_backend")]
    pub vector: BackendKind,
    #[serde(default = "default_backend")]
    pub keyword: BackendKind,
    #[serde(default = "default_backend")]
    pub cache: BackendKind,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            catalog: BackendKind::Sqlite,
            vector: BackendKind::Sqlite,
            keyword: BackendKind::Sqlite,
            cache: BackendKind::Sqlite,
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    /// Fused candidates handed to the reranker.
    #[serde(default = "default_candidate_budget")]
    pub candidate_budget: usize,
    /// Evidence passages kept on the answer.
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            candidate_budget: default_candidate_budget(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_candidate_k() -> usize {
    80
}
fn default_candidate_budget() -> usize {
    30
}
fn default_final_limit() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `lexical` (offline term overlap) or `http` (cross-encoder endpoint).
    #[serde(default = "default_scorer")]
    pub scorer: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_rerank_weight")]
    pub rerank_weight: f64,
    #[serde(default = "default_rerank_batch")]
    pub batch_size: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scorer: default_scorer(),
            url: None,
            model: None,
            rerank_weight: default_rerank_weight(),
            batch_size: default_rerank_batch(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_scorer() -> String {
    "lexical".to_string()
}
fn default_rerank_weight() -> f64 {
    0.6
}
fn default_rerank_batch() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_answer_ttl")]
    pub answer_ttl_secs: u64,
    #[serde(default = "default_vector_ttl")]
    pub vector_ttl_secs: u64,
    #[serde(default = "default_rerank_ttl")]
    pub rerank_ttl_secs: u64,
    /// A cache read slower than this counts as a miss.
    #[serde(default = "default_cache_read_timeout")]
    pub read_timeout_ms: u64,
    /// Entry bound of the in-memory store (`backends.cache = "memory"`).
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_namespace(),
            answer_ttl_secs: default_answer_ttl(),
            vector_ttl_secs: default_vector_ttl(),
            rerank_ttl_secs: default_rerank_ttl(),
            read_timeout_ms: default_cache_read_timeout(),
            memory_max_entries: default_memory_max_entries(),
        }
    }
}

fn default_namespace() -> String {
    "gw".to_string()
}
fn default_answer_ttl() -> u64 {
    600
}
fn default_vector_ttl() -> u64 {
    7200
}
fn default_rerank_ttl() -> u64 {
    1800
}
fn default_cache_read_timeout() -> u64 {
    250
}
fn default_memory_max_entries() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposerConfig {
    /// `extractive` (no model) or `openai` (chat completions).
    #[serde(default = "default_composer")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,
    #[serde(default = "default_composer_max_tokens")]
    pub max_tokens: u32,
    /// Evidence passages sent to a model composer.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Approximate token budget of the evidence sent to a model composer.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Treat a model answer that cites no evidence as a failure.
    #[serde(default = "default_true")]
    pub require_citations: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            provider: default_composer(),
            model: None,
            url: None,
            max_passages: default_max_passages(),
            max_tokens: default_composer_max_tokens(),
            max_sources: default_max_sources(),
            max_context_tokens: default_max_context_tokens(),
            require_citations: true,
        }
    }
}

fn default_max_sources() -> usize {
    10
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_composer() -> String {
    "extractive".to_string()
}
fn default_max_passages() -> usize {
    3
}
fn default_composer_max_tokens() -> u32 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Collection used when a command does not name one.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Chunks embedded and indexed per batch.
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
    #[serde(default = "default_ingest_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ingest_backoff")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            batch_size: default_ingest_batch(),
            max_retries: default_ingest_retries(),
            backoff_base_ms: default_ingest_backoff(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_collection() -> String {
    "default".to_string()
}
fn default_ingest_batch() -> usize {
    32
}
fn default_ingest_retries() -> u32 {
    3
}
fn default_ingest_backoff() -> u64 {
    200
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_retrieval_ms")]
    pub retrieval_ms: u64,
    #[serde(default = "default_rerank_ms")]
    pub rerank_ms: u64,
    #[serde(default = "default_compose_ms")]
    pub compose_ms: u64,
    /// Ceiling for the whole request.
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// Retries of a failed retrieval call within `retrieval_ms`.
    #[serde(default = "default_retrieval_retries")]
    pub retrieval_retries: u32,
    #[serde(default = "default_retrieval_backoff_ms")]
    pub retrieval_backoff_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            retrieval_ms: default_retrieval_ms(),
            rerank_ms: default_rerank_ms(),
            compose_ms: default_compose_ms(),
            request_ms: default_request_ms(),
            retrieval_retries: default_retrieval_retries(),
            retrieval_backoff_ms: default_retrieval_backoff_ms(),
        }
    }
}

fn default_retrieval_ms() -> u64 {
    2000
}
fn default_rerank_ms() -> u64 {
    3000
}
fn default_compose_ms() -> u64 {
    20000
}
fn default_request_ms() -> u64 {
    30000
}
fn default_retrieval_retries() -> u32 {
    2
}
fn default_retrieval_backoff_ms() -> u64 {
    25
}

fn fatal(message: impl Into<String>) -> anyhow::Error {
    Error::FatalConfig(message.into()).into()
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| fatal(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&content).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse and validate config from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        toml::from_str(content).map_err(|e| fatal(format!("failed to parse config: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        return Err(fatal("chunking.max_tokens must be > 0"));
    }
    if config.fusion.candidate_budget == 0 || config.fusion.final_limit == 0 {
        return Err(fatal("fusion.candidate_budget and fusion.final_limit must be >= 1"));
    }
    if !(0.0..=1.0).contains(&config.rerank.rerank_weight) {
        return Err(fatal("rerank.rerank_weight must be in [0.0, 1.0]"));
    }
    for (name, w) in [
        ("planner.base_keyword_weight", config.planner.base_keyword_weight),
        ("planner.base_vector_weight", config.planner.base_vector_weight),
    ] {
        if !(0.0..=1.0).contains(&w) {
            return Err(fatal(format!("{} must be in [0.0, 1.0]", name)));
        }
    }
    if config.confidence.floor > config.confidence.ceiling {
        return Err(fatal("confidence.floor must not exceed confidence.ceiling"));
    }
    if config.ingest.batch_size == 0 || config.embedding.batch_size == 0 {
        return Err(fatal("ingest.batch_size and embedding.batch_size must be > 0"));
    }
    if config.timeouts.request_ms == 0 {
        return Err(fatal("timeouts.request_ms must be > 0"));
    }
    if config.composer.max_sources == 0 || config.composer.max_context_tokens == 0 {
        return Err(fatal("composer.max_sources and composer.max_context_tokens must be > 0"));
    }
    if config.cache.memory_max_entries == 0 {
        return Err(fatal("cache.memory_max_entries must be > 0"));
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                return Err(fatal(format!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                )));
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                return Err(fatal(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                )));
            }
        }
        "local" => {}
        other => {
            return Err(fatal(format!(
                "unknown embedding provider '{}'. Must be disabled, hashing, openai, ollama, or local.",
                other
            )))
        }
    }

    match config.rerank.scorer.as_str() {
        "lexical" => {}
        "http" => {
            if config.rerank.url.is_none() {
                return Err(fatal("rerank.url is required when rerank.scorer = \"http\""));
            }
        }
        other => {
            return Err(fatal(format!(
                "unknown rerank scorer '{}'. Must be lexical or http.",
                other
            )))
        }
    }

    match config.composer.provider.as_str() {
        "extractive" | "openai" => {}
        other => {
            return Err(fatal(format!(
                "unknown composer provider '{}'. Must be extractive or openai.",
                other
            )))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"data/gw.sqlite\"\n").unwrap();
        assert_eq!(cfg.backends.vector, BackendKind::Sqlite);
        assert_eq!(cfg.embedding.provider, "hashing");
        assert_eq!(cfg.rerank.rerank_weight, 0.6);
        assert_eq!(cfg.planner.base_vector_weight, 0.7);
        assert_eq!(cfg.cache.vector_ttl_secs, 7200);
        assert_eq!(cfg.confidence.low_confidence_threshold, 0.3);
        assert_eq!(cfg.ingest.collection, "default");
    }

    #[test]
    fn test_missing_db_is_fatal() {
        let err = parse_config("[fusion]\ncandidate_budget = 10\n").unwrap_err();
        let core = err.downcast_ref::<Error>().unwrap();
        assert_eq!(core.kind(), groundwork_core::ErrorKind::FatalConfig);
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let toml = "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n";
        assert!(parse_config(toml).is_err());
        let toml = "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8\n";
        assert!(parse_config(toml).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_weight() {
        let toml = "[db]\npath = \"x\"\n[rerank]\nrerank_weight = 1.5\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_overrides_planner_tables() {
        let toml = r#"
[db]
path = "x"

[backends]
vector = "memory"

[planner]
base_keyword_weight = 0.5
base_vector_weight = 0.5

[planner.synonyms]
"k8s" = ["kubernetes"]
"#;
        let cfg = parse_config(toml).unwrap();
        assert_eq!(cfg.backends.vector, BackendKind::Memory);
        assert_eq!(cfg.backends.keyword, BackendKind::Sqlite);
        assert_eq!(cfg.planner.base_keyword_weight, 0.5);
        assert_eq!(cfg.planner.synonyms["k8s"], vec!["kubernetes".to_string()]);
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/gw.example.toml")).unwrap();
        assert_eq!(cfg.fusion.final_limit, 8);
        assert_eq!(cfg.planner.question_expansions["how"].len(), 2);
    }
}
