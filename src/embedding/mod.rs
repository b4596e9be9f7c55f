//! Embedding providers and the batching gateway.
//!
//! Every provider implements [`EmbeddingGateway`] and makes a single attempt
//! per call. Errors are classified at the transport boundary:
//!
//! - network errors, HTTP 429 and 5xx → [`Error::EmbeddingUnavailable`] (retryable)
//! - other HTTP 4xx, malformed or wrongly-sized vectors → [`Error::EmbeddingRejected`]
//!
//! [`BatchingGateway`] wraps a provider, splits input into `batch_size`
//! batches, and retries unavailable batches with exponential backoff.
//!
//! # Provider Selection
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"disabled"` | none: keyword-only deployment |
//! | `"hashing"` | [`HashingEmbedder`] (offline, deterministic) |
//! | `"openai"` | [`OpenAiEmbedder`] |
//! | `"ollama"` | [`OllamaEmbedder`] |
//! | `"local"` | `LocalEmbedder` (fastembed, `local` feature) |

#[cfg(feature = "local")]
mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use groundwork_core::embedding::{Embedded, EmbeddingGateway, HashingEmbedder};
use groundwork_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::retry::{with_backoff, Backoff};

#[cfg(feature = "local")]
pub use local::LocalEmbedder;

const DEFAULT_HASHING_DIMS: usize = 256;

/// Classify a failed HTTP exchange.
pub(crate) fn classify_status(service: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        Error::EmbeddingUnavailable(message)
    } else {
        Error::EmbeddingRejected(message)
    }
}

fn parse_vector(value: &serde_json::Value, dims: usize, service: &str) -> Result<Vec<f32>> {
    let vec: Vec<f32> = value
        .as_array()
        .ok_or_else(|| Error::EmbeddingRejected(format!("{}: embedding is not an array", service)))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if vec.len() != dims {
        return Err(Error::EmbeddingRejected(format!(
            "{}: expected {} dims, got {}",
            service,
            dims,
            vec.len()
        )));
    }
    Ok(vec)
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ OpenAI ============

/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::FatalConfig("embedding.model required for OpenAI".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::FatalConfig("embedding.dims required for OpenAI".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::FatalConfig("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
            dims,
        })
    }
}

/// Extract `data[].embedding` ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value, dims: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::EmbeddingRejected("OpenAI response missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| Error::EmbeddingRejected("OpenAI response missing embedding".into()))?;
        indexed.push((index, parse_vector(embedding, dims, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("OpenAI response unreadable: {}", e)))?;
        Ok(Embedded {
            vectors: parse_openai_response(&json, self.dims)?,
            model_version: self.model.clone(),
        })
    }
}

// ============ Ollama ============

/// Calls `POST /api/embed` on a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::FatalConfig("embedding.model required for Ollama".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::FatalConfig("embedding.dims required for Ollama".into()))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            dims,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value, dims: usize) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::EmbeddingRejected("Ollama response missing embeddings array".into()))?
        .iter()
        .map(|v| parse_vector(v, dims, "Ollama"))
        .collect()
}

#[async_trait]
impl EmbeddingGateway for OllamaEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Error::EmbeddingUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Ollama response unreadable: {}", e)))?;
        Ok(Embedded {
            vectors: parse_ollama_response(&json, self.dims)?,
            model_version: self.model.clone(),
        })
    }
}

// ============ Batching ============

/// Splits input into batches and retries unavailable batches.
pub struct BatchingGateway {
    inner: Arc<dyn EmbeddingGateway>,
    batch_size: usize,
    backoff: Backoff,
}

impl BatchingGateway {
    pub fn new(inner: Arc<dyn EmbeddingGateway>, batch_size: usize, backoff: Backoff) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for BatchingGateway {
    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let out = with_backoff(self.backoff, "embed", || self.inner.embed(batch)).await?;
            if out.vectors.len() != batch.len() {
                return Err(Error::EmbeddingRejected(format!(
                    "provider returned {} vectors for {} texts",
                    out.vectors.len(),
                    batch.len()
                )));
            }
            if out.model_version != self.inner.model_version() {
                return Err(Error::EmbeddingRejected(format!(
                    "provider answered with model '{}', expected '{}'",
                    out.model_version,
                    self.inner.model_version()
                )));
            }
            vectors.extend(out.vectors);
        }
        debug!(texts = texts.len(), model = self.inner.model_version(), "embedded");
        Ok(Embedded {
            vectors,
            model_version: self.inner.model_version().to_string(),
        })
    }
}

/// Build the configured provider behind a [`BatchingGateway`].
///
/// Returns `None` when embeddings are disabled.
pub fn create_gateway(config: &EmbeddingConfig) -> anyhow::Result<Option<Arc<dyn EmbeddingGateway>>> {
    let provider: Arc<dyn EmbeddingGateway> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "hashing" => {
            let dims = config.dims.unwrap_or(DEFAULT_HASHING_DIMS);
            match &config.model {
                Some(version) => Arc::new(HashingEmbedder::with_version(dims, version.clone())),
                None => Arc::new(HashingEmbedder::new(dims)),
            }
        }
        "openai" => Arc::new(OpenAiEmbedder::new(config)?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        #[cfg(feature = "local")]
        "local" => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local"))]
        "local" => {
            return Err(Error::FatalConfig(
                "local embedding provider requires building with --features local".into(),
            )
            .into())
        }
        other => {
            return Err(Error::FatalConfig(format!("unknown embedding provider: {}", other)).into())
        }
    };

    Ok(Some(Arc::new(BatchingGateway::new(
        provider,
        config.batch_size,
        Backoff::new(config.max_retries, config.backoff_base_ms),
    ))))
}
