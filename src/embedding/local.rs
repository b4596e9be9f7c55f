//! Local inference via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached; after
//! that no network calls are made. The model is loaded lazily on the first
//! `embed` call and kept for the life of the process.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use groundwork_core::embedding::{Embedded, EmbeddingGateway};
use groundwork_core::{Error, Result};

use crate::config::EmbeddingConfig;

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalEmbedder {
    model_name: String,
    model: EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));
        Ok(Self {
            model_name,
            model,
            dims,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn default_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

fn to_fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => Err(Error::FatalConfig(format!(
            "unknown local embedding model '{}'",
            other
        ))),
    }
}

#[async_trait]
impl EmbeddingGateway for LocalEmbedder {
    fn model_version(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Embedded> {
        let texts = texts.to_vec();
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| Error::EmbeddingUnavailable("local model lock poisoned".into()))?;
            if guard.is_none() {
                let m = TextEmbedding::try_new(
                    InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    Error::EmbeddingUnavailable(format!("failed to load local model: {}", e))
                })?;
                *guard = Some(m);
            }
            let Some(m) = guard.as_mut() else {
                return Err(Error::EmbeddingUnavailable("local model not loaded".into()));
            };
            m.embed(texts, Some(batch_size))
                .map_err(|e| Error::EmbeddingRejected(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::EmbeddingUnavailable(format!("embedding task failed: {}", e)))??;

        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(Error::EmbeddingRejected(format!(
                "local model returned {} dims, expected {}",
                v.len(),
                self.dims
            )));
        }

        Ok(Embedded {
            vectors,
            model_version: self.model_name.clone(),
        })
    }
}
