//! In-process embedding models via fastembed (feature `local-embeddings-fastembed`).
//!
//! Text uses one of fastembed's sentence models; images use CLIP ViT-B/32.
//! Models are downloaded from Hugging Face on first use and cached. Both run
//! on the blocking thread pool.

use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::config::EmbeddingConfig;

const DEFAULT_TEXT_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalBackend {
    model_name: String,
    batch_size: usize,
    text: Option<Arc<Mutex<fastembed::TextEmbedding>>>,
    image: Option<Arc<Mutex<fastembed::ImageEmbedding>>>,
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

impl LocalBackend {
    /// Load the text and image models. Either may fail independently; the
    /// backend reports which ones are available.
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        let text_model = config_to_fastembed_model(&model_name)?;

        let text = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(text_model).with_show_download_progress(false),
            )
        })
        .await?;
        let text = match text {
            Ok(model) => Some(Arc::new(Mutex::new(model))),
            Err(e) => {
                warn!(error = %e, model = %model_name, "local text model failed to load");
                None
            }
        };

        let image = tokio::task::spawn_blocking(|| {
            fastembed::ImageEmbedding::try_new(fastembed::ImageInitOptions::new(
                fastembed::ImageEmbeddingModel::ClipVitB32,
            ))
        })
        .await?;
        let image = match image {
            Ok(model) => Some(Arc::new(Mutex::new(model))),
            Err(e) => {
                warn!(error = %e, "local image model failed to load");
                None
            }
        };

        Ok(Self {
            model_name,
            batch_size: config.batch_size,
            text,
            image,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn has_text_model(&self) -> bool {
        self.text.is_some()
    }

    pub fn has_image_model(&self) -> bool {
        self.image.is_some()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .text
            .clone()
            .ok_or_else(|| anyhow!("local text model not loaded"))?;
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("local text model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }

    pub async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let model = self
            .image
            .clone()
            .ok_or_else(|| anyhow!("local image model not loaded"))?;
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("local image model lock poisoned"))?;
            let mut vectors = model
                .embed_bytes(&[bytes.as_slice()], None)
                .map_err(|e| anyhow!("Local image embedding failed: {}", e))?;
            vectors
                .pop()
                .ok_or_else(|| anyhow!("Local image embedding returned nothing"))
        })
        .await?
    }
}
