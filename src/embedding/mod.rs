//! Text and image embedding with a deterministic fallback.
//!
//! [`Embedder`] wraps one model backend:
//! - **disabled**: no model; every vector comes from the hash fallback.
//! - **openai**: `POST {url}/embeddings` on any OpenAI-compatible server.
//! - **ollama**: `POST {url}/api/embed` on an Ollama instance.
//! - **local**: in-process fastembed text models plus CLIP for images
//!   (cargo feature `local-embeddings-fastembed`).
//!
//! Embedding never fails. When the backend is missing or errors, the
//! embedder logs a warning and returns [`fallback::hash_embedding`] instead.
//! Every vector, model or fallback, is passed through [`fit_dimension`] so all
//! stored vectors share the configured length.
//!
//! Also provides the vector utilities the store uses:
//! - [`cosine_similarity`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for little-endian f32 BLOB storage

pub mod fallback;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;

use tracing::{info, warn};

use crate::config::EmbeddingConfig;
use remote::{RemoteBackend, RemoteKind};

/// Stand-in for missing or blank text.
pub const EMPTY_TEXT: &str = "empty";

enum Backend {
    Disabled,
    Remote(RemoteBackend),
    #[cfg(feature = "local-embeddings-fastembed")]
    Local(local::LocalBackend),
}

pub struct Embedder {
    backend: Backend,
    dims: usize,
    batch_size: usize,
}

impl Embedder {
    /// Build the embedder for `config`.
    ///
    /// A backend that cannot be constructed (missing API key, unknown model,
    /// feature not compiled in) is logged and replaced by the fallback.
    pub async fn from_config(config: &EmbeddingConfig) -> Self {
        let backend = match build_backend(config).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!(
                    provider = %config.provider,
                    error = %e,
                    "embedding backend unavailable, using hash fallback"
                );
                Backend::Disabled
            }
        };

        let embedder = Self {
            backend,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
        };
        info!(
            model = embedder.model_name(),
            dims = embedder.dims,
            text_model = embedder.text_model_status(),
            image_model = embedder.image_model_status(),
            "embedder ready"
        );
        embedder
    }

    /// Fallback-only embedder.
    pub fn disabled(dims: usize) -> Self {
        Self {
            backend: Backend::Disabled,
            dims,
            batch_size: 32,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        match &self.backend {
            Backend::Disabled => "hash-fallback",
            Backend::Remote(remote) => remote.model_name(),
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(local) => local.model_name(),
        }
    }

    /// `"loaded"` when text goes through a model, `"fallback"` otherwise.
    pub fn text_model_status(&self) -> &'static str {
        match &self.backend {
            Backend::Disabled => "fallback",
            Backend::Remote(_) => "loaded",
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(local) if local.has_text_model() => "loaded",
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(_) => "fallback",
        }
    }

    /// `"loaded"` when images go through a model, `"fallback"` otherwise.
    pub fn image_model_status(&self) -> &'static str {
        match &self.backend {
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(local) if local.has_image_model() => "loaded",
            _ => "fallback",
        }
    }

    /// Embed one text. `None`, empty and whitespace-only text embed as `"empty"`.
    pub async fn embed_text(&self, text: Option<&str>) -> Vec<f32> {
        let text = normalize_text(text);
        let mut vectors = self.embed_batch(std::slice::from_ref(&text)).await;
        vectors
            .pop()
            .unwrap_or_else(|| self.fallback_text(&text))
    }

    /// Embed many texts, sending them to the backend in `batch_size` groups.
    /// A failing group falls back on its own; the others keep model vectors.
    pub async fn embed_texts(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let normalized: Vec<String> = texts.iter().map(|t| normalize_text(Some(t))).collect();
        let mut out = Vec::with_capacity(normalized.len());
        for batch in normalized.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await);
        }
        out
    }

    /// Embed raw image bytes. Only the local backend has an image model.
    pub async fn embed_image(&self, bytes: &[u8]) -> Vec<f32> {
        #[cfg(feature = "local-embeddings-fastembed")]
        if let Backend::Local(local) = &self.backend {
            if local.has_image_model() {
                match local.embed_image(bytes).await {
                    Ok(vector) => return fit_dimension(vector, self.dims),
                    Err(e) => warn!(error = %e, "image embedding failed, using hash fallback"),
                }
            }
        }
        fallback::image_hash_embedding(bytes, self.dims)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let result = match &self.backend {
            Backend::Disabled => return texts.iter().map(|t| self.fallback_text(t)).collect(),
            Backend::Remote(remote) => remote.embed(texts).await,
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(local) => local.embed(texts).await,
        };

        match result {
            Ok(vectors) if vectors.len() == texts.len() => vectors
                .into_iter()
                .map(|v| fit_dimension(v, self.dims))
                .collect(),
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "embedding backend returned wrong batch size, using hash fallback"
                );
                texts.iter().map(|t| self.fallback_text(t)).collect()
            }
            Err(e) => {
                warn!(error = %e, count = texts.len(), "embedding failed, using hash fallback");
                texts.iter().map(|t| self.fallback_text(t)).collect()
            }
        }
    }

    fn fallback_text(&self, text: &str) -> Vec<f32> {
        fallback::hash_embedding(text, self.dims)
    }
}

async fn build_backend(config: &EmbeddingConfig) -> anyhow::Result<Backend> {
    match config.provider.as_str() {
        "disabled" => Ok(Backend::Disabled),
        "openai" => Ok(Backend::Remote(RemoteBackend::new(RemoteKind::OpenAi, config)?)),
        "ollama" => Ok(Backend::Remote(RemoteBackend::new(RemoteKind::Ollama, config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Backend::Local(local::LocalBackend::load(config).await?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => anyhow::bail!(
            "local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn normalize_text(text: Option<&str>) -> String {
    match text {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => EMPTY_TEXT.to_string(),
    }
}

/// Pad `vec` to `dims` with the mean of its components, or truncate it.
///
/// An empty input becomes all zeros.
pub fn fit_dimension(mut vec: Vec<f32>, dims: usize) -> Vec<f32> {
    if vec.len() >= dims {
        vec.truncate(dims);
        return vec;
    }
    let mean = if vec.is_empty() {
        0.0
    } else {
        vec.iter().sum::<f32>() / vec.len() as f32
    };
    vec.resize(dims, mean);
    vec
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector on either side.
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

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_dimension_pads_with_mean() {
        let v = fit_dimension(vec![1.0, 2.0, 3.0], 6);
        assert_eq!(v.len(), 6);
        assert_eq!(&v[..3], &[1.0, 2.0, 3.0]);
        assert!(v[3..].iter().all(|&x| (x - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_fit_dimension_truncates() {
        let v = fit_dimension((0..1024).map(|i| i as f32).collect(), 512);
        assert_eq!(v.len(), 512);
        assert_eq!(v[511], 511.0);
    }

    #[test]
    fn test_fit_dimension_empty_is_zero() {
        assert_eq!(fit_dimension(Vec::new(), 3), vec![0.0; 3]);
    }

    #[tokio::test]
    async fn test_embed_text_never_fails_on_missing_text() {
        let embedder = Embedder::disabled(512);
        let none = embedder.embed_text(None).await;
        let empty = embedder.embed_text(Some("")).await;
        let blank = embedder.embed_text(Some("   ")).await;
        assert_eq!(none.len(), 512);
        assert_eq!(none, empty);
        assert_eq!(empty, blank);
        assert_eq!(none, fallback::hash_embedding(EMPTY_TEXT, 512));
    }

    #[tokio::test]
    async fn test_embed_texts_matches_single() {
        let embedder = Embedder::disabled(64);
        let texts: Vec<String> = (0..70).map(|i| format!("text number {}", i)).collect();
        let batch = embedder.embed_texts(&texts).await;
        assert_eq!(batch.len(), 70);
        assert_eq!(batch[42], embedder.embed_text(Some(&texts[42])).await);
    }

    #[tokio::test]
    async fn test_embed_image_falls_back() {
        let embedder = Embedder::disabled(16);
        assert_eq!(embedder.image_model_status(), "fallback");
        assert_eq!(embedder.text_model_status(), "fallback");
        let v = embedder.embed_image(&[10, 20, 30]).await;
        assert_eq!(v, fallback::hash_embedding("60", 16));
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades_to_fallback() {
        let config = EmbeddingConfig {
            provider: "local-but-missing".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = Embedder::from_config(&config).await;
        assert_eq!(embedder.text_model_status(), "fallback");
        assert_eq!(embedder.embed_text(Some("hi")).await.len(), 512);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
