//! HTTP embedding backends: OpenAI-compatible and Ollama.
//!
//! Both share one retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    OpenAi,
    Ollama,
}

impl RemoteKind {
    fn label(&self) -> &'static str {
        match self {
            RemoteKind::OpenAi => "OpenAI",
            RemoteKind::Ollama => "Ollama",
        }
    }
}

pub struct RemoteBackend {
    kind: RemoteKind,
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RemoteBackend {
    /// Build a backend from configuration.
    ///
    /// The OpenAI backend needs `OPENAI_API_KEY` when talking to the default
    /// endpoint; a custom `embedding.url` may point at a server without auth.
    pub fn new(kind: RemoteKind, config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for {} provider", kind.label()))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let endpoint = match kind {
            RemoteKind::OpenAi => {
                if config.url.is_none() && api_key.is_none() {
                    bail!("OPENAI_API_KEY environment variable not set");
                }
                let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
                format!("{}/embeddings", base.trim_end_matches('/'))
            }
            RemoteKind::Ollama => {
                let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
                format!("{}/api/embed", base.trim_end_matches('/'))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            kind,
            client,
            endpoint,
            model,
            api_key: match kind {
                RemoteKind::OpenAi => api_key,
                RemoteKind::Ollama => None,
            },
            max_retries: config.max_retries,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a batch of texts, returning one vector per input in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = match self.kind {
                            RemoteKind::OpenAi => parse_openai_response(&json)?,
                            RemoteKind::Ollama => parse_ollama_response(&json)?,
                        };
                        if vectors.len() != texts.len() {
                            bail!(
                                "{} returned {} embeddings for {} inputs",
                                self.kind.label(),
                                vectors.len(),
                                texts.len()
                            );
                        }
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = anyhow!("{} API error {}: {}", self.kind.label(), status, body_text);

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "{} connection error ({}): {}",
                        self.kind.label(),
                        self.endpoint,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}
