//! Chat-completion clients used to compose answers.
//!
//! [`LlmClient`] has three implementations selected by `llm.provider`:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `disabled` | none; every call fails with an upstream error |
//! | `openai` | `POST {url}/chat/completions` (default `https://api.openai.com/v1`) |
//! | `ollama` | `POST {url}/api/chat` with `stream: false` (default `http://localhost:11434`) |
//!
//! Requests carry `llm.timeout_secs` and are not retried.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

const SERVICE: &str = "llm";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Send one system + user message pair and return the reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Build the client for `config.provider`.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledLlm)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => Err(RagError::Config(format!("Unknown llm provider: {}", other))),
    }
}

pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RagError::upstream(SERVICE, "LLM provider is disabled"))
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Config(format!("cannot build HTTP client: {}", e)))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| RagError::upstream(SERVICE, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(RagError::upstream(
            SERVICE,
            format!("HTTP {}: {}", status, text),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| RagError::upstream(SERVICE, format!("invalid response body: {}", e)))
}

/// OpenAI-compatible `/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    /// The default endpoint needs `OPENAI_API_KEY`; a custom `llm.url` may not.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if config.url.is_none() && api_key.is_none() {
            return Err(RagError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self.client.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        debug!(model = %self.model, prompt_chars = user.len(), "chat completion request");

        let json = post_json(request, &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RagError::upstream(SERVICE, "response has no choices[0].message.content")
            })
    }
}

/// Ollama `/api/chat` without streaming.
pub struct OllamaChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });

        debug!(model = %self.model, prompt_chars = user.len(), "ollama chat request");
        let json = post_json(self.client.post(&self.endpoint), &body).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::upstream(SERVICE, "response has no message.content"))
    }
}
