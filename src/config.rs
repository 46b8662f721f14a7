//! TOML configuration parsing and validation.
//!
//! A single file (default `./config/vecrag.toml`) describes the HTTP bind
//! address, chunking parameters, the embedding and LLM backends, retrieval
//! defaults and the named database profiles. See `config/vecrag.example.toml`.
//!
//! Database profiles can also be supplied through the environment as
//! `VECRAG_DB_<NAME>_PATH=/path/to/file.sqlite`; the profile name is the
//! lower-cased `<NAME>`. Environment profiles override file profiles of the
//! same name.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::VectorMode;

/// Prefix/suffix of environment variables that declare database profiles.
const ENV_PROFILE_PREFIX: &str = "VECRAG_DB_";
const ENV_PROFILE_SUFFIX: &str = "_PATH";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Character-window chunking parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, `ollama` or `local`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Target dimensionality every stored vector is padded or truncated to.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL override for the provider API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    512
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. \
Always base your answer on the context provided. If the context doesn't contain enough information to answer \
the question, say so. Cite the source documents when providing information.";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Context from documents:\n{context}\n\nQuestion: {question}\n\n\
Please provide a comprehensive answer based on the context above.";

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `openai` or `ollama`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Must contain `{context}` and `{question}`.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Optional cap on the context handed to the model, in characters.
    #[serde(default)]
    pub max_context_chars: Option<usize>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            system_prompt: default_system_prompt(),
            prompt_template: default_prompt_template(),
            max_context_chars: None,
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default)]
    pub vector_mode: VectorMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            vector_mode: VectorMode::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Name of the profile that is active at startup.
    #[serde(default = "default_active")]
    pub active: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

fn default_active() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProfileConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    merge_env_profiles(&mut config.database, std::env::vars());
    validate(&config)?;

    Ok(config)
}

/// Add profiles declared as `VECRAG_DB_<NAME>_PATH` environment variables.
pub fn merge_env_profiles(
    database: &mut DatabaseConfig,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let Some(name) = key
            .strip_prefix(ENV_PROFILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(ENV_PROFILE_SUFFIX))
        else {
            continue;
        };
        if name.is_empty() || value.trim().is_empty() {
            continue;
        }
        database.profiles.insert(
            name.to_lowercase(),
            ProfileConfig {
                path: PathBuf::from(value),
                max_connections: default_max_connections(),
            },
        );
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // LLM
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    for placeholder in ["{context}", "{question}"] {
        if !config.llm.prompt_template.contains(placeholder) {
            bail!("llm.prompt_template must contain {}", placeholder);
        }
    }

    // Retrieval
    if config.retrieval.max_top_k == 0 {
        bail!("retrieval.max_top_k must be >= 1");
    }
    if config.retrieval.top_k == 0 || config.retrieval.top_k > config.retrieval.max_top_k {
        bail!(
            "retrieval.top_k must be in [1, {}]",
            config.retrieval.max_top_k
        );
    }

    // Databases
    if config.database.profiles.is_empty() {
        bail!("at least one [database.profiles.<name>] entry is required");
    }
    if !config.database.profiles.contains_key(&config.database.active) {
        bail!(
            "database.active = '{}' does not name a configured profile",
            config.database.active
        );
    }

    Ok(())
}
