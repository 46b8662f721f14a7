//! Runtime state and the operations exposed to the CLI and HTTP layers.
//!
//! [`RagService`] owns the embedder, the LLM client, the profile registry and
//! the mutable runtime state: which database is active and which vector mode
//! is in use. That state sits behind an async `RwLock`. Every operation takes
//! a [`Snapshot`] (pool handle plus mode) when it starts, so switching the
//! database or mode never changes the store under an in-flight request.

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{ChunkingConfig, Config};
use crate::db::{self, DatabaseInfo, DatabaseRegistry};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::ingest::{self, IngestReport, Upload};
use crate::llm::{self, LlmClient};
use crate::models::{DocumentSummary, ReembedEntry, ScoredChunk};
use crate::rag::{self, RagAnswer, RagSettings};
use crate::store::{ReembedScope, SqliteStore, VectorMode, VectorStore};

/// Characters of chunk text returned per search hit.
pub const SEARCH_TEXT_CHARS: usize = 500;

struct ActiveDatabase {
    name: String,
    pool: SqlitePool,
    mode: VectorMode,
}

/// Consistent view of the active database for one request.
#[derive(Clone)]
pub struct Snapshot {
    pub database: String,
    pub store: SqliteStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<ScoredChunk>,
    pub mode: VectorMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub vector_mode: VectorMode,
    pub current_database: String,
    pub database_path: String,
    pub embedding_model: String,
    pub text_model: &'static str,
    pub image_model: &'static str,
    pub llm_model: String,
    pub vector_dim: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub document_count: usize,
    pub chunk_count: i64,
    pub database_connected: bool,
    pub models_loaded: bool,
}

pub struct RagService {
    chunking: ChunkingConfig,
    default_top_k: usize,
    settings: RagSettings,
    registry: DatabaseRegistry,
    embedder: Embedder,
    llm: Box<dyn LlmClient>,
    active: RwLock<ActiveDatabase>,
}

impl RagService {
    /// Build the embedder and LLM client, connect the active profile and
    /// make sure its schema matches the configured vector mode.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = Embedder::from_config(&config.embedding).await;
        let llm = llm::create_client(&config.llm)?;
        Self::with_parts(config, embedder, llm).await
    }

    pub async fn with_parts(
        config: &Config,
        embedder: Embedder,
        llm: Box<dyn LlmClient>,
    ) -> Result<Self> {
        let registry = DatabaseRegistry::new(config.database.profiles.clone());
        let name = config.database.active.clone();
        let mode = config.retrieval.vector_mode;

        let pool = db::connect(registry.get(&name)?).await?;
        SqliteStore::new(pool.clone(), mode, embedder.dims())
            .ensure_schema()
            .await?;
        info!(database = %name, mode = %mode, "database ready");

        Ok(Self {
            chunking: config.chunking.clone(),
            default_top_k: config.retrieval.top_k,
            settings: RagSettings {
                max_top_k: config.retrieval.max_top_k,
                system_prompt: config.llm.system_prompt.clone(),
                prompt_template: config.llm.prompt_template.clone(),
                max_context_chars: config.llm.max_context_chars,
            },
            registry,
            embedder,
            llm,
            active: RwLock::new(ActiveDatabase { name, pool, mode }),
        })
    }

    pub async fn snapshot(&self) -> Snapshot {
        let active = self.active.read().await;
        Snapshot {
            database: active.name.clone(),
            store: SqliteStore::new(active.pool.clone(), active.mode, self.embedder.dims()),
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub async fn ingest(&self, upload: Upload<'_>) -> Result<IngestReport> {
        let snapshot = self.snapshot().await;
        ingest::ingest(&snapshot.store, &self.embedder, &self.chunking, upload).await
    }

    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<SearchResponse> {
        let snapshot = self.snapshot().await;
        let top_k = top_k.unwrap_or(self.default_top_k);
        let mut results = rag::retrieve(
            &snapshot.store,
            &self.embedder,
            query,
            top_k,
            self.settings.max_top_k,
        )
        .await?;
        for hit in &mut results {
            if let Some((byte, _)) = hit.text.char_indices().nth(SEARCH_TEXT_CHARS) {
                hit.text.truncate(byte);
            }
        }
        Ok(SearchResponse {
            query: query.trim().to_string(),
            results,
            mode: snapshot.store.mode(),
        })
    }

    pub async fn ask(&self, question: &str, top_k: Option<usize>) -> Result<RagAnswer> {
        let snapshot = self.snapshot().await;
        rag::answer(
            &snapshot.store,
            &self.embedder,
            self.llm.as_ref(),
            &self.settings,
            question,
            top_k.unwrap_or(self.default_top_k),
        )
        .await
    }

    pub async fn list(&self) -> Result<Vec<DocumentSummary>> {
        self.snapshot().await.store.list_documents().await
    }

    /// Delete a document. A missing id is a not-found error.
    pub async fn delete(&self, id: &str) -> Result<usize> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RagError::invalid("document id must not be empty"));
        }
        let deleted = self.snapshot().await.store.delete(id).await?;
        if deleted == 0 {
            return Err(RagError::NotFound(format!("document '{}' does not exist", id)));
        }
        info!(id, chunks = deleted, "deleted document");
        Ok(deleted)
    }

    /// Delete every document in the active database.
    pub async fn clear(&self) -> Result<usize> {
        let snapshot = self.snapshot().await;
        let deleted = snapshot.store.clear().await?;
        info!(database = %snapshot.database, chunks = deleted, "cleared documents");
        Ok(deleted)
    }

    pub async fn reembed(&self, scope: &ReembedScope) -> Result<Vec<ReembedEntry>> {
        let snapshot = self.snapshot().await;
        snapshot.store.reembed(scope, &self.embedder).await
    }

    pub async fn config_view(&self) -> Result<ConfigView> {
        let snapshot = self.snapshot().await;
        let profile = self.registry.get(&snapshot.database)?;
        Ok(ConfigView {
            vector_mode: snapshot.store.mode(),
            current_database: snapshot.database.clone(),
            database_path: profile.path.display().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            text_model: self.embedder.text_model_status(),
            image_model: self.embedder.image_model_status(),
            llm_model: self.llm.model_name().to_string(),
            vector_dim: self.embedder.dims(),
        })
    }

    /// Change the vector mode after adding its columns to the active database.
    /// Existing rows have no vector in the new mode until they are re-embedded.
    pub async fn set_vector_mode(&self, mode: VectorMode) -> Result<()> {
        let mut active = self.active.write().await;
        SqliteStore::new(active.pool.clone(), mode, self.embedder.dims())
            .ensure_schema()
            .await?;
        if active.mode != mode {
            info!(from = %active.mode, to = %mode, "vector mode changed");
        }
        active.mode = mode;
        Ok(())
    }

    pub async fn databases(&self) -> Vec<DatabaseInfo> {
        let active = self.active.read().await;
        self.registry.list(&active.name)
    }

    /// Make `name` the active database. Unknown names and unreachable
    /// databases leave the current one active.
    pub async fn switch_database(&self, name: &str) -> Result<DatabaseInfo> {
        let name = name.trim();
        let profile = self.registry.get(name)?.clone();
        let mode = self.active.read().await.mode;

        let pool = db::connect(&profile).await?;
        db::ping(&pool).await?;
        SqliteStore::new(pool.clone(), mode, self.embedder.dims())
            .ensure_schema()
            .await?;

        let mut active = self.active.write().await;
        let current_mode = active.mode;
        if current_mode != mode {
            SqliteStore::new(pool.clone(), current_mode, self.embedder.dims())
                .ensure_schema()
                .await?;
        }
        let previous = std::mem::replace(
            &mut *active,
            ActiveDatabase {
                name: name.to_string(),
                pool,
                mode: current_mode,
            },
        );
        info!(from = %previous.name, to = %name, "switched database");

        Ok(DatabaseInfo {
            name: name.to_string(),
            path: profile.path.display().to_string(),
            is_active: true,
        })
    }

    pub async fn status(&self) -> StatusReport {
        let snapshot = self.snapshot().await;
        let connected = db::ping(snapshot.store.pool()).await.is_ok();

        let (document_count, chunk_count) = if connected {
            let documents = snapshot.store.list_documents().await;
            let chunks = snapshot.store.count_chunks().await;
            match (documents, chunks) {
                (Ok(documents), Ok(chunks)) => (documents.len(), chunks),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "status query failed");
                    (0, 0)
                }
            }
        } else {
            (0, 0)
        };

        let models_loaded = self.embedder.text_model_status() == "loaded";
        StatusReport {
            status: if connected { "healthy" } else { "degraded" },
            document_count,
            chunk_count,
            database_connected: connected,
            models_loaded,
        }
    }
}
