//! Storage abstraction for chunk rows and their vectors.
//!
//! The [`VectorStore`] trait covers everything the pipeline needs from a
//! database: schema management, inserts, similarity search, deletion, clearing,
//! re-embedding and listing. [`SqliteStore`] is the implementation; it
//! stores vectors according to a [`VectorMode`]:
//!
//! | Mode | Column(s) | Similarity |
//! |------|-----------|------------|
//! | `native` | `embedding TEXT` (JSON array), `embedding_norm REAL` | cosine in SQL via `json_each`, score `(1 + cos) / 2` |
//! | `portable` | `vector BLOB` (little-endian f32) | cosine in-process over a full scan |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

mod sqlite;

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::models::{Chunk, DocumentSummary, ReembedEntry, ScoredChunk};

pub use crate::models::VectorMode;
pub use sqlite::SqliteStore;

/// Which rows a re-embed pass touches.
#[derive(Debug, Clone)]
pub enum ReembedScope {
    All,
    Ids(Vec<String>),
}

impl ReembedScope {
    /// Parse a comma-separated id list; blank input means every document.
    pub fn from_list(list: Option<&str>) -> Self {
        let ids: Vec<String> = list
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            ReembedScope::All
        } else {
            ReembedScope::Ids(ids)
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The vector mode this store reads and writes.
    fn mode(&self) -> VectorMode;

    /// Create the table if needed and add the current mode's vector columns.
    /// Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<()>;

    /// Append one chunk. A duplicate `(id, chunk_index)` is an error.
    async fn insert(&self, chunk: &Chunk) -> Result<()>;

    /// Append many chunks atomically.
    async fn insert_batch(&self, chunks: &[Chunk]) -> Result<()>;

    /// The `top_k` chunks nearest to `query`, best first. Ties keep insertion order.
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk of a document. Returns the number of rows removed.
    async fn delete(&self, id: &str) -> Result<usize>;

    /// Remove every chunk of every document. Returns the number of rows removed.
    async fn clear(&self) -> Result<usize>;

    /// Recompute and store vectors for the rows in `scope`.
    async fn reembed(&self, scope: &ReembedScope, embedder: &Embedder) -> Result<Vec<ReembedEntry>>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Total number of chunk rows.
    async fn count_chunks(&self) -> Result<i64>;

    /// Number of chunk rows belonging to document `id`.
    async fn chunk_count(&self, id: &str) -> Result<i64>;
}
