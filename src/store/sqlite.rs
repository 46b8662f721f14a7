//! SQLite implementation of [`VectorStore`].

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info};

use super::{ReembedScope, VectorMode, VectorStore};
use crate::embedding::{blob_to_vec, cosine_similarity, l2_norm, vec_to_blob, Embedder};
use crate::error::{RagError, Result};
use crate::models::{Chunk, DocumentSummary, ReembedEntry, ScoredChunk};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (id, chunk_index)
)
"#;

const CREATE_NAME_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_documents_name ON documents(name)";

/// Per-connection table holding the query vector, keyed by component index.
const CREATE_QUERY_VECTOR: &str =
    "CREATE TEMP TABLE IF NOT EXISTS query_vector (k INTEGER PRIMARY KEY, v REAL NOT NULL)";

/// Cosine over JSON arrays against `temp.query_vector`. `?1` dims, `?2` query norm, `?3` limit.
///
/// `CROSS JOIN` keeps `json_each` as the outer loop so every component is a
/// rowid lookup into the query table.
const NATIVE_SEARCH: &str = r#"
SELECT id, name, chunk_index, text,
       CASE WHEN norm > 0 AND ?2 > 0 THEN (1.0 + dot / (norm * ?2)) / 2.0 ELSE 0.5 END AS score
FROM (
    SELECT d.rowid AS rid, d.id, d.name, d.chunk_index, d.text, d.embedding_norm AS norm,
           (SELECT TOTAL(e.value * q.v)
              FROM json_each(d.embedding) AS e
              CROSS JOIN temp.query_vector AS q ON q.k = e.key) AS dot
    FROM documents d
    WHERE d.embedding IS NOT NULL
      AND json_array_length(d.embedding) = ?1
)
ORDER BY score DESC, rid
LIMIT ?3
"#;

/// Vector store over a single SQLite `documents` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    mode: VectorMode,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, mode: VectorMode, dims: usize) -> Self {
        Self { pool, mode, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn column_names(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("PRAGMA table_info(documents)")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    async fn check_json_support(&self) -> Result<()> {
        let support: std::result::Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT json_valid('[]')")
                .fetch_one(&self.pool)
                .await;
        match support {
            Ok(1) => Ok(()),
            Ok(_) => Err(json_unsupported("json_valid returned an unexpected result")),
            Err(sqlx::Error::Database(e)) => Err(json_unsupported(e.message())),
            Err(e) => Err(e.into()),
        }
    }

    fn vector_columns(&self) -> &'static [(&'static str, &'static str)] {
        match self.mode {
            VectorMode::Native => &[("embedding", "TEXT"), ("embedding_norm", "REAL")],
            VectorMode::Portable => &[("vector", "BLOB")],
        }
    }

    async fn insert_one<'e, E>(&self, executor: E, chunk: &Chunk, now: i64) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        match self.mode {
            VectorMode::Native => {
                sqlx::query(
                    "INSERT INTO documents (id, name, chunk_index, text, created_at, embedding, embedding_norm) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.source_name)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(now)
                .bind(vector_json(&chunk.embedding)?)
                .bind(l2_norm(&chunk.embedding) as f64)
                .execute(executor)
                .await?;
            }
            VectorMode::Portable => {
                sqlx::query(
                    "INSERT INTO documents (id, name, chunk_index, text, created_at, vector) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.source_name)
                .bind(chunk.chunk_index)
                .bind(&chunk.text)
                .bind(now)
                .bind(vec_to_blob(&chunk.embedding))
                .execute(executor)
                .await?;
            }
        }
        Ok(())
    }

    async fn search_native(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        // The query table is private to this connection; the rollback empties it.
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_QUERY_VECTOR).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM temp.query_vector")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO temp.query_vector (k, v) SELECT key, value FROM json_each(?)")
            .bind(vector_json(query)?)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(NATIVE_SEARCH)
            .bind(query.len() as i64)
            .bind(l2_norm(query) as f64)
            .bind(top_k as i64)
            .fetch_all(&mut *tx)
            .await?;
        tx.rollback().await?;

        Ok(rows
            .iter()
            .map(|row| ScoredChunk {
                id: row.get("id"),
                name: row.get("name"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: row.get("score"),
            })
            .collect())
    }

    async fn search_portable(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, name, chunk_index, text, vector FROM documents \
             WHERE vector IS NOT NULL ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let vec = blob_to_vec(&blob);
                if vec.len() != query.len() {
                    return None;
                }
                Some(ScoredChunk {
                    id: row.get("id"),
                    name: row.get("name"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query, &vec) as f64,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn rows_for_scope(&self, scope: &ReembedScope) -> Result<Vec<(String, String, i64, String)>> {
        let mut out = Vec::new();
        match scope {
            ReembedScope::All => {
                let rows = sqlx::query(
                    "SELECT id, name, chunk_index, text FROM documents ORDER BY rowid",
                )
                .fetch_all(&self.pool)
                .await?;
                out.extend(rows.iter().map(row_key));
            }
            ReembedScope::Ids(ids) => {
                for id in ids {
                    let rows = sqlx::query(
                        "SELECT id, name, chunk_index, text FROM documents \
                         WHERE id = ? ORDER BY chunk_index",
                    )
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?;
                    out.extend(rows.iter().map(row_key));
                }
            }
        }
        Ok(out)
    }
}

fn row_key(row: &sqlx::sqlite::SqliteRow) -> (String, String, i64, String) {
    (
        row.get("id"),
        row.get("name"),
        row.get("chunk_index"),
        row.get("text"),
    )
}

fn vector_json(vec: &[f32]) -> Result<String> {
    serde_json::to_string(vec)
        .map_err(|e| RagError::invalid(format!("vector is not serializable: {}", e)))
}

fn json_unsupported(detail: &str) -> RagError {
    RagError::SchemaMismatch {
        message: format!(
            "native vector mode needs SQLite JSON functions, which this database lacks ({})",
            detail
        ),
        hint: "set retrieval.vector_mode = \"portable\"".to_string(),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn mode(&self) -> VectorMode {
        self.mode
    }

    async fn ensure_schema(&self) -> Result<()> {
        if self.mode == VectorMode::Native {
            self.check_json_support().await?;
        }

        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_NAME_INDEX).execute(&self.pool).await?;

        let existing = self.column_names().await?;
        for (column, ty) in self.vector_columns() {
            if !existing.contains(*column) {
                info!(column, mode = %self.mode, "adding vector column");
                sqlx::query(&format!("ALTER TABLE documents ADD COLUMN {} {}", column, ty))
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn insert(&self, chunk: &Chunk) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.insert_one(&self.pool, chunk, now).await
    }

    async fn insert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            self.insert_one(&mut *tx, chunk, now).await?;
        }
        tx.commit().await?;
        debug!(count = chunks.len(), "inserted chunks");
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        match self.mode {
            VectorMode::Native => self.search_native(query, top_k).await,
            VectorMode::Portable => self.search_portable(query, top_k).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM documents").execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn reembed(&self, scope: &ReembedScope, embedder: &Embedder) -> Result<Vec<ReembedEntry>> {
        let rows = self.rows_for_scope(scope).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = rows
            .iter()
            .map(|(_, name, _, text)| {
                if text.trim().is_empty() {
                    name.clone()
                } else {
                    text.clone()
                }
            })
            .collect();
        let vectors = embedder.embed_texts(&inputs).await;

        let mut tx = self.pool.begin().await?;
        let mut entries = Vec::with_capacity(rows.len());

        for ((id, name, chunk_index, _), vector) in rows.into_iter().zip(vectors) {
            match self.mode {
                VectorMode::Native => {
                    sqlx::query(
                        "UPDATE documents SET embedding = ?, embedding_norm = ? \
                         WHERE id = ? AND chunk_index = ?",
                    )
                    .bind(vector_json(&vector)?)
                    .bind(l2_norm(&vector) as f64)
                    .bind(&id)
                    .bind(chunk_index)
                    .execute(&mut *tx)
                    .await?;
                }
                VectorMode::Portable => {
                    sqlx::query("UPDATE documents SET vector = ? WHERE id = ? AND chunk_index = ?")
                        .bind(vec_to_blob(&vector))
                        .bind(&id)
                        .bind(chunk_index)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            entries.push(ReembedEntry {
                id,
                name,
                chunk_index,
                vector_dim: vector.len(),
            });
        }

        tx.commit().await?;
        info!(count = entries.len(), mode = %self.mode, "re-embedded chunks");
        Ok(entries)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT id, MIN(name) AS name, COUNT(*) AS chunks, MIN(created_at) AS created_at, \
                    MIN(rowid) AS first_row \
             FROM documents GROUP BY id \
             ORDER BY created_at DESC, first_row DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentSummary {
                id: row.get("id"),
                name: row.get("name"),
                chunks: row.get("chunks"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn count_chunks(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn chunk_count(&self, id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::db;

    const DIMS: usize = 64;

    async fn open(tmp: &tempfile::TempDir, mode: VectorMode) -> SqliteStore {
        let pool = db::connect(&ProfileConfig {
            path: tmp.path().join("store.sqlite"),
            max_connections: 2,
        })
        .await
        .unwrap();
        let store = SqliteStore::new(pool, mode, DIMS);
        store.ensure_schema().await.unwrap();
        store
    }

    async fn chunk(embedder: &Embedder, id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            source_name: format!("{}.txt", id),
            chunk_index: index,
            text: text.to_string(),
            embedding: embedder.embed_text(Some(text)).await,
        }
    }

    async fn roundtrip(mode: VectorMode) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, mode).await;
        let embedder = Embedder::disabled(DIMS);

        let texts = [
            "Rust ownership rules prevent data races at compile time.",
            "ZZZZ qqqq 0000 ~~~~ ||||",
            "The quarterly report covers revenue and churn.",
        ];
        for (i, text) in texts.iter().enumerate() {
            store
                .insert(&chunk(&embedder, &format!("doc{}", i), 0, text).await)
                .await
                .unwrap();
        }

        let query = embedder.embed_text(Some(texts[2])).await;
        let hits = store.search(&query, 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "doc2");
        assert!(hits[0].score > 0.9, "score was {}", hits[0].score);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_finds_own_text_native() {
        roundtrip(VectorMode::Native).await;
    }

    #[tokio::test]
    async fn test_search_finds_own_text_portable() {
        roundtrip(VectorMode::Portable).await;
    }

    #[tokio::test]
    async fn test_native_search_cost_is_linear_in_dims() {
        let tmp = tempfile::TempDir::new().unwrap();
        let native = open(&tmp, VectorMode::Native).await;
        let embedder = Embedder::disabled(512);

        let mut batch = Vec::new();
        for i in 0..300 {
            let text = match i {
                123 => "Quarterly revenue grew in the northern region.".to_string(),
                7 => "Zebras graze quietly at dawn!".to_string(),
                _ => format!("document body {}", i),
            };
            batch.push(chunk(&embedder, &format!("doc{}", i), 0, &text).await);
        }
        native.insert_batch(&batch).await.unwrap();

        let portable = SqliteStore::new(native.pool().clone(), VectorMode::Portable, 512);
        portable.ensure_schema().await.unwrap();
        portable.reembed(&ReembedScope::All, &embedder).await.unwrap();

        let query = embedder
            .embed_text(Some("Quarterly revenue grew in the northern region."))
            .await;

        let started = std::time::Instant::now();
        let native_hits = native.search(&query, 5).await.unwrap();
        let native_time = started.elapsed();

        let started = std::time::Instant::now();
        let portable_hits = portable.search(&query, 5).await.unwrap();
        let portable_time = started.elapsed();

        assert_eq!(native_hits[0].id, "doc123");
        assert_eq!(portable_hits[0].id, "doc123");
        assert!(
            native_time < portable_time * 50 + std::time::Duration::from_secs(2),
            "native={:?} portable={:?}",
            native_time,
            portable_time
        );

        // A second search on the same connection sees only the new query.
        let again = native
            .search(&embedder.embed_text(Some("Zebras graze quietly at dawn!")).await, 1)
            .await
            .unwrap();
        assert_eq!(again[0].id, "doc7");
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Native).await;
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        let columns = store.column_names().await.unwrap();
        assert!(columns.contains("embedding"));
        assert!(columns.contains("embedding_norm"));
        assert!(!columns.contains("vector"));

        let portable = SqliteStore::new(store.pool().clone(), VectorMode::Portable, DIMS);
        portable.ensure_schema().await.unwrap();
        let columns = portable.column_names().await.unwrap();
        assert!(columns.contains("vector"));
        assert!(columns.contains("embedding"));
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Portable).await;
        let embedder = Embedder::disabled(DIMS);
        let c = chunk(&embedder, "dup", 0, "same").await;
        store.insert(&c).await.unwrap();
        let err = store.insert(&c).await.unwrap_err();
        assert_eq!(err.code(), "database_error");
        assert_eq!(store.count_chunks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_all_chunks_of_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Native).await;
        let embedder = Embedder::disabled(DIMS);

        let mut batch = Vec::new();
        for i in 0..3 {
            batch.push(chunk(&embedder, "a", i, &format!("alpha part {}", i)).await);
        }
        store.insert_batch(&batch).await.unwrap();
        store.insert(&chunk(&embedder, "b", 0, "beta").await).await.unwrap();

        assert_eq!(store.count_chunks().await.unwrap(), 4);
        assert_eq!(store.chunk_count("a").await.unwrap(), 3);

        assert_eq!(store.delete("a").await.unwrap(), 3);
        assert_eq!(store.count_chunks().await.unwrap(), 1);
        assert_eq!(store.delete("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_empties_table_and_keeps_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Portable).await;
        let embedder = Embedder::disabled(DIMS);

        store.insert(&chunk(&embedder, "a", 0, "alpha").await).await.unwrap();
        store.insert(&chunk(&embedder, "a", 1, "alpha two").await).await.unwrap();
        store.insert(&chunk(&embedder, "b", 0, "beta").await).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
        assert!(store.list_documents().await.unwrap().is_empty());
        assert_eq!(store.clear().await.unwrap(), 0);

        store.insert(&chunk(&embedder, "a", 0, "alpha again").await).await.unwrap();
        assert_eq!(store.count_chunks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_skips_rows_without_current_mode_vector() {
        let tmp = tempfile::TempDir::new().unwrap();
        let native = open(&tmp, VectorMode::Native).await;
        let embedder = Embedder::disabled(DIMS);
        native
            .insert(&chunk(&embedder, "n", 0, "native only").await)
            .await
            .unwrap();

        let portable = SqliteStore::new(native.pool().clone(), VectorMode::Portable, DIMS);
        portable.ensure_schema().await.unwrap();
        let query = embedder.embed_text(Some("native only")).await;
        assert!(portable.search(&query, 5).await.unwrap().is_empty());

        // Filling the portable column makes the row visible.
        let entries = portable
            .reembed(&ReembedScope::All, &embedder)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vector_dim, DIMS);
        let hits = portable.search(&query, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_search_skips_other_dimensionality() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Native).await;
        let small = Embedder::disabled(8);
        store.insert(&chunk(&small, "s", 0, "tiny").await).await.unwrap();

        let query = Embedder::disabled(DIMS).embed_text(Some("tiny")).await;
        assert!(store.search(&query, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Portable).await;
        let embedder = Embedder::disabled(DIMS);
        for id in ["first", "second", "third"] {
            store
                .insert(&chunk(&embedder, id, 0, "identical text").await)
                .await
                .unwrap();
        }
        let query = embedder.embed_text(Some("identical text")).await;
        let ids: Vec<String> = store
            .search(&query, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_reembed_selected_ids_uses_name_for_empty_text() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Native).await;
        let embedder = Embedder::disabled(DIMS);
        let mut image = chunk(&embedder, "img", 0, "").await;
        image.source_name = "diagram.png".to_string();
        store.insert(&image).await.unwrap();
        store.insert(&chunk(&embedder, "other", 0, "text").await).await.unwrap();

        let entries = store
            .reembed(&ReembedScope::Ids(vec!["img".to_string()]), &embedder)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "diagram.png");

        let query = embedder.embed_text(Some("diagram.png")).await;
        let hits = store.search(&query, 1).await.unwrap();
        assert_eq!(hits[0].id, "img");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_list_documents() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = open(&tmp, VectorMode::Portable).await;
        let embedder = Embedder::disabled(DIMS);
        store
            .insert_batch(&[
                chunk(&embedder, "a", 0, "one").await,
                chunk(&embedder, "a", 1, "two").await,
            ])
            .await
            .unwrap();
        store.insert(&chunk(&embedder, "b", 0, "three").await).await.unwrap();

        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        let a = docs.iter().find(|d| d.id == "a").unwrap();
        assert_eq!(a.chunks, 2);
        assert_eq!(a.name, "a.txt");
        assert!(a.created_at > 0);
    }
}
