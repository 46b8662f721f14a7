//! Document ingestion: extract → chunk → embed → store.
//!
//! Every chunk of one document shares a fresh UUID v4 and gets a contiguous
//! `chunk_index` starting at 0. A document is stored and listed under its
//! title when one is given, otherwise under its file name. Images become a
//! single chunk whose text is that display name and whose vector comes from
//! the image embedder.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::extract::{self, PayloadKind};
use crate::models::Chunk;
use crate::store::VectorStore;

/// One uploaded document.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
    pub content_type: &'a str,
    pub title: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub id: String,
    pub vector_dim: usize,
    pub name: String,
    pub chunks: usize,
}

pub async fn ingest(
    store: &dyn VectorStore,
    embedder: &Embedder,
    chunking: &ChunkingConfig,
    upload: Upload<'_>,
) -> Result<IngestReport> {
    let name = upload.name.trim();
    if name.is_empty() {
        return Err(RagError::invalid("document name must not be empty"));
    }
    let name = upload
        .title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(name);
    let id = Uuid::new_v4().to_string();

    let chunks = match extract::classify(upload.content_type)? {
        PayloadKind::Image => {
            if upload.bytes.is_empty() {
                return Err(RagError::invalid("image upload is empty"));
            }
            let embedding = embedder.embed_image(upload.bytes).await;
            vec![Chunk {
                id: id.clone(),
                source_name: name.to_string(),
                chunk_index: 0,
                text: name.to_string(),
                embedding,
            }]
        }
        PayloadKind::Text | PayloadKind::Pdf => {
            let text = extract::extract_text(upload.bytes, upload.content_type)?;
            if text.trim().is_empty() {
                return Err(RagError::invalid(format!(
                    "no text could be extracted from {}",
                    name
                )));
            }
            let pieces = chunk_text(&text, chunking.chunk_size, chunking.overlap)?;
            let vectors = embedder.embed_texts(&pieces).await;
            pieces
                .into_iter()
                .zip(vectors)
                .enumerate()
                .map(|(index, (text, embedding))| Chunk {
                    id: id.clone(),
                    source_name: name.to_string(),
                    chunk_index: index as i64,
                    text,
                    embedding,
                })
                .collect()
        }
    };

    store.insert_batch(&chunks).await?;

    let report = IngestReport {
        id,
        vector_dim: embedder.dims(),
        name: name.to_string(),
        chunks: chunks.len(),
    };
    info!(id = %report.id, name = %report.name, chunks = report.chunks, "ingested document");
    Ok(report)
}

/// Files under `root` the pipeline can ingest, with their content types.
///
/// A file path is returned as-is; a directory is walked recursively and
/// files with unknown extensions are skipped.
pub fn collect_files(root: &Path) -> Result<Vec<(PathBuf, &'static str)>> {
    if !root.exists() {
        return Err(RagError::invalid(format!(
            "path does not exist: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| RagError::invalid(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match extract::content_type_for_path(entry.path()) {
            Some(content_type) => files.push((entry.path().to_path_buf(), content_type)),
            None => debug!(path = %entry.path().display(), "skipping unsupported file"),
        }
    }
    Ok(files)
}
