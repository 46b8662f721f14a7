//! Core data models used throughout vecrag.
//!
//! These types represent the chunks, search results and document summaries
//! that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RagError;

/// A chunk of a source document together with its embedding.
///
/// Identity is `(id, chunk_index)`; every chunk of one document shares `id`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A search hit: chunk fields without the vector, plus its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub name: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

/// One stored document, aggregated over its chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub chunks: i64,
    pub created_at: i64,
}

/// One row touched by a re-embed pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReembedEntry {
    pub id: String,
    pub name: String,
    pub chunk_index: i64,
    pub vector_dim: usize,
}

/// How vectors are stored and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMode {
    /// JSON array column; cosine distance computed in SQL.
    #[default]
    Native,
    /// Little-endian f32 BLOB; cosine computed in-process.
    Portable,
}

impl VectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorMode::Native => "native",
            VectorMode::Portable => "portable",
        }
    }
}

impl fmt::Display for VectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(VectorMode::Native),
            "portable" => Ok(VectorMode::Portable),
            other => Err(RagError::invalid(format!(
                "unknown vector mode '{}', expected 'native' or 'portable'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_mode_parse() {
        assert_eq!("native".parse::<VectorMode>().unwrap(), VectorMode::Native);
        assert_eq!(
            " Portable ".parse::<VectorMode>().unwrap(),
            VectorMode::Portable
        );
        assert!("oracle".parse::<VectorMode>().is_err());
    }
}
