//! # vecrag
//!
//! Document ingestion, vector retrieval and retrieval-augmented answering
//! over SQLite.
//!
//! Documents (text, Markdown, PDF, images) are split into overlapping
//! chunks, embedded into fixed-length vectors and stored as rows of a
//! `documents` table. Questions are answered by retrieving the nearest
//! chunks and asking an LLM to compose an answer from them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │ Extract  │──▶│  Chunk  │──▶│  Embed   │──▶│  SQLite  │
//! │ text/PDF │   │ windows │   │ model or │   │ native / │
//! └──────────┘   └─────────┘   │ fallback │   │ portable │
//!                              └──────────┘   └────┬─────┘
//!                                                  │
//!                          ┌───────────────────────┤
//!                          ▼                       ▼
//!                    ┌──────────┐            ┌──────────┐
//!                    │   RAG    │──▶ LLM     │   HTTP   │
//!                    │ answer   │            │  (axum)  │
//!                    └──────────┘            └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vecrag init
//! vecrag ingest ./docs
//! vecrag search "deployment checklist"
//! vecrag ask "How do we roll back a release?"
//! vecrag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Library error type |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text chunking |
//! | [`extract`] | Text extraction from uploads |
//! | [`embedding`] | Text/image embedding with hash fallback |
//! | [`store`] | Vector store trait and SQLite implementation |
//! | [`db`] | Connections and database profiles |
//! | [`llm`] | Chat-completion clients |
//! | [`rag`] | Retrieval and answer composition |
//! | [`ingest`] | Ingestion pipeline |
//! | [`service`] | Runtime state shared by CLI and HTTP |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI commands |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod service;
pub mod store;
