//! CLI command implementations.
//!
//! Each `run_*` function opens the service for the loaded configuration,
//! performs one operation and prints a plain-text result to stdout. Logs go
//! to stderr, so stdout stays parseable.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::ingest::{self, Upload};
use crate::rag::{snippet, SNIPPET_CHARS};
use crate::service::RagService;
use crate::store::ReembedScope;

pub async fn run_init(config: &Config) -> Result<()> {
    RagService::open(config).await?;
    println!(
        "Database initialized successfully ({}, {} mode).",
        config.database.active, config.retrieval.vector_mode
    );
    Ok(())
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    title: Option<&str>,
    content_type: Option<&str>,
) -> Result<()> {
    let service = RagService::open(config).await?;

    let files = if path.is_file() {
        let detected = match content_type {
            Some(ct) => ct.to_string(),
            None => crate::extract::content_type_for_path(path)
                .map(str::to_string)
                .with_context(|| {
                    format!(
                        "cannot tell the content type of {}; pass --content-type",
                        path.display()
                    )
                })?,
        };
        vec![(path.to_path_buf(), detected)]
    } else {
        if title.is_some() || content_type.is_some() {
            bail!("--title and --content-type only apply when ingesting a single file");
        }
        ingest::collect_files(path)?
            .into_iter()
            .map(|(p, ct)| (p, ct.to_string()))
            .collect()
    };

    let mut ingested = 0usize;
    let mut failed = 0usize;

    for (file, content_type) in &files {
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());

        let upload = Upload {
            name: &name,
            bytes: &bytes,
            content_type,
            title,
        };
        match service.ingest(upload).await {
            Ok(report) => {
                ingested += 1;
                println!(
                    "ingested {}: id={} chunks={} dims={}",
                    report.name, report.id, report.chunks, report.vector_dim
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("skipped {}: {}", file.display(), e);
            }
        }
    }

    println!("ingested documents: {}", ingested);
    if failed > 0 {
        println!("skipped documents: {}", failed);
    }
    if ingested == 0 && failed > 0 {
        bail!("no documents were ingested");
    }
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let service = RagService::open(config).await?;
    let response = service.search(query, top_k).await?;

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} #{} ({})",
            i + 1,
            hit.score,
            hit.name,
            hit.chunk_index,
            hit.id
        );
        println!("    {}", snippet(&hit.text, SNIPPET_CHARS).replace('\n', " "));
    }
    Ok(())
}

pub async fn run_ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let service = RagService::open(config).await?;
    let answer = service.ask(question, top_k).await?;

    println!("{}", answer.answer.trim());
    println!();
    println!("Sources:");
    for source in &answer.sources {
        println!(
            "  - {} #{} (score {:.4})",
            source.name, source.chunk_index, source.score
        );
    }
    println!(
        "model: {}  embed: {}ms  retrieve: {}ms  generate: {}ms  total: {}ms",
        answer.model,
        answer.timings.embed_ms,
        answer.timings.retrieve_ms,
        answer.timings.generate_ms,
        answer.timings.total_ms
    );
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let service = RagService::open(config).await?;
    let documents = service.list().await?;

    for doc in &documents {
        let created = chrono::DateTime::from_timestamp(doc.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{}  {}  chunks={}  {}", doc.id, doc.name, doc.chunks, created);
    }
    println!("documents: {}", documents.len());
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let service = RagService::open(config).await?;
    let deleted = service.delete(id).await?;
    println!("deleted {}: {} chunks", id, deleted);
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let service = RagService::open(config).await?;
    let deleted = service.clear().await?;
    println!("cleared chunks: {}", deleted);
    Ok(())
}

pub async fn run_reembed(config: &Config, ids: Option<&str>) -> Result<()> {
    let service = RagService::open(config).await?;
    let entries = service.reembed(&ReembedScope::from_list(ids)).await?;
    println!("re-embedded chunks: {}", entries.len());
    Ok(())
}

pub async fn run_databases(config: &Config) -> Result<()> {
    let service = RagService::open(config).await?;
    for db in service.databases().await {
        let marker = if db.is_active { "*" } else { " " };
        println!("{} {}  {}", marker, db.name, db.path);
    }
    Ok(())
}

pub async fn run_config(config: &Config) -> Result<()> {
    let service = RagService::open(config).await?;
    let view = service.config_view().await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
