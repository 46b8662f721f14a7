//! Retrieval-augmented answering.
//!
//! [`answer`] runs the query pipeline:
//!
//! ```text
//! question ─► embed ─► store.search(top_k) ─► context ─► prompt ─► LLM ─► RagAnswer
//! ```
//!
//! The context lists every retrieved chunk as `[Source: <name>]\n<text>`,
//! separated by blank lines. The answer is the raw LLM reply; it is not
//! checked against the sources.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::llm::LlmClient;
use crate::models::ScoredChunk;
use crate::store::VectorStore;

/// Characters of chunk text kept in a source snippet.
pub const SNIPPET_CHARS: usize = 200;

/// Prompt and limit settings for [`answer`].
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub max_top_k: usize,
    pub system_prompt: String,
    pub prompt_template: String,
    pub max_context_chars: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub chunk_index: i64,
    pub score: f64,
    pub snippet: String,
}

/// Wall-clock milliseconds per stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Timings {
    pub embed_ms: u64,
    pub retrieve_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub model: String,
    pub timings: Timings,
}

pub fn validate_top_k(top_k: usize, max_top_k: usize) -> Result<()> {
    if top_k == 0 || top_k > max_top_k {
        return Err(RagError::invalid(format!(
            "top_k must be between 1 and {}, got {}",
            max_top_k, top_k
        )));
    }
    Ok(())
}

/// Embed `query` and return the `top_k` nearest chunks.
pub async fn retrieve(
    store: &dyn VectorStore,
    embedder: &Embedder,
    query: &str,
    top_k: usize,
    max_top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() {
        return Err(RagError::invalid("query must not be empty"));
    }
    validate_top_k(top_k, max_top_k)?;
    let vector = embedder.embed_text(Some(query)).await;
    store.search(&vector, top_k).await
}

/// Answer `question` from the `top_k` most similar chunks.
pub async fn answer(
    store: &dyn VectorStore,
    embedder: &Embedder,
    llm: &dyn LlmClient,
    settings: &RagSettings,
    question: &str,
    top_k: usize,
) -> Result<RagAnswer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::invalid("question must not be empty"));
    }
    validate_top_k(top_k, settings.max_top_k)?;
    if !llm.is_enabled() {
        return Err(RagError::upstream("llm", "LLM provider is disabled"));
    }

    let started = Instant::now();

    let stage = Instant::now();
    let vector = embedder.embed_text(Some(question)).await;
    let embed_ms = elapsed_ms(stage);

    let stage = Instant::now();
    let hits = store.search(&vector, top_k).await?;
    let retrieve_ms = elapsed_ms(stage);
    debug!(hits = hits.len(), top_k, "retrieved context");

    let context = build_context(&hits, settings.max_context_chars);
    let prompt = render_prompt(&settings.prompt_template, &context, question);

    let stage = Instant::now();
    let reply = llm.complete(&settings.system_prompt, &prompt).await?;
    let generate_ms = elapsed_ms(stage);

    let timings = Timings {
        embed_ms,
        retrieve_ms,
        generate_ms,
        total_ms: elapsed_ms(started),
    };
    info!(
        model = llm.model_name(),
        sources = hits.len(),
        total_ms = timings.total_ms,
        "answered question"
    );

    Ok(RagAnswer {
        query: question.to_string(),
        answer: reply,
        sources: hits.iter().map(to_source).collect(),
        model: llm.model_name().to_string(),
        timings,
    })
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn to_source(hit: &ScoredChunk) -> Source {
    Source {
        id: hit.id.clone(),
        name: hit.name.clone(),
        chunk_index: hit.chunk_index,
        score: hit.score,
        snippet: snippet(&hit.text, SNIPPET_CHARS),
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// Render retrieved chunks as the LLM context, optionally capped in characters.
pub fn build_context(hits: &[ScoredChunk], max_chars: Option<usize>) -> String {
    let context = hits
        .iter()
        .map(|hit| format!("[Source: {}]\n{}", hit.name, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    match max_chars {
        Some(limit) => match context.char_indices().nth(limit) {
            Some((byte, _)) => context[..byte].to_string(),
            None => context,
        },
        None => context,
    }
}

/// Substitute `{context}` and `{question}` in one pass, so placeholder text
/// inside documents or questions is left alone.
pub fn render_prompt(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;

    loop {
        let next_context = rest.find("{context}");
        let next_question = rest.find("{question}");
        let (pos, placeholder, value) = match (next_context, next_question) {
            (Some(c), Some(q)) if c < q => (c, "{context}", context),
            (Some(_), Some(q)) => (q, "{question}", question),
            (Some(c), None) => (c, "{context}", context),
            (None, Some(q)) => (q, "{question}", question),
            (None, None) => break,
        };
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + placeholder.len()..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_PROMPT_TEMPLATE, DEFAULT_SYSTEM_PROMPT};
    use crate::embedding::Embedder;
    use crate::llm::DisabledLlm;
    use crate::models::{Chunk, DocumentSummary, ReembedEntry};
    use crate::store::{ReembedScope, VectorMode};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn hit(name: &str, text: &str) -> ScoredChunk {
        ScoredChunk {
            id: "id".to_string(),
            name: name.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 0.5,
        }
    }

    fn settings() -> RagSettings {
        RagSettings {
            max_top_k: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            max_context_chars: None,
        }
    }

    /// Store returning fixed hits and counting searches.
    struct FixedStore {
        hits: Vec<ScoredChunk>,
        searches: Mutex<usize>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        fn mode(&self) -> VectorMode {
            VectorMode::Portable
        }
        async fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }
        async fn insert(&self, _chunk: &Chunk) -> Result<()> {
            Ok(())
        }
        async fn insert_batch(&self, _chunks: &[Chunk]) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
            *self.searches.lock().unwrap() += 1;
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
        async fn delete(&self, _id: &str) -> Result<usize> {
            Ok(0)
        }
        async fn clear(&self) -> Result<usize> {
            Ok(0)
        }
        async fn reembed(&self, _s: &ReembedScope, _e: &Embedder) -> Result<Vec<ReembedEntry>> {
            Ok(Vec::new())
        }
        async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
            Ok(Vec::new())
        }
        async fn count_chunks(&self) -> Result<i64> {
            Ok(self.hits.len() as i64)
        }
        async fn chunk_count(&self, _id: &str) -> Result<i64> {
            Ok(0)
        }
    }

    /// LLM that echoes the prompt it was given.
    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            Ok(user.to_string())
        }
    }

    fn store(hits: Vec<ScoredChunk>) -> FixedStore {
        FixedStore {
            hits,
            searches: Mutex::new(0),
        }
    }

    #[test]
    fn test_context_format() {
        let context = build_context(&[hit("a.txt", "alpha"), hit("b.pdf", "beta")], None);
        assert_eq!(context, "[Source: a.txt]\nalpha\n\n[Source: b.pdf]\nbeta");
    }

    #[test]
    fn test_context_cap() {
        let context = build_context(&[hit("a.txt", "alpha")], Some(10));
        assert_eq!(context, "[Source: a");
    }

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("short", 200), "short");
        let long = "é".repeat(250);
        let s = snippet(&long, 200);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), 203);
        assert_eq!(snippet(&"x".repeat(200), 200), "x".repeat(200));
    }

    #[test]
    fn test_render_prompt_single_pass() {
        let rendered = render_prompt(
            "Q: {question}\nC: {context}\nQ again: {question}",
            "doc mentions {question}",
            "why?",
        );
        assert_eq!(
            rendered,
            "Q: why?\nC: doc mentions {question}\nQ again: why?"
        );
    }

    #[test]
    fn test_default_template_rendering() {
        let rendered = render_prompt(DEFAULT_PROMPT_TEMPLATE, "CTX", "What?");
        assert!(rendered.starts_with("Context from documents:\nCTX\n\nQuestion: What?"));
    }

    #[tokio::test]
    async fn test_answer_returns_sources_and_prompt() {
        let store = store(vec![hit("guide.md", "The answer is 42."), hit("faq.md", "No.")]);
        let embedder = Embedder::disabled(16);
        let result = answer(&store, &embedder, &EchoLlm, &settings(), "  What is it? ", 2)
            .await
            .unwrap();

        assert_eq!(result.query, "What is it?");
        assert_eq!(result.model, "echo");
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0].name, "guide.md");
        assert!(result.answer.contains("[Source: guide.md]\nThe answer is 42."));
        assert!(result.answer.contains("Question: What is it?"));
        assert!(result.timings.total_ms >= result.timings.generate_ms);
    }

    #[tokio::test]
    async fn test_answer_rejects_bad_input_before_retrieval() {
        let store = store(vec![hit("a", "b")]);
        let embedder = Embedder::disabled(16);

        let err = answer(&store, &embedder, &EchoLlm, &settings(), "  ", 5)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        let err = answer(&store, &embedder, &EchoLlm, &settings(), "q", 21)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        let err = answer(&store, &embedder, &EchoLlm, &settings(), "q", 0)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        assert_eq!(*store.searches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_llm_fails_before_retrieval() {
        let store = store(vec![hit("a", "b")]);
        let embedder = Embedder::disabled(16);
        let err = answer(&store, &embedder, &DisabledLlm, &settings(), "q", 5)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "upstream_error");
        assert_eq!(*store.searches.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_validates() {
        let store = store(vec![hit("a", "b")]);
        let embedder = Embedder::disabled(16);
        assert!(retrieve(&store, &embedder, "", 5, 20).await.is_err());
        assert_eq!(retrieve(&store, &embedder, "q", 5, 20).await.unwrap().len(), 1);
    }
}
