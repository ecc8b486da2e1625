//! Retrieval and answer service.
//!
//! A query is embedded with the same model used at ingestion, the top-K
//! chunks are fetched from the index, and a prompt grounded on those chunks
//! is sent to the generator. Only records stamped with the same embedding
//! model are candidates; scores across models are not comparable.

use std::fmt::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{ScoredRecord, VectorIndex};
use crate::llm::{Embedder, Generator};
use crate::models::Answer;

/// Returned when nothing relevant was retrieved, and the reply the model is
/// told to give when the context does not hold the answer.
pub const FALLBACK_ANSWER: &str = "Sorry, I couldn't find that in the document.";

/// Returned when the generator replies without usable text.
pub const NO_RESPONSE: &str = "No response generated.";

pub struct AnswerService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl AnswerService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            top_k: top_k.max(1),
        }
    }

    pub async fn answer(&self, query: &str) -> Result<Answer> {
        // ── Step 1: Validate ──────────────────────────────────
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("Missing message field in body.".into()));
        }

        // ── Step 2: Retrieve ──────────────────────────────────
        let hits = self.retrieve(query).await?;
        if hits.is_empty() {
            tracing::info!("No chunks retrieved for query, returning fallback");
            return Ok(Answer {
                text: FALLBACK_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        // ── Step 3: Generate ──────────────────────────────────
        let prompt = build_prompt(&hits, query);
        let text = match self.generator.generate(&prompt).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::warn!("Generator returned no usable text");
                NO_RESPONSE.to_string()
            }
            Err(e @ (Error::Generation(_) | Error::Timeout { .. })) => return Err(e),
            Err(e) => return Err(Error::Generation(e.to_string())),
        };

        Ok(Answer {
            text,
            sources: hits.into_iter().map(ScoredRecord::into_source).collect(),
        })
    }

    /// Top-K hits for `query` embedded with the service's model.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredRecord>> {
        let vector = self.embedder.embed(query).await.map_err(|e| match e {
            Error::Timeout { .. } => e,
            other => Error::Retrieval(format!("query embedding failed: {other}")),
        })?;

        let model = self.embedder.model();
        let hits = self
            .index
            .query(&vector, self.top_k, Some(model))
            .await
            .map_err(|e| Error::Retrieval(e.to_string()))?;

        tracing::debug!("Retrieved {} chunks (k={})", hits.len(), self.top_k);
        Ok(hits)
    }
}

/// Grounding prompt: preamble, retrieved chunk texts verbatim, the fallback
/// instruction, then the user question.
pub fn build_prompt(hits: &[ScoredRecord], query: &str) -> String {
    let mut prompt = String::from(
        "You are a helpful AI Assistant.\n\
         Answer the user's query strictly based on the following PDF context.\n\n\
         Context:\n",
    );

    for (i, hit) in hits.iter().enumerate() {
        let source = hit
            .metadata
            .get("source")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        let _ = match hit.metadata.get("page_number").and_then(|p| p.as_u64()) {
            Some(page) => writeln!(prompt, "--- [{}] {source}, page {page} ---", i + 1),
            None => writeln!(prompt, "--- [{}] {source} ---", i + 1),
        };
        prompt.push_str(&hit.text);
        prompt.push_str("\n\n");
    }

    let _ = write!(
        prompt,
        "If the answer is not available in the context, reply: \"{FALLBACK_ANSWER}\"\n\n\
         User question: {query}"
    );
    prompt
}
