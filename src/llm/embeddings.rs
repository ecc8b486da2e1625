use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Maximum characters accepted per text.
/// all-MiniLM-L6-v2 has a 256 word-piece window and English prose
/// averages ~4 chars per token, so longer inputs would be cut off by the
/// model. Chunks stay well under this at the default chunk size.
pub const MAX_EMBED_CHARS: usize = 4_000;

/// Maps text to fixed-length vectors. Same model and text give the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, stamped on every stored record.
    fn model(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed a batch, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No embedding returned".into()))
    }
}

/// Embeddings served by Ollama or an OpenAI-compatible API.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Result<Self> {
        match config.provider.as_str() {
            "ollama" | "openai" => Ok(Self { client, config }),
            other => Err(Error::Configuration(format!(
                "Unknown embedding provider: {other}"
            ))),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn map_send_error(&self, provider: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                operation: format!("{provider} embed request"),
                secs: self.config.timeout_secs,
            }
        } else {
            Error::Embedding(format!("Failed to call {provider} embed API: {e}"))
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.config.embedding_model
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((i, t)) = texts
            .iter()
            .enumerate()
            .find(|(_, t)| t.chars().count() > MAX_EMBED_CHARS)
        {
            return Err(Error::Embedding(format!(
                "Input {i} has {} characters, limit is {MAX_EMBED_CHARS}",
                t.chars().count()
            )));
        }

        let embeddings = match self.config.provider.as_str() {
            "ollama" => self.embed_ollama(texts).await?,
            _ => self.embed_openai(texts).await?,
        };

        check_embeddings(&embeddings, texts.len(), self.config.embedding_dim)?;
        Ok(embeddings)
    }
}

/// Reject replies with the wrong count or dimension.
pub fn check_embeddings(embeddings: &[Vec<f32>], expected: usize, dim: usize) -> Result<()> {
    if embeddings.len() != expected {
        return Err(Error::Embedding(format!(
            "Expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
        return Err(Error::Embedding(format!(
            "Expected dimension {dim}, got {}",
            bad.len()
        )));
    }
    Ok(())
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.config.base_url.trim_end_matches('/'));

        // Ollama supports batch embedding with the /api/embed endpoint
        let batch_size = 32;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let req = OllamaEmbedRequest {
                model: &self.config.embedding_model,
                input: chunk,
            };

            let resp = self
                .client
                .post(&url)
                .timeout(self.timeout())
                .json(&req)
                .send()
                .await
                .map_err(|e| self.map_send_error("Ollama", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Embedding(format!(
                    "Ollama embed API returned {status}: {body}"
                )));
            }

            let body: OllamaEmbedResponse = resp.json().await.map_err(|e| {
                Error::Embedding(format!("Failed to parse Ollama embed response: {e}"))
            })?;

            all_embeddings.extend(body.embeddings);
        }

        Ok(all_embeddings)
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/v1/embeddings",
            self.config.base_url.trim_end_matches('/')
        );
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let batch_size = 64;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(batch_size) {
            let req = OpenAiEmbedRequest {
                model: &self.config.embedding_model,
                input: chunk,
            };

            let resp = self
                .client
                .post(&url)
                .timeout(self.timeout())
                .header("Authorization", format!("Bearer {api_key}"))
                .json(&req)
                .send()
                .await
                .map_err(|e| self.map_send_error("OpenAI", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Embedding(format!(
                    "OpenAI embed API returned {status}: {body}"
                )));
            }

            let body: OpenAiEmbedResponse = resp.json().await.map_err(|e| {
                Error::Embedding(format!("Failed to parse OpenAI embed response: {e}"))
            })?;

            all_embeddings.extend(order_by_index(body.data));
        }

        Ok(all_embeddings)
    }
}

/// OpenAI does not promise `data` is in request order; `index` is authoritative.
fn order_by_index(mut data: Vec<OpenAiEmbedData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}
