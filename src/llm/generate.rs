use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Text generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Send a prompt and return the top candidate's text.
    ///
    /// `Ok(None)` means the provider answered successfully but the reply had
    /// no usable text. Non-2xx replies and transport failures are errors.
    async fn generate(&self, prompt: &str) -> Result<Option<String>>;
}

/// Gemini `generateContent` or an OpenAI-compatible chat completion, non-streaming.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl HttpGenerator {
    pub fn new(client: reqwest::Client, config: GenerationConfig) -> Result<Self> {
        match config.provider.as_str() {
            "gemini" | "openai" => Ok(Self { client, config }),
            other => Err(Error::Configuration(format!(
                "Unknown generation provider: {other}"
            ))),
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        request: reqwest::RequestBuilder,
        body: &T,
    ) -> Result<String> {
        let resp = request
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "generation request".into(),
                        secs: self.config.timeout_secs,
                    }
                } else {
                    Error::Generation(format!("Failed to reach {}: {e}", self.config.provider))
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Generation(format!(
                "{} API returned {status}: {text}",
                self.config.provider
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<Option<String>> {
        let base = self.config.base_url.trim_end_matches('/');
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        match self.config.provider.as_str() {
            "gemini" => {
                let url = format!("{base}/models/{}:generateContent", self.config.model);
                let req = GeminiRequest {
                    contents: vec![GeminiContent {
                        role: Some("user".into()),
                        parts: vec![GeminiPart {
                            text: Some(prompt.to_string()),
                        }],
                    }],
                };
                let request = self.client.post(&url).query(&[("key", api_key)]);
                let body = self.post(request, &req).await?;
                Ok(parse_gemini_reply(&body))
            }
            _ => {
                let url = format!("{base}/v1/chat/completions");
                let req = OpenAiChatRequest {
                    model: &self.config.model,
                    messages: vec![OpenAiMessage {
                        role: "user".into(),
                        content: Some(prompt.to_string()),
                    }],
                    stream: false,
                };
                let request = self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Bearer {api_key}"));
                let body = self.post(request, &req).await?;
                Ok(parse_openai_reply(&body))
            }
        }
    }
}

// ─── Gemini ──────────────────────────────────────────────

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

/// Text of `candidates[0].content.parts[0]`, or None if absent or blank.
fn parse_gemini_reply(body: &str) -> Option<String> {
    let resp: GeminiResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Malformed Gemini response: {e}");
            return None;
        }
    };
    resp.candidates
        .into_iter()
        .next()?
        .content
        .parts
        .into_iter()
        .next()?
        .text
        .filter(|t| !t.trim().is_empty())
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

fn parse_openai_reply(body: &str) -> Option<String> {
    let resp: OpenAiChatResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Malformed chat completion response: {e}");
            return None;
        }
    };
    resp.choices
        .into_iter()
        .next()?
        .message
        .content
        .filter(|t| !t.trim().is_empty())
}
