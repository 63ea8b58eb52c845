//! Streaming chat completions against an OpenAI-compatible API.

use crate::config::ProviderConfig;
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Text deltas in arrival order. An `Err` item means the stream broke after it
/// had started.
pub type TextStream = BoxStream<'static, anyhow::Result<String>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Fails before any text is produced if the request cannot be opened.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream>;

    fn is_configured(&self) -> bool;
}

pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not found in env vars, analysis requests will fail");
        }
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("model provider API key is not configured"))?;

        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        tracing::debug!(model = %self.model, messages = messages.len(), "Opening completion stream");

        let response = self
            .client
            .post(self.endpoint())
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .context("failed to reach model provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("model provider error ({}): {}", status, text);
        }

        let mut buffer: Vec<u8> = Vec::new();
        let stream = response.bytes_stream().flat_map(move |chunk| {
            let mut items: Vec<anyhow::Result<String>> = Vec::new();
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    // Split on raw bytes so multi-byte characters cut across
                    // network chunks are decoded whole.
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        match parse_sse_line(&String::from_utf8_lossy(&line)) {
                            SseLine::Delta(text) => items.push(Ok(text)),
                            SseLine::Error(message) => {
                                items.push(Err(anyhow!("model provider error: {message}")))
                            }
                            SseLine::Done | SseLine::Ignore => {}
                        }
                    }
                }
                Err(e) => items.push(Err(anyhow!(e).context("completion stream interrupted"))),
            }
            futures::stream::iter(items)
        });

        Ok(stream.boxed())
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, PartialEq)]
pub enum SseLine {
    Delta(String),
    Error(String),
    Done,
    Ignore,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Interprets one line of the provider's server-sent event stream.
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
        return SseLine::Ignore;
    };
    if let Some(error) = event.error {
        return SseLine::Error(error.message);
    }
    event
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|text| !text.is_empty())
        .map(SseLine::Delta)
        .unwrap_or(SseLine::Ignore)
}
