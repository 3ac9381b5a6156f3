//! Generation model clients (text and vision).
//!
//! Defines the [`ChatModel`] and [`VisionModel`] traits and two backends
//! implementing both:
//! - **[`OpenAiChat`]** — OpenAI-compatible `/chat/completions`, images
//!   sent as base64 data URLs.
//! - **[`OllamaChat`]** — local Ollama `/api/chat`, images sent via the
//!   `images` field.
//!
//! Transient failures (HTTP 429/5xx, network errors) are retried with
//! exponential backoff; other client errors fail immediately. Timeouts
//! come from the `[generation]`/`[vision]` config sections and surface
//! as ordinary invocation failures; callers never retry beyond this
//! layer.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;

/// Speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One role-tagged message of a model prompt.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Text generation: one completion over an ordered message sequence.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Vision: describe one image given a text instruction.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, prompt: &str, image: &[u8], mime: &str) -> Result<String>;
}

/// Create a [`ChatModel`] from a `[generation]` config section.
pub fn create_chat_model(config: &ModelConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config))),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Create a [`VisionModel`] from a `[vision]` config section.
pub fn create_vision_model(config: &ModelConfig) -> Result<Arc<dyn VisionModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config))),
        other => bail!("Unknown vision provider: {}", other),
    }
}

/// POST a JSON request with retry/backoff, returning the response JSON.
///
/// Retry strategy matches the embedding clients: 429 and 5xx retry with
/// exponential backoff (1s, 2s, 4s, ... capped at 32s), other 4xx fail
/// immediately, network errors retry.
async fn send_json_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} call failed after retries", label)))
}

// ============ OpenAI-compatible backend ============

/// Chat/vision client for the OpenAI API (or any compatible gateway via
/// a `url` override). Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    config: ModelConfig,
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            config: config.clone(),
        })
    }

    fn base_url(&self) -> &str {
        self.config.url.as_deref().unwrap_or("https://api.openai.com/v1")
    }

    async fn request(&self, messages: serde_json::Value) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        });

        let url = format!("{}/chat/completions", self.base_url());
        let json = send_json_with_retry(
            || {
                client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            self.config.max_retries,
            "OpenAI",
        )
        .await?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing message content"))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let payload: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        self.request(serde_json::Value::Array(payload)).await
    }
}

#[async_trait]
impl VisionModel for OpenAiChat {
    async fn describe(&self, prompt: &str, image: &[u8], mime: &str) -> Result<String> {
        let data_url = format!("data:{};base64,{}", mime, BASE64.encode(image));

        let payload = serde_json::json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }]);

        self.request(payload).await
    }
}

// ============ Ollama backend ============

/// Chat/vision client for a local Ollama instance (default
/// `http://localhost:11434`). Vision requires a multimodal model to be
/// pulled (e.g. `ollama pull llava`).
pub struct OllamaChat {
    config: ModelConfig,
}

impl OllamaChat {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn base_url(&self) -> &str {
        self.config.url.as_deref().unwrap_or("http://localhost:11434")
    }

    async fn request(&self, messages: serde_json::Value) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
        });

        let url = format!("{}/api/chat", self.base_url());
        let json = send_json_with_retry(
            || {
                client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            self.config.max_retries,
            "Ollama",
        )
        .await?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message content"))
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let payload: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        self.request(serde_json::Value::Array(payload)).await
    }
}

#[async_trait]
impl VisionModel for OllamaChat {
    async fn describe(&self, prompt: &str, image: &[u8], _mime: &str) -> Result<String> {
        let payload = serde_json::json!([{
            "role": "user",
            "content": prompt,
            "images": [BASE64.encode(image)],
        }]);

        self.request(payload).await
    }
}
