//! Text-completion service boundary.
//!
//! Every completion backend implements [`CompletionService`] and returns a
//! strict [`Completion`]. Provider responses arrive as loosely shaped JSON;
//! [`normalize_completion`] is the single place where that JSON is turned
//! into text, so nothing downstream has to re-check types.
//!
//! | Config Value | Service |
//! |-------------|----------|
//! | `"openai"` | [`OpenAiCompletion`] (`POST /v1/chat/completions`) |
//! | `"ollama"` | [`OllamaCompletion`] (`POST /api/chat`) |
//! | `"disabled"` | [`DisabledCompletion`] |

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::embedding::{openai_api_key, post_json_with_retry};

/// Text substituted for a provider response that carries no usable text.
pub const UNUSABLE_COMPLETION: &str =
    "[completion error] the service returned a response without usable text";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// The only shape a completion ever takes past the boundary.
///
/// `usable` is false when the provider returned no text at all; `text` then
/// holds [`UNUSABLE_COMPLETION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usable: bool,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usable: true,
        }
    }

    pub fn unusable() -> Self {
        Self {
            text: UNUSABLE_COMPLETION.to_string(),
            usable: false,
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// Convert a provider's message content into a [`Completion`].
///
/// Accepts a plain string, an array of content parts (strings or
/// `{"text": ...}` objects, concatenated), or an object carrying `text` or
/// `content`. Anything else (null, numbers, booleans, empty arrays or
/// objects) becomes [`UNUSABLE_COMPLETION`].
///
/// ```rust
/// use askdocs::completion::{normalize_completion, UNUSABLE_COMPLETION};
/// use serde_json::json;
///
/// assert_eq!(normalize_completion(&json!("Paris")).text, "Paris");
/// assert_eq!(
///     normalize_completion(&json!([{"type": "text", "text": "Par"}, "is"])).text,
///     "Paris"
/// );
/// assert_eq!(normalize_completion(&json!(null)).text, UNUSABLE_COMPLETION);
/// ```
pub fn normalize_completion(raw: &serde_json::Value) -> Completion {
    match extract_text(raw) {
        Some(text) => Completion::text(text),
        None => Completion::unusable(),
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(parts) => {
            let pieces: Vec<String> = parts.iter().filter_map(extract_text).collect();
            if pieces.is_empty() {
                None
            } else {
                Some(pieces.concat())
            }
        }
        serde_json::Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .and_then(extract_text),
        _ => None,
    }
}

// ============ OpenAI ============

pub struct OpenAiCompletion {
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let api_key = openai_api_key()?;
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let json = post_json_with_retry(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let content = json
            .pointer("/choices/0/message/content")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message"))?;
        Ok(normalize_completion(content))
    }
}

// ============ Ollama ============

pub struct OllamaCompletion {
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": options,
        });

        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;

        let content = json
            .pointer("/message/content")
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
        Ok(normalize_completion(content))
    }
}

// ============ Disabled ============

/// Fails every request. Used when `completion.provider = "disabled"`.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<Completion> {
        bail!("completion provider is disabled")
    }
}

pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionService>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompletion::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaCompletion::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
