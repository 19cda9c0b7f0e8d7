//! Optional external completion backend
//!
//! The chat path asks a [`CompletionBackend`] first when one is configured
//! and falls back to local generation whenever it returns `None`. Failures
//! never cross this boundary as errors.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Pass/fail text completion capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Completion for `prompt`, or `None` when unavailable for any reason.
    async fn complete(&self, prompt: &str) -> Option<String>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// External backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Consult the backend before local generation
    #[serde(default)]
    pub enabled: bool,
    /// OpenAI-compatible API root (".../v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Hard limit for one completion, after which local generation is used
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key (optional for local servers)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    80
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_api_key_env() -> String {
    "ARIANNA_API_KEY".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// OpenAI-compatible `/chat/completions` client
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            debug!("No API key in ${}; sending unauthenticated requests", config.api_key_env);
        }
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        let response = builder
            .json(&request)
            .send()
            .await
            .context("Failed to send completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Completion API error ({}): {}", status, body);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse completion response")?;
        Ok(extract_content(&body))
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, prompt: &str) -> Option<String> {
        match self.request(prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                debug!("Backend returned an empty completion");
                None
            }
            Err(e) => {
                warn!("Backend completion failed: {:#}", e);
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// `choices[0].message.content` as a string or a list of text parts.
fn extract_content(body: &serde_json::Value) -> String {
    let content = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}
