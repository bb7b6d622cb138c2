//! Text generation capability
//!
//! The planner only ever needs one operation: prompt in, text out.
//! [`OpenAiGenerator`] implements it against any OpenAI-compatible
//! chat-completions endpoint.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prompt-to-text capability
#[async_trait]
pub trait TextGeneration: Send + Sync {
    /// Generate text for a prompt
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Report whether the provider is usable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Generation provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Chat-completions endpoint
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Completion token cap
    pub max_tokens: u32,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retries on rate limiting
    pub max_retries: u32,
    /// First backoff delay in milliseconds (doubles per retry)
    pub initial_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 2048,
            request_timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 2000,
        }
    }
}

impl GenerationConfig {
    /// With model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// With endpoint
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Backoff before the given retry (1-based)
    #[inline]
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions provider
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    config: GenerationConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    /// Create provider with an explicit API key
    pub fn new(config: GenerationConfig, api_key: Option<String>) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Create provider reading the API key from `config.api_key_env`
    ///
    /// A missing key is not an error here; calls fail with
    /// [`GenerationError::NotConfigured`] and health reports false.
    pub fn from_env(config: GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no API key set for text generation");
        }
        Self::new(config, api_key)
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::NotConfigured(format!("{} is not set", self.config.api_key_env))
        })?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            stream: false,
        };

        let mut retry_count = 0;
        loop {
            let response = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    GenerationError::Transport(format!("failed to parse provider response: {e}"))
                })?;
                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(GenerationError::EmptyResponse);
            }

            if status.as_u16() == 429 {
                if retry_count >= self.config.max_retries {
                    return Err(GenerationError::RateLimited {
                        attempts: retry_count + 1,
                    });
                }
                retry_count += 1;
                let delay = self.config.backoff(retry_count);
                tracing::warn!(
                    retry = retry_count,
                    max = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "generation provider rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(GenerationError::Provider {
                status: status.as_u16(),
                message: truncate(&text, 512),
            });
        }
    }
}

#[async_trait]
impl TextGeneration for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tracing::debug!(model = %self.config.model, prompt_len = prompt.len(), "generating");
        self.complete(prompt, self.config.max_tokens).await
    }

    async fn health_check(&self) -> bool {
        if self.api_key.is_none() {
            return false;
        }
        match self.complete("ping", 1).await {
            Ok(_) | Err(GenerationError::EmptyResponse) => true,
            Err(e) => {
                tracing::debug!(error = %e, "generation health check failed");
                false
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}
