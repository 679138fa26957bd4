//! Model gateway and LLM provider abstraction
//!
//! Providers implement [`LLMProvider`] and report failures as errors. The
//! [`ModelGateway`] sits in front of a provider and never fails outward: any
//! provider error, or a missing provider, becomes a [`Generation::Degraded`]
//! carrying tagged placeholder text and the reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::error::{EvalFlowError, Result};

pub mod providers;
pub mod retry;

pub use providers::GeminiProvider;
pub use retry::{RetryConfig, with_retry};

/// Prefix marking placeholder text produced instead of a real generation
pub const MOCKED_TAG: &str = "[MOCKED_RESPONSE]";

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Request to an LLM provider
#[derive(Debug, Clone)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Model override; providers use their configured model when `None`
    pub model: Option<String>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl LLMRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message {
                role: MessageRole::User,
                content: prompt.into(),
            }],
            model: None,
            temperature: None,
            max_tokens: None,
            stop_sequences: Vec::new(),
        }
    }

    /// Set the model for this request
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature for this request
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Trait for LLM provider implementations.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a response for a structured request
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Generate text for a single user prompt
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.generate_request(&LLMRequest::from_prompt(prompt)).await?;
        Ok(response.content)
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Outcome of a gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Text produced by the model
    Generated { text: String },
    /// Placeholder text produced because the model could not be reached
    Degraded { text: String, reason: String },
}

impl Generation {
    /// Successful generation
    pub fn generated(text: impl Into<String>) -> Self {
        Generation::Generated { text: text.into() }
    }

    /// Degraded generation with a reason
    pub fn degraded(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Generation::Degraded {
            text: text.into(),
            reason: reason.into(),
        }
    }

    /// The text, whether generated or placeholder
    pub fn text(&self) -> &str {
        match self {
            Generation::Generated { text } | Generation::Degraded { text, .. } => text,
        }
    }

    /// Consume into the text
    pub fn into_text(self) -> String {
        match self {
            Generation::Generated { text } | Generation::Degraded { text, .. } => text,
        }
    }

    /// Whether this is a placeholder
    pub fn is_degraded(&self) -> bool {
        matches!(self, Generation::Degraded { .. })
    }

    /// Degradation reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Generation::Generated { .. } => None,
            Generation::Degraded { reason, .. } => Some(reason),
        }
    }

    /// Transform the text, keeping the variant
    pub fn map_text(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Generation::Generated { text } => Generation::Generated { text: f(text) },
            Generation::Degraded { text, reason } => Generation::Degraded {
                text: f(text),
                reason,
            },
        }
    }
}

/// First `n` characters of `s`, never splitting a UTF-8 sequence
fn head(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Placeholder used when no provider is configured
pub fn mocked_placeholder(prompt: &str) -> String {
    format!("{} {}", MOCKED_TAG, head(prompt, 80))
}

/// Placeholder used when the provider call failed
pub fn error_placeholder(error: &str, prompt: &str) -> String {
    format!(
        "{} Error: {} - Input: {}",
        MOCKED_TAG,
        head(error, 50),
        head(prompt, 50)
    )
}

/// Front door to the generative model.
///
/// Cheap to clone; clones share the underlying provider.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Option<Arc<dyn LLMProvider>>,
    retry: RetryConfig,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("provider", &self.provider.as_ref().map(|p| p.model_info().provider))
            .field("retry", &self.retry)
            .finish()
    }
}

impl ModelGateway {
    /// Gateway backed by a provider
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider: Some(provider),
            retry: RetryConfig::no_retry(),
        }
    }

    /// Gateway with no provider; every call degrades to placeholder text
    pub fn offline() -> Self {
        Self {
            provider: None,
            retry: RetryConfig::no_retry(),
        }
    }

    /// Build from configuration.
    ///
    /// Without an API key (config or `GEMINI_API_KEY`) the gateway is offline.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let retry = RetryConfig::from_gateway(config);
        match config.resolve_api_key() {
            Some(api_key) => {
                let provider = GeminiProvider::from_config(config, api_key)?;
                tracing::info!(model = %config.model, "Model gateway configured");
                Ok(Self::new(Arc::new(provider)).with_retry(retry))
            }
            None => {
                tracing::warn!("GEMINI_API_KEY not set, model gateway running offline");
                Ok(Self::offline().with_retry(retry))
            }
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether a provider is configured
    pub fn is_offline(&self) -> bool {
        self.provider.is_none()
    }

    /// Generate text with the provider's configured model
    pub async fn generate(&self, prompt: &str) -> Generation {
        self.call(LLMRequest::from_prompt(prompt), prompt).await
    }

    /// Generate text with an explicit model id
    pub async fn generate_with_model(&self, prompt: &str, model_id: &str) -> Generation {
        self.call(LLMRequest::from_prompt(prompt).with_model(model_id), prompt)
            .await
    }

    async fn call(&self, request: LLMRequest, prompt: &str) -> Generation {
        let Some(provider) = &self.provider else {
            return Generation::degraded(mocked_placeholder(prompt), "missing credentials");
        };

        let transient = |e: &EvalFlowError| e.is_transient(&self.retry.retryable_status_codes);
        match with_retry(&self.retry, transient, || provider.generate_request(&request)).await {
            Ok(response) => {
                if let Some(usage) = &response.usage {
                    tracing::debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Model call completed"
                    );
                }
                Generation::generated(response.content)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "Model call failed, returning placeholder");
                Generation::degraded(error_placeholder(&reason, prompt), reason)
            }
        }
    }
}
