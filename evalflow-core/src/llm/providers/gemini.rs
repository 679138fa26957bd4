//! Gemini LLM provider implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{DEFAULT_BASE_URL, DEFAULT_MODEL, GatewayConfig};
use crate::error::{EvalFlowError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, MessageRole, ModelInfo, TokenUsage};

/// Google Gemini provider using the `generateContent` REST endpoint.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key
    /// * `model` - Model name (e.g., "models/gemini-2.5-flash")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `GEMINI_API_KEY` - API key (required)
    /// - `GEMINI_MODEL` - Model name (optional, defaults to "models/gemini-2.5-flash")
    ///
    /// # Errors
    ///
    /// Returns an error if GEMINI_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            EvalFlowError::Configuration("GEMINI_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("GEMINI_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self::new(api_key, model))
    }

    /// Provider for the gateway section's model, endpoint and timeout
    pub fn from_config(config: &GatewayConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::new(api_key, config.model.clone())
            .with_base_url(config.base_url.clone())
            .with_timeout(config.timeout)
    }

    /// Use a custom endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Apply a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                EvalFlowError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(self)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str) -> String {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        format!("{}/{}:generateContent", self.base_url, model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize)]
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

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

fn build_request(request: &LLMRequest) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in &request.messages {
        let part = GeminiPart {
            text: Some(message.content.clone()),
        };
        match message.role {
            MessageRole::System => system_parts.push(part),
            MessageRole::User => contents.push(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![part],
            }),
            MessageRole::Assistant => contents.push(GeminiContent {
                role: Some("model".to_string()),
                parts: vec![part],
            }),
        }
    }

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        },
        generation_config: GeminiGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop_sequences.clone(),
        },
    }
}

fn parse_response(response: GeminiResponse) -> Result<LLMResponse> {
    let content = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .ok_or_else(|| EvalFlowError::gateway("Gemini API returned no candidates"))?;

    let usage = response.usage_metadata.map(|u| TokenUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    Ok(LLMResponse { content, usage })
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = self.endpoint(model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&build_request(request))
            .send()
            .await
            .map_err(|e| {
                EvalFlowError::gateway(format!("Failed to send request to Gemini: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EvalFlowError::gateway_status(
                status.as_u16(),
                format!("Gemini API error ({}): {}", status, text),
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            EvalFlowError::gateway(format!("Failed to parse Gemini response: {}", e))
        })?;

        parse_response(gemini_response)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "gemini".to_string(),
            model_name: self.model.clone(),
        }
    }
}
