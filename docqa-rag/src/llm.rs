//! Generative model seam and an OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// Groq's OpenAI-compatible API base.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// A text-in, text-out generative model reached over the network.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, used in logs and error messages.
    fn name(&self) -> &str;

    /// Generate a completion for a single-turn prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// A [`GenerativeModel`] backed by an OpenAI-style `/chat/completions` endpoint.
///
/// Each call is bounded by the configured timeout and is not retried.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::llm::{ChatCompletionsModel, GROQ_API_BASE};
///
/// let model = ChatCompletionsModel::new(GROQ_API_BASE, "llama-3.3-70b-versatile", timeout)?
///     .with_api_key(std::env::var("GROQ_API_KEY")?);
/// let answer = model.generate("Say hi").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl ChatCompletionsModel {
    /// Create a client for `model` served at `base_url`.
    pub fn new(base_url: impl AsRef<str>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let model = model.into();
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            RagError::GenerativeModel {
                model: model.clone(),
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
            }
        })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.as_ref().trim_end_matches('/')),
            api_key: None,
            model,
            temperature: 0.0,
        })
    }

    /// Create a client from the pipeline configuration.
    pub fn from_config(config: &RagConfig, base_url: impl AsRef<str>) -> Result<Self> {
        Ok(Self::new(base_url, config.generative_model_id.clone(), config.request_timeout())?
            .with_temperature(config.temperature))
    }

    /// Send a bearer token with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = if api_key.is_empty() { None } else { Some(api_key) };
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn fail(&self, message: String, transient: bool) -> RagError {
        RagError::GenerativeModel { model: self.model.clone(), message, transient }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl GenerativeModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "requesting completion");

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(model = %self.model, error = %e, "completion request failed");
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {e}")
            };
            self.fail(message, e.is_timeout() || e.is_connect())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(model = %self.model, %status, "completion API error");
            let transient = status.is_server_error() || status.as_u16() == 429;
            return Err(self.fail(format!("API returned {status}: {detail}"), transient));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(model = %self.model, error = %e, "failed to parse completion");
            self.fail(format!("failed to parse response: {e}"), false)
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| self.fail("API returned no completion".to_string(), false))
    }
}
