//! Embedding provider for OpenAI-compatible `/embeddings` endpoints.
//!
//! Works against OpenAI itself and against self-hosted servers that expose
//! the same API for sentence-transformer models (text-embeddings-inference,
//! Ollama, vLLM, LocalAI).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RagConfig;
use crate::document::Embedding;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Default base URL: a local text-embeddings-inference server.
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "http://127.0.0.1:8080/v1";

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// Every request is bounded by the configured timeout and is never retried;
/// a timeout surfaces as a transient [`RagError::Embedding`].
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAiCompatibleEmbedder;
///
/// let provider = OpenAiCompatibleEmbedder::new(
///     "http://127.0.0.1:8080/v1",
///     "sentence-transformers/all-MiniLM-L6-v2",
///     384,
///     Duration::from_secs(30),
/// )?;
/// let embedding = provider.embed("hello world").await?;
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiCompatibleEmbedder {
    /// Create a provider for `model` served at `base_url`.
    pub fn new(
        base_url: impl AsRef<str>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            RagError::Embedding {
                provider: model.clone(),
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
            }
        })?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.as_ref().trim_end_matches('/')),
            api_key: None,
            model,
            dimensions,
        })
    }

    /// Create a provider from the pipeline configuration.
    pub fn from_config(config: &RagConfig, base_url: impl AsRef<str>) -> Result<Self> {
        Self::new(
            base_url,
            config.embedding_model_id.clone(),
            config.embedding_dimensions,
            config.request_timeout(),
        )
    }

    /// Send a bearer token with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = if api_key.is_empty() { None } else { Some(api_key) };
        self
    }

    fn fail(&self, message: String, transient: bool) -> RagError {
        RagError::Embedding { provider: self.model.clone(), message, transient }
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        debug!(model = %self.model, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| self.fail("API returned empty response".into(), false))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(batch_size = texts.len(), model = %self.model, "embedding batch");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(model = %self.model, error = %e, "embedding request failed");
            self.fail(format!("request failed: {e}"), e.is_timeout() || e.is_connect())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(model = %self.model, %status, "embedding API error");
            let transient = status.is_server_error() || status.as_u16() == 429;
            return Err(self.fail(format!("API returned {status}: {detail}"), transient));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(model = %self.model, error = %e, "failed to parse embedding response");
            self.fail(format!("failed to parse response: {e}"), false)
        })?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
