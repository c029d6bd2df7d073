//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable; `.env` is
//! loaded before parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use docqa_rag::{
    DEFAULT_EMBEDDING_BASE_URL, GROQ_API_BASE, RagConfig,
    config::{DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATIVE_MODEL},
};

/// Settings for the HTTP layer.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Origins allowed by CORS.
    pub cors_origins: Vec<HeaderValue>,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            cors_origins: vec![HeaderValue::from_static("http://localhost:5173")],
            body_limit: 64 * 1024 * 1024,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "docqa")]
#[command(about = "Ask questions about an uploaded PDF", long_about = None)]
#[command(version)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "DOCQA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "DOCQA_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Allowed CORS origins, comma separated
    #[arg(
        long,
        env = "DOCQA_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173"
    )]
    pub cors_origins: Vec<String>,

    /// Maximum upload size in MiB
    #[arg(long, env = "DOCQA_BODY_LIMIT_MB", default_value_t = 64)]
    pub body_limit_mb: usize,

    /// Directory holding the persisted index
    #[arg(long, env = "DOCQA_INDEX_PATH", default_value = "vector_store")]
    pub index_path: PathBuf,

    /// Directory uploads are saved to
    #[arg(long, env = "DOCQA_UPLOAD_DIR", default_value = "uploaded_docs")]
    pub upload_dir: PathBuf,

    /// Maximum chunk size in characters
    #[arg(long, env = "DOCQA_CHUNK_SIZE", default_value_t = 800)]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, env = "DOCQA_CHUNK_OVERLAP", default_value_t = 150)]
    pub chunk_overlap: usize,

    /// Chunks embedded per batch
    #[arg(long, env = "DOCQA_BATCH_SIZE", default_value_t = 32)]
    pub batch_size: usize,

    /// Chunks retrieved per question
    #[arg(long, env = "DOCQA_TOP_K", default_value_t = 4)]
    pub top_k: usize,

    /// Embedding model id
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,

    /// Embedding vector dimension
    #[arg(long, env = "DOCQA_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    pub embedding_dimensions: usize,

    /// OpenAI-compatible embeddings endpoint base
    #[arg(long, env = "EMBEDDING_BASE_URL", default_value = DEFAULT_EMBEDDING_BASE_URL)]
    pub embedding_base_url: String,

    /// Bearer token for the embeddings endpoint
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Chat model id
    #[arg(long, env = "DOCQA_LLM_MODEL", default_value = DEFAULT_GENERATIVE_MODEL)]
    pub llm_model: String,

    /// OpenAI-compatible chat completions endpoint base
    #[arg(long, env = "LLM_BASE_URL", default_value = GROQ_API_BASE)]
    pub llm_base_url: String,

    /// Groq API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "DOCQA_TEMPERATURE", default_value_t = 0.0)]
    pub temperature: f32,

    /// Timeout for each remote model call, in seconds
    #[arg(long, env = "DOCQA_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,
}

impl ServerArgs {
    /// The validated pipeline configuration.
    pub fn rag_config(&self) -> docqa_rag::Result<RagConfig> {
        RagConfig::builder()
            .chunk_size(self.chunk_size)
            .chunk_overlap(self.chunk_overlap)
            .batch_size(self.batch_size)
            .top_k(self.top_k)
            .embedding_model(self.embedding_model.clone(), self.embedding_dimensions)
            .generative_model(self.llm_model.clone())
            .temperature(self.temperature)
            .index_path(self.index_path.clone())
            .upload_dir(self.upload_dir.clone())
            .request_timeout_secs(self.request_timeout_secs)
            .build()
    }

    /// CORS and body limit settings.
    pub fn http_settings(&self) -> anyhow::Result<HttpSettings> {
        let cors_origins = self
            .cors_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin '{origin}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(HttpSettings { cors_origins, body_limit: self.body_limit_mb * 1024 * 1024 })
    }

    /// The socket address to bind.
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid host/port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let args = ServerArgs::try_parse_from(["docqa"]).unwrap();
        assert_eq!(args.rag_config().unwrap(), RagConfig::default());
        assert_eq!(args.listen_addr().unwrap().to_string(), "127.0.0.1:8000");

        let http = args.http_settings().unwrap();
        assert_eq!(http.cors_origins, vec![HeaderValue::from_static("http://localhost:5173")]);
        assert_eq!(http.body_limit, 64 * 1024 * 1024);
    }

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::try_parse_from([
            "docqa",
            "--port",
            "9000",
            "--top-k",
            "8",
            "--cors-origins",
            "http://a.test,http://b.test",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.rag_config().unwrap().top_k, 8);
        assert_eq!(args.http_settings().unwrap().cors_origins.len(), 2);
    }

    #[test]
    fn invalid_chunking_is_rejected() {
        let args =
            ServerArgs::try_parse_from(["docqa", "--chunk-size", "100", "--chunk-overlap", "200"])
                .unwrap();
        assert!(args.rag_config().is_err());
    }
}
