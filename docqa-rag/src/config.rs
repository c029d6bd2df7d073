//! Configuration for ingestion and question answering.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default embedding model, a 384-dimension sentence transformer.
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Dimensionality of [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Default generative model served by Groq.
pub const DEFAULT_GENERATIVE_MODEL: &str = "llama-3.3-70b-versatile";

/// Configuration parameters for the document QA pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Boundary markers tried in order when splitting page text.
    /// An empty string means "split between any two characters".
    pub separators: Vec<String>,
    /// Number of chunks embedded and folded into the index at a time.
    pub batch_size: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Identifier of the embedding model; recorded in the persisted index.
    pub embedding_model_id: String,
    /// Vector dimension produced by the embedding model.
    pub embedding_dimensions: usize,
    /// Identifier of the generative model used to compose answers.
    pub generative_model_id: String,
    /// Sampling temperature passed to the generative model.
    pub temperature: f32,
    /// Directory holding the persisted index artifact.
    pub index_path: PathBuf,
    /// Directory uploaded PDFs are written to before ingestion.
    pub upload_dir: PathBuf,
    /// Upper bound for a single remote model call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 150,
            separators: ["\n\n", "\n", ".", " ", ""].iter().map(|s| s.to_string()).collect(),
            batch_size: 32,
            top_k: 4,
            embedding_model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            generative_model_id: DEFAULT_GENERATIVE_MODEL.to_string(),
            temperature: 0.0,
            index_path: PathBuf::from("vector_store"),
            upload_dir: PathBuf::from("uploaded_docs"),
            request_timeout_secs: 60,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// The per-call timeout for remote model requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Replace the ordered separator list.
    pub fn separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Set the embedding batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the embedding model id and the dimension it produces.
    pub fn embedding_model(mut self, id: impl Into<String>, dimensions: usize) -> Self {
        self.config.embedding_model_id = id.into();
        self.config.embedding_dimensions = dimensions;
        self
    }

    /// Set the generative model id.
    pub fn generative_model(mut self, id: impl Into<String>) -> Self {
        self.config.generative_model_id = id.into();
        self
    }

    /// Set the generative model temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the index artifact directory.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_path = path.into();
        self
    }

    /// Set the upload directory.
    pub fn upload_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = path.into();
        self
    }

    /// Set the remote call timeout in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `batch_size == 0` or `top_k == 0`
    /// - `embedding_dimensions == 0`
    /// - a model id is blank
    /// - the separator list is empty
    /// - `request_timeout_secs == 0`
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.batch_size == 0 {
            return Err(RagError::Config("batch_size must be greater than zero".to_string()));
        }
        if config.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if config.embedding_dimensions == 0 {
            return Err(RagError::Config(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if config.embedding_model_id.trim().is_empty() {
            return Err(RagError::Config("embedding_model_id must not be empty".to_string()));
        }
        if config.generative_model_id.trim().is_empty() {
            return Err(RagError::Config("generative_model_id must not be empty".to_string()));
        }
        if config.separators.is_empty() {
            return Err(RagError::Config("separators must not be empty".to_string()));
        }
        if config.request_timeout_secs == 0 {
            return Err(RagError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 150);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.separators, vec!["\n\n", "\n", ".", " ", ""]);
        assert_eq!(config.embedding_dimensions, 384);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::Config(msg) if msg.contains("chunk_overlap")));
    }

    #[test]
    fn rejects_zero_batch_and_top_k() {
        assert!(RagConfig::builder().batch_size(0).build().is_err());
        assert!(RagConfig::builder().top_k(0).build().is_err());
    }

    #[test]
    fn rejects_empty_separator_list() {
        let err = RagConfig::builder().separators(Vec::<String>::new()).build().unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
