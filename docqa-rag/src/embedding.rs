//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::document::Embedding;
use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations must be deterministic for a fixed [`model_id`](EmbeddingProvider::model_id):
/// the same text always maps to the same vector. Batch boundaries carry no
/// meaning; `embed_batch(a ++ b)` equals `embed_batch(a) ++ embed_batch(b)`.
///
/// The provider is constructed once by the application and passed to the
/// pipeline, so tests can substitute a fake.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embedding vectors for a batch of text inputs, 1:1 and in order.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Identifier of the model; persisted with the index.
    fn model_id(&self) -> &str;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Check that a provider answered a batch of `expected` inputs with exactly
/// `expected` vectors of the advertised dimension.
pub(crate) fn validate_batch(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    embeddings: &[Embedding],
) -> Result<()> {
    if embeddings.len() != expected {
        return Err(RagError::Embedding {
            provider: provider.model_id().to_string(),
            message: format!("expected {expected} embeddings, got {}", embeddings.len()),
            transient: false,
        });
    }
    let dimensions = provider.dimensions();
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimensions) {
        return Err(RagError::Embedding {
            provider: provider.model_id().to_string(),
            message: format!("expected {dimensions}-dimension vectors, got {}", bad.len()),
            transient: false,
        });
    }
    Ok(())
}
