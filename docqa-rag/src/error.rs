//! Error types for the `docqa-rag` crate.

use thiserror::Error;

/// Errors that can occur while ingesting a document or answering a question.
#[derive(Debug, Error)]
pub enum RagError {
    /// The uploaded PDF bytes could not be read or written.
    #[error("Upload I/O error ({filename}): {message}")]
    UploadIo {
        /// The uploaded document's filename.
        filename: String,
        /// A description of the failure.
        message: String,
    },

    /// The PDF was read but yielded no usable text.
    #[error("Content extraction error ({filename}): {message}")]
    ContentExtraction {
        /// The document that produced no text.
        filename: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether the failure came from the transport (timeout, connection, 5xx).
        transient: bool,
    },

    /// No index has been persisted yet.
    #[error("No PDF has been processed yet. Please upload and process a PDF first.")]
    IndexNotFound,

    /// The persisted index was built with a different embedding model or dimension.
    #[error(
        "Incompatible index: built with {found_model} ({found_dimensions} dims), \
         expected {expected_model} ({expected_dimensions} dims). Re-upload the document."
    )]
    IncompatibleIndex {
        /// Embedding model id recorded in the index manifest.
        found_model: String,
        /// Vector dimension recorded in the index manifest.
        found_dimensions: usize,
        /// Embedding model id currently configured.
        expected_model: String,
        /// Vector dimension produced by the configured embedder.
        expected_dimensions: usize,
    },

    /// The downstream generative model call failed or timed out.
    #[error("Generative model error ({model}): {message}")]
    GenerativeModel {
        /// The generative model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
        /// Whether the failure came from the transport (timeout, connection, 5xx).
        transient: bool,
    },

    /// Reading or writing the persisted index failed, or the artifact is corrupt.
    #[error("Index store error ({path}): {message}")]
    IndexStore {
        /// The index directory involved.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// Caller input was rejected before any work was done.
    #[error("{0}")]
    InvalidInput(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Only transport faults of the two remote models are retryable; everything
    /// else needs caller action (new upload, different input, new config).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding { transient, .. } | Self::GenerativeModel { transient, .. } => {
                *transient
            }
            _ => false,
        }
    }

    pub(crate) fn store(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::IndexStore { path: path.as_ref().display().to_string(), message: message.into() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_model_faults_are_retryable() {
        let transient = RagError::Embedding {
            provider: "test".into(),
            message: "timed out".into(),
            transient: true,
        };
        let malformed = RagError::Embedding {
            provider: "test".into(),
            message: "bad input".into(),
            transient: false,
        };
        assert!(transient.is_retryable());
        assert!(!malformed.is_retryable());
        assert!(!RagError::IndexNotFound.is_retryable());
    }

    #[test]
    fn index_not_found_reads_as_user_message() {
        assert_eq!(
            RagError::IndexNotFound.to_string(),
            "No PDF has been processed yet. Please upload and process a PDF first."
        );
    }
}
