//! Data types for pages, chunks, and search results.

use serde::{Deserialize, Serialize};

/// A fixed-length embedding vector.
pub type Embedding = Vec<f32>;

/// Raw text of one PDF page. Immutable once extracted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number within the document.
    pub number: u32,
    /// Extracted page text.
    pub text: String,
}

impl Page {
    /// Create a page.
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self { number, text: text.into() }
    }
}

/// A bounded span of page text, the unit of retrieval.
///
/// Chunks of the same page may overlap; chunks never span pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Identifier of the form `{source}#p{page}-{chunk_index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Filename of the document this chunk came from.
    pub source: String,
    /// Page number the chunk was cut from.
    pub page: u32,
    /// Position of the chunk within its page.
    pub chunk_index: usize,
}

impl Chunk {
    /// Create a chunk and derive its id.
    pub fn new(text: String, source: &str, page: u32, chunk_index: usize) -> Self {
        Self {
            id: format!("{source}#p{page}-{chunk_index}"),
            text,
            source: source.to_string(),
            page,
            chunk_index,
        }
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}
