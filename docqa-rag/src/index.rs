//! Incrementally built vector index with exact cosine search.
//!
//! A [`VectorIndex`] owns `(Chunk, vector)` pairs in insertion order. The
//! first batch of an ingestion creates it and later batches append, see
//! [`create_or_append`] and [`IndexBuilder`]. Vectors live in one flat
//! row-major buffer, which is also the persisted layout.

use serde::{Deserialize, Serialize};

use crate::document::{Chunk, Embedding, SearchResult};
use crate::error::{RagError, Result};

/// Similarity metric the index was built with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity; higher is closer.
    #[default]
    Cosine,
}

/// An owned, append-only collection of chunks and their vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimensions: usize,
    metric: DistanceMetric,
    chunks: Vec<Chunk>,
    vectors: Vec<f32>,
}

/// One embedded chunk, as produced by the embedding stage.
pub type IndexEntry = (Chunk, Embedding);

impl VectorIndex {
    /// Create an empty index for vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, metric: DistanceMetric::Cosine, chunks: Vec::new(), vectors: Vec::new() }
    }

    /// Create an index from its first batch, sized to that batch.
    pub fn from_batch(dimensions: usize, batch: Vec<IndexEntry>) -> Result<Self> {
        let mut index = Self {
            dimensions,
            metric: DistanceMetric::Cosine,
            chunks: Vec::with_capacity(batch.len()),
            vectors: Vec::with_capacity(batch.len() * dimensions),
        };
        index.add(batch)?;
        Ok(index)
    }

    /// Rebuild an index from persisted parts.
    pub(crate) fn from_parts(
        dimensions: usize,
        metric: DistanceMetric,
        chunks: Vec<Chunk>,
        vectors: Vec<f32>,
    ) -> Result<Self> {
        if vectors.len() != chunks.len() * dimensions {
            return Err(RagError::InvalidInput(format!(
                "{} vector components do not match {} chunks of {dimensions} dimensions",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(Self { dimensions, metric, chunks, vectors })
    }

    /// Append a batch, preserving every entry already present.
    ///
    /// The batch is checked as a whole before anything is appended, so a
    /// rejected batch leaves the index unchanged.
    pub fn add(&mut self, batch: Vec<IndexEntry>) -> Result<()> {
        if let Some((chunk, vector)) = batch.iter().find(|(_, v)| v.len() != self.dimensions) {
            return Err(RagError::InvalidInput(format!(
                "vector for chunk '{}' has {} dimensions, index expects {}",
                chunk.id,
                vector.len(),
                self.dimensions
            )));
        }

        self.chunks.reserve(batch.len());
        self.vectors.reserve(batch.len() * self.dimensions);
        for (chunk, vector) in batch {
            self.chunks.push(chunk);
            self.vectors.extend_from_slice(&vector);
        }
        Ok(())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Vector dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Similarity metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Stored chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The flat row-major vector buffer.
    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// The vector stored for entry `i`.
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dimensions)?;
        self.vectors.get(start..start + self.dimensions)
    }

    /// Return the `top_k` entries most similar to `query`, nearest first.
    ///
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(RagError::InvalidInput(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimensions)
            .map(|row| match self.metric {
                DistanceMetric::Cosine => cosine_similarity(row, query),
            })
            .enumerate()
            .collect();

        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.chunks[i].clone(), score })
            .collect())
    }
}

/// Fold a batch into the index: create it from the batch when absent,
/// append otherwise.
pub fn create_or_append(
    index: Option<VectorIndex>,
    dimensions: usize,
    batch: Vec<IndexEntry>,
) -> Result<VectorIndex> {
    match index {
        None => VectorIndex::from_batch(dimensions, batch),
        Some(mut index) => {
            index.add(batch)?;
            Ok(index)
        }
    }
}

/// Accumulates batches of one ingestion pass into a single index.
///
/// Owns the batch it is given, so the caller's buffers are released as soon
/// as [`fold`](IndexBuilder::fold) returns.
#[derive(Debug)]
pub struct IndexBuilder {
    dimensions: usize,
    index: Option<VectorIndex>,
    batches: usize,
}

impl IndexBuilder {
    /// Start a new, empty build.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, index: None, batches: 0 }
    }

    /// Fold one batch into the growing index. Empty batches are ignored.
    pub fn fold(&mut self, batch: Vec<IndexEntry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.index = Some(create_or_append(self.index.take(), self.dimensions, batch)?);
        self.batches += 1;
        Ok(())
    }

    /// Number of batches folded so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Number of entries folded so far.
    pub fn len(&self) -> usize {
        self.index.as_ref().map_or(0, VectorIndex::len)
    }

    /// Whether nothing has been folded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finish the build. `None` when no batch was folded.
    pub fn finish(self) -> Option<VectorIndex> {
        self.index
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
