//! Durable storage for the vector index.
//!
//! Layout under the index directory:
//!
//! ```text
//! CURRENT               name of the live generation
//! <generation>/
//!     manifest.json     format version, model id, dimensions, count, source
//!     chunks.json       chunk metadata in insertion order
//!     vectors.bin       little-endian f32, row-major, count * dimensions
//! ```
//!
//! A persist writes a complete new generation and flushes it to disk, then
//! replaces `CURRENT` by renaming a synced temporary file over it. Readers only follow `CURRENT`, so they
//! see either the previous index or the new one, never a partial write. The
//! previous generation is kept so a reader that resolved `CURRENT` just before
//! a swap can finish; older ones are pruned. A reader still loading a
//! generation two swaps old can lose it mid-load and reports an
//! [`RagError::IndexStore`] error; with a single writer that window is one
//! full ingestion wide.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::Chunk;
use crate::error::{RagError, Result};
use crate::index::{DistanceMetric, VectorIndex};

/// Version of the on-disk layout.
pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.json";
const VECTORS_FILE: &str = "vectors.bin";
const GENERATION_PREFIX: &str = "gen-";

/// Metadata describing a persisted index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// On-disk layout version.
    pub format_version: u32,
    /// Embedding model the vectors were produced with.
    pub embedding_model_id: String,
    /// Vector dimension.
    pub dimensions: usize,
    /// Similarity metric.
    pub metric: DistanceMetric,
    /// Number of entries.
    pub count: usize,
    /// Filename of the document the index was built from.
    pub source: String,
    /// When the index was persisted.
    pub built_at: DateTime<Utc>,
}

/// A persisted index loaded for querying.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    /// The manifest the index was loaded with.
    pub manifest: IndexManifest,
    /// The search-ready index.
    pub index: VectorIndex,
}

/// Result of opening the index store: either a loaded index or nothing yet.
#[derive(Debug, Clone)]
pub enum IndexHandle {
    /// A fully persisted index.
    Loaded(LoadedIndex),
    /// No ingestion has ever completed.
    Absent,
}

impl IndexHandle {
    /// Convert to the loaded index, mapping `Absent` to [`RagError::IndexNotFound`].
    pub fn into_loaded(self) -> Result<LoadedIndex> {
        match self {
            Self::Loaded(loaded) => Ok(loaded),
            Self::Absent => Err(RagError::IndexNotFound),
        }
    }

    /// Whether an index is present.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Reads and writes the index artifact directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `root`. Nothing is touched until the first call.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The index directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `index` as the new live generation, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexStore`] if any file cannot be written. On
    /// error the previously live index stays live.
    pub async fn persist(
        &self,
        index: &VectorIndex,
        embedding_model_id: &str,
        source: &str,
    ) -> Result<IndexManifest> {
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model_id: embedding_model_id.to_string(),
            dimensions: index.dimensions(),
            metric: index.metric(),
            count: index.len(),
            source: source.to_string(),
            built_at: Utc::now(),
        };

        let generation = format!("{GENERATION_PREFIX}{}", Uuid::new_v4().simple());
        let dir = self.root.join(&generation);
        if let Err(e) = self.write_generation(&dir, index, &manifest).await {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e);
        }

        // An unreadable CURRENT must not block replacing it.
        let previous = self.current_generation().await.ok().flatten();
        if let Err(e) = self.swap_current(&generation).await {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e);
        }

        info!(
            path = %self.root.display(),
            %generation,
            count = manifest.count,
            source,
            "persisted index"
        );

        self.prune(&generation, previous.as_deref()).await;
        Ok(manifest)
    }

    /// Load the live index, checking it against the configured embedder.
    ///
    /// # Errors
    ///
    /// - [`RagError::IncompatibleIndex`] if the index was built with a
    ///   different model id or dimension.
    /// - [`RagError::IndexStore`] if the artifact is unreadable or its files
    ///   disagree with the manifest.
    pub async fn load(&self, expected_model: &str, expected_dimensions: usize) -> Result<IndexHandle> {
        let Some(generation) = self.current_generation().await? else {
            debug!(path = %self.root.display(), "no persisted index");
            return Ok(IndexHandle::Absent);
        };
        let dir = self.root.join(&generation);

        let manifest = self.read_manifest(&dir).await?;
        if manifest.dimensions != expected_dimensions || manifest.embedding_model_id != expected_model
        {
            return Err(RagError::IncompatibleIndex {
                found_model: manifest.embedding_model_id,
                found_dimensions: manifest.dimensions,
                expected_model: expected_model.to_string(),
                expected_dimensions,
            });
        }

        let chunks_path = dir.join(CHUNKS_FILE);
        let bytes = read(&chunks_path).await?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::store(&chunks_path, format!("invalid chunk metadata: {e}")))?;

        let vectors_path = dir.join(VECTORS_FILE);
        let bytes = read(&vectors_path).await?;
        if bytes.len() % 4 != 0 {
            return Err(RagError::store(&vectors_path, "vector file is truncated"));
        }
        let vectors: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        if chunks.len() != manifest.count {
            return Err(RagError::store(
                &chunks_path,
                format!("manifest lists {} entries, found {}", manifest.count, chunks.len()),
            ));
        }
        let index =
            VectorIndex::from_parts(manifest.dimensions, manifest.metric, chunks, vectors)
                .map_err(|e| RagError::store(&vectors_path, e.to_string()))?;

        debug!(path = %dir.display(), count = index.len(), "loaded index");
        Ok(IndexHandle::Loaded(LoadedIndex { manifest, index }))
    }

    /// Read the live manifest without loading vectors.
    pub async fn manifest(&self) -> Result<Option<IndexManifest>> {
        match self.current_generation().await? {
            Some(generation) => self.read_manifest(&self.root.join(generation)).await.map(Some),
            None => Ok(None),
        }
    }

    async fn write_generation(
        &self,
        dir: &Path,
        index: &VectorIndex,
        manifest: &IndexManifest,
    ) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RagError::store(dir, format!("failed to create directory: {e}")))?;

        let mut vector_bytes = Vec::with_capacity(index.raw_vectors().len() * 4);
        for value in index.raw_vectors() {
            vector_bytes.extend_from_slice(&value.to_le_bytes());
        }
        write(&dir.join(VECTORS_FILE), &vector_bytes).await?;
        drop(vector_bytes);

        let chunks = serde_json::to_vec(index.chunks())
            .map_err(|e| RagError::store(dir, format!("failed to encode chunks: {e}")))?;
        write(&dir.join(CHUNKS_FILE), &chunks).await?;

        // Manifest last: a generation without one is never made current.
        let manifest = serde_json::to_vec_pretty(manifest)
            .map_err(|e| RagError::store(dir, format!("failed to encode manifest: {e}")))?;
        write(&dir.join(MANIFEST_FILE), &manifest).await?;

        // The generation's entries, then the generation itself under the root.
        sync_dir(dir).await?;
        sync_dir(&self.root).await
    }

    async fn read_manifest(&self, dir: &Path) -> Result<IndexManifest> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = read(&path).await?;
        let manifest: IndexManifest = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::store(&path, format!("invalid manifest: {e}")))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::store(
                &path,
                format!(
                    "unsupported format version {} (expected {FORMAT_VERSION})",
                    manifest.format_version
                ),
            ));
        }
        Ok(manifest)
    }

    async fn current_generation(&self) -> Result<Option<String>> {
        let path = self.root.join(CURRENT_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(name) => {
                let name = name.trim();
                if name.is_empty() || !name.starts_with(GENERATION_PREFIX) {
                    return Err(RagError::store(&path, "CURRENT does not name a generation"));
                }
                Ok(Some(name.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RagError::store(&path, format!("failed to read: {e}"))),
        }
    }

    async fn swap_current(&self, generation: &str) -> Result<()> {
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp-{}", Uuid::new_v4().simple()));
        write(&tmp, generation.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.root.join(CURRENT_FILE)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RagError::store(&self.root, format!("failed to swap CURRENT: {e}")));
        }
        sync_dir(&self.root).await
    }

    /// Remove generations other than the live and previous ones, plus any
    /// leftovers of interrupted writes.
    async fn prune(&self, live: &str, previous: Option<&str>) {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "failed to list index directory");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale_generation =
                name.starts_with(GENERATION_PREFIX) && name != live && Some(name.as_str()) != previous;
            let stale_tmp = name.starts_with(&format!("{CURRENT_FILE}.tmp-"));
            if !stale_generation && !stale_tmp {
                continue;
            }

            let path = entry.path();
            let removed = if stale_tmp {
                tokio::fs::remove_file(&path).await
            } else {
                tokio::fs::remove_dir_all(&path).await
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "pruned stale index data"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune"),
            }
        }
    }
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| RagError::store(path, format!("failed to read: {e}")))
}

/// Write `bytes` to `path` and flush them to disk before returning.
async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    let written = async {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    };
    written.await.map_err(|e| RagError::store(path, format!("failed to write: {e}")))
}

/// Flush a directory's entries so renames and new files inside it survive a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let synced = async { tokio::fs::File::open(dir).await?.sync_all().await };
    synced.await.map_err(|e| RagError::store(dir, format!("failed to sync directory: {e}")))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    // Directories cannot be opened for syncing here; the rename is durable on its own.
    Ok(())
}
