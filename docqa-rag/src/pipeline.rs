//! Document QA pipeline orchestrator.
//!
//! The [`RagPipeline`] owns one document slot. Ingestion replaces it
//! wholesale (chunk → embed in batches → fold into a fresh index → persist);
//! queries load the last fully persisted index, retrieve the nearest chunks,
//! and compose an answer.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagPipeline, RagConfig, RecursiveChunker};
//!
//! let config = RagConfig::default();
//! let pipeline = RagPipeline::builder()
//!     .chunker(Arc::new(RecursiveChunker::from_config(&config)))
//!     .config(config)
//!     .embedding_provider(Arc::new(my_embedder))
//!     .generative_model(Arc::new(my_model))
//!     .build()?;
//!
//! pipeline.ingest_pdf("paper.pdf", bytes).await?;
//! let answer = pipeline.ask("What is the main result?").await;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::answer::{AnswerComposer, CannedQuery, describe_failure};
use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::ingest::{BuildStats, build_index};
use crate::llm::GenerativeModel;
use crate::loader::{PageSource, PdfPageSource};
use crate::store::{IndexHandle, IndexManifest, IndexStore};

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// The ingested document's filename.
    pub filename: String,
    /// Counters from the build.
    pub stats: BuildStats,
    /// Manifest of the newly persisted index.
    pub manifest: IndexManifest,
}

/// Outcome of a question: the text to show plus, when retrieval ran, the
/// chunks the answer was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    /// The question as asked.
    pub question: String,
    /// The model's answer or a descriptive failure message.
    pub text: String,
    /// Retrieved chunks, nearest first. Empty when retrieval did not run.
    pub sources: Vec<SearchResult>,
}

/// The document QA pipeline.
///
/// At most one ingestion runs at a time; queries never wait on it and only
/// see indexes that were completely persisted.
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    composer: AnswerComposer,
    store: IndexStore,
    ingest_lock: Mutex<()>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the index store.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Where an upload named `filename` is written.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if the name has no usable final component.
    pub fn upload_path(&self, filename: &str) -> Result<PathBuf> {
        Ok(self.config.upload_dir.join(sanitize_filename(filename)?))
    }

    /// Create the upload directory and return the path for `filename`.
    ///
    /// Callers streaming an upload write to this path, then call
    /// [`ingest_pdf_file`](Self::ingest_pdf_file).
    pub async fn prepare_upload(&self, filename: &str) -> Result<PathBuf> {
        let path = self.upload_path(filename)?;
        tokio::fs::create_dir_all(&self.config.upload_dir).await.map_err(|e| {
            RagError::UploadIo {
                filename: display_name(&path),
                message: format!("failed to create upload directory: {e}"),
            }
        })?;
        Ok(path)
    }

    /// A unique file next to `path` to stream an upload into.
    ///
    /// Writing to a private name and then calling
    /// [`commit_upload`](Self::commit_upload) keeps concurrent uploads of the
    /// same filename from truncating each other.
    pub fn staging_path(path: &Path) -> PathBuf {
        let name = display_name(path);
        path.with_file_name(format!(".{name}.{}.part", Uuid::new_v4().simple()))
    }

    /// Move a fully written upload from `staged` to `path`.
    ///
    /// The staged file is removed if the move fails.
    pub async fn commit_upload(&self, staged: &Path, path: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(staged, path).await {
            let _ = tokio::fs::remove_file(staged).await;
            return Err(RagError::UploadIo {
                filename: display_name(path),
                message: format!("failed to move upload into place: {e}"),
            });
        }
        Ok(())
    }

    /// Save uploaded bytes, then ingest them.
    ///
    /// # Errors
    ///
    /// [`RagError::UploadIo`] if the bytes cannot be written, plus every error of
    /// [`ingest_pdf_file`](Self::ingest_pdf_file).
    pub async fn ingest_pdf(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestReport> {
        let path = self.prepare_upload(filename).await?;
        let staged = Self::staging_path(&path);
        if let Err(e) = tokio::fs::write(&staged, &bytes).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(RagError::UploadIo {
                filename: display_name(&path),
                message: format!("failed to save upload: {e}"),
            });
        }
        drop(bytes);
        self.commit_upload(&staged, &path).await?;

        self.ingest_pdf_file(&path).await
    }

    /// Ingest a PDF already on disk, replacing the current index.
    ///
    /// # Errors
    ///
    /// - [`RagError::UploadIo`] if the file cannot be read.
    /// - [`RagError::ContentExtraction`] if it is not a PDF or has no text.
    /// - [`RagError::Embedding`] if embedding fails; nothing is persisted.
    /// - [`RagError::IndexStore`] if persisting fails; the previous index stays live.
    pub async fn ingest_pdf_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        let path = path.as_ref().to_path_buf();
        let name = display_name(&path);
        let source = tokio::task::spawn_blocking(move || PdfPageSource::open(path))
            .await
            .map_err(|e| RagError::ContentExtraction {
                filename: name.clone(),
                message: format!("PDF parser aborted: {e}"),
            })??;

        self.ingest_pages(&name, source).await
    }

    /// Ingest a document from a page source, replacing the current index.
    ///
    /// The new index is built fully in memory and persisted as the last step.
    pub async fn ingest_pages<S>(&self, filename: &str, pages: S) -> Result<IngestReport>
    where
        S: PageSource + 'static,
    {
        let _guard = self.ingest_lock.lock().await;
        info!(document = filename, "ingesting document");

        let result = async {
            let (index, stats) = build_index(
                pages,
                filename,
                self.chunker.as_ref(),
                self.embedding_provider.as_ref(),
                self.config.batch_size,
            )
            .await?;
            let manifest =
                self.store.persist(&index, self.embedding_provider.model_id(), filename).await?;
            Ok(IngestReport { filename: filename.to_string(), stats, manifest })
        }
        .await;

        if let Err(e) = &result {
            error!(document = filename, error = %e, "ingestion failed; previous index kept");
        }
        result
    }

    /// Load the live index for querying.
    pub async fn open_index(&self) -> Result<IndexHandle> {
        self.store
            .load(self.embedding_provider.model_id(), self.embedding_provider.dimensions())
            .await
    }

    /// Manifest of the live index, if any.
    pub async fn index_status(&self) -> Result<Option<IndexManifest>> {
        self.store.manifest().await
    }

    /// Retrieve the `top_k` chunks nearest to `question`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for an empty or whitespace-only question.
    /// - [`RagError::IndexNotFound`] before any successful ingestion.
    /// - [`RagError::IncompatibleIndex`] if the index was built with another embedder.
    /// - [`RagError::Embedding`] if the question cannot be embedded.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("Please enter a valid question.".to_string()));
        }

        let loaded = self.open_index().await?.into_loaded()?;
        let query_embedding = self.embedding_provider.embed(question).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;
        let results = loaded.index.search(&query_embedding, self.config.top_k)?;

        info!(
            source = %loaded.manifest.source,
            result_count = results.len(),
            "retrieval completed"
        );
        Ok(results)
    }

    /// Answer a question about the current document.
    ///
    /// Never fails: rejected input, a missing index and model faults all come
    /// back as descriptive text.
    pub async fn answer(&self, question: &str) -> Answer {
        let sources = match self.retrieve(question).await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "question not answered");
                return Answer {
                    question: question.to_string(),
                    text: describe_failure(&e),
                    sources: Vec::new(),
                };
            }
        };

        let context: Vec<_> = sources.iter().map(|r| r.chunk.clone()).collect();
        let text = self.composer.compose(question.trim(), &context).await;
        Answer { question: question.to_string(), text, sources }
    }

    /// Answer a question, returning only the text.
    pub async fn ask(&self, question: &str) -> String {
        self.answer(question).await.text
    }

    /// Run one of the fixed questions.
    pub async fn run(&self, query: CannedQuery) -> String {
        if let CannedQuery::DefineTerm(term) = &query {
            if term.trim().is_empty() {
                return describe_failure(&RagError::InvalidInput(
                    "Please provide a valid term.".to_string(),
                ));
            }
        }
        self.ask(&query.question()).await
    }

    /// Explain `term` in simple words.
    pub async fn define_term(&self, term: &str) -> String {
        self.run(CannedQuery::DefineTerm(term.to_string())).await
    }

    /// Five key insights from the current document.
    pub async fn key_insights(&self) -> String {
        self.run(CannedQuery::KeyInsights).await
    }

    /// One-sentence summary of the current document.
    pub async fn one_line_summary(&self) -> String {
        self.run(CannedQuery::OneLineSummary).await
    }
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("embedding_model", &self.embedding_provider.model_id())
            .field("composer", &self.composer)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Reduce an uploaded filename to its final path component.
fn sanitize_filename(filename: &str) -> Result<String> {
    let name = Path::new(filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        return Err(RagError::InvalidInput(format!("invalid upload filename '{filename}'")));
    }
    Ok(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Builder for constructing a [`RagPipeline`].
///
/// `embedding_provider` and `generative_model` are required. The config
/// defaults to [`RagConfig::default()`], the chunker to a
/// [`RecursiveChunker`] built from the config, and the store to the
/// config's `index_path`.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generative_model: Option<Arc<dyn GenerativeModel>>,
    chunker: Option<Arc<dyn Chunker>>,
    store: Option<IndexStore>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generative model used to compose answers.
    pub fn generative_model(mut self, model: Arc<dyn GenerativeModel>) -> Self {
        self.generative_model = Some(model);
        self
    }

    /// Override the chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the index store.
    pub fn store(mut self, store: IndexStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required field is missing or the
    /// embedding provider disagrees with the configured dimension.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let generative_model = self
            .generative_model
            .ok_or_else(|| RagError::Config("generative_model is required".to_string()))?;

        if embedding_provider.dimensions() != config.embedding_dimensions {
            return Err(RagError::Config(format!(
                "embedding provider '{}' produces {} dimensions, config expects {}",
                embedding_provider.model_id(),
                embedding_provider.dimensions(),
                config.embedding_dimensions
            )));
        }

        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(RecursiveChunker::from_config(&config)));
        let store = self.store.unwrap_or_else(|| IndexStore::new(config.index_path.clone()));

        Ok(RagPipeline {
            config,
            embedding_provider,
            chunker,
            composer: AnswerComposer::new(generative_model),
            store,
            ingest_lock: Mutex::new(()),
        })
    }
}
