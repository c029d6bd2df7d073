//! # docqa-rag
//!
//! Question answering over a single uploaded PDF.
//!
//! ## Overview
//!
//! Ingestion turns a PDF into a persisted vector index:
//!
//! - [`PdfPageSource`] extracts text one page at a time
//! - [`RecursiveChunker`] splits each page into overlapping chunks
//! - an [`EmbeddingProvider`] embeds chunks in fixed-size batches
//! - [`IndexBuilder`] folds each batch into a growing [`VectorIndex`]
//! - [`IndexStore`] persists the finished index atomically
//!
//! Queries load the persisted index, embed the question, retrieve the
//! nearest chunks and hand them to a [`GenerativeModel`] through the
//! [`AnswerComposer`]. Query operations always return text; failures are
//! turned into a readable message.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{ChatCompletionsModel, OpenAiCompatibleEmbedder, RagConfig, RagPipeline, GROQ_API_BASE};
//!
//! let config = RagConfig::default();
//! let embedder = OpenAiCompatibleEmbedder::from_config(&config, "http://127.0.0.1:8080/v1")?;
//! let model = ChatCompletionsModel::from_config(&config, GROQ_API_BASE)?
//!     .with_api_key(std::env::var("GROQ_API_KEY")?);
//!
//! let pipeline = RagPipeline::builder()
//!     .config(config)
//!     .embedding_provider(Arc::new(embedder))
//!     .generative_model(Arc::new(model))
//!     .build()?;
//!
//! pipeline.ingest_pdf("paper.pdf", std::fs::read("paper.pdf")?).await?;
//! println!("{}", pipeline.ask("What problem does the paper solve?").await);
//! ```

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod openai;
pub mod pipeline;
pub mod store;

pub use answer::{AnswerComposer, CannedQuery, describe_failure, render_prompt};
pub use chunking::{Chunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Embedding, Page, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use index::{DistanceMetric, IndexBuilder, IndexEntry, VectorIndex, create_or_append};
pub use ingest::{BuildStats, build_index};
pub use llm::{ChatCompletionsModel, GROQ_API_BASE, GenerativeModel};
pub use loader::{BlockingPageReader, PageSource, PdfPageSource, pages_from_vec};
pub use openai::{DEFAULT_EMBEDDING_BASE_URL, OpenAiCompatibleEmbedder};
pub use pipeline::{Answer, IngestReport, RagPipeline, RagPipelineBuilder};
pub use store::{IndexHandle, IndexManifest, IndexStore, LoadedIndex};
