//! Batched, incremental index construction from a lazy page source.
//!
//! Pages are read on the blocking thread pool and pulled one at a time; each
//! is chunked, and chunks accumulate until a full batch is ready, which is
//! embedded and folded into the growing index. The batch (chunks, texts and
//! vectors) is moved into the index or dropped before the next page is
//! consumed, so peak memory is the current page, one read-ahead page and one
//! batch on top of the index itself.

use std::time::Instant;

use tracing::{debug, info};

use crate::chunking::Chunker;
use crate::document::Chunk;
use crate::embedding::{EmbeddingProvider, validate_batch};
use crate::error::{RagError, Result};
use crate::index::{IndexBuilder, IndexEntry, VectorIndex};
use crate::loader::{BlockingPageReader, PageSource};

/// Counters from one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Pages read from the source.
    pub pages: usize,
    /// Pages that produced at least one chunk.
    pub pages_with_text: usize,
    /// Chunks embedded and indexed.
    pub chunks: usize,
    /// Embedding batches folded into the index.
    pub batches: usize,
}

/// Build an index for one document.
///
/// Batches are folded in production order (page order, then chunk order
/// within the page), which fixes the insertion order search ties rely on.
/// The source itself runs on the blocking pool, so page extraction never
/// stalls the async runtime.
///
/// # Errors
///
/// - Any error yielded by the page source.
/// - [`RagError::Embedding`] if a batch fails to embed or comes back malformed.
/// - [`RagError::ContentExtraction`] if the whole document produced no chunks.
pub async fn build_index<S>(
    pages: S,
    filename: &str,
    chunker: &dyn Chunker,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<(VectorIndex, BuildStats)>
where
    S: PageSource + 'static,
{
    let started = Instant::now();
    let batch_size = batch_size.max(1);
    let mut builder = IndexBuilder::new(embedder.dimensions());
    let mut pending: Vec<Chunk> = Vec::with_capacity(batch_size);
    let mut stats = BuildStats::default();

    let mut pages = BlockingPageReader::spawn(filename, pages);
    while let Some(page) = pages.next_page().await {
        let page = page?;
        stats.pages += 1;

        let chunks = chunker.split_page(&page, filename);
        if !chunks.is_empty() {
            stats.pages_with_text += 1;
        }
        pending.extend(chunks);

        while pending.len() >= batch_size {
            let batch: Vec<Chunk> = pending.drain(..batch_size).collect();
            embed_and_fold(&mut builder, embedder, batch).await?;
        }
    }
    if !pending.is_empty() {
        embed_and_fold(&mut builder, embedder, pending).await?;
    }

    stats.chunks = builder.len();
    stats.batches = builder.batches();
    let Some(index) = builder.finish() else {
        return Err(RagError::ContentExtraction {
            filename: filename.to_string(),
            message: format!("PDF file is empty or could not be read ({} pages, no text)", stats.pages),
        });
    };

    info!(
        document = filename,
        pages = stats.pages,
        chunks = stats.chunks,
        batches = stats.batches,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "built index"
    );
    Ok((index, stats))
}

async fn embed_and_fold(
    builder: &mut IndexBuilder,
    embedder: &dyn EmbeddingProvider,
    batch: Vec<Chunk>,
) -> Result<()> {
    let embeddings = {
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        embedder.embed_batch(&texts).await?
    };
    validate_batch(embedder, batch.len(), &embeddings)?;

    let size = batch.len();
    let entries: Vec<IndexEntry> = batch.into_iter().zip(embeddings).collect();
    builder.fold(entries)?;
    debug!(batch = builder.batches(), size, total = builder.len(), "folded batch into index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chunking::RecursiveChunker;
    use crate::document::{Embedding, Page};
    use crate::loader::pages_from_vec;

    /// Records batch sizes and returns a vector derived from text length.
    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<usize>>,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingProvider for Recording {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            let mut batches = self.batches.lock().unwrap();
            if self.fail_on_batch == Some(batches.len()) {
                return Err(RagError::Embedding {
                    provider: "recording".into(),
                    message: "model unavailable".into(),
                    transient: true,
                });
            }
            batches.push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_id(&self) -> &str {
            "recording"
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn word_pages(pages: usize, words_per_page: usize) -> Vec<Page> {
        (1..=pages)
            .map(|n| {
                let words: Vec<String> = (0..words_per_page).map(|w| format!("p{n}w{w}")).collect();
                Page::new(n as u32, words.join(" "))
            })
            .collect()
    }

    #[tokio::test]
    async fn batches_are_fixed_size_except_the_last() {
        // One word per chunk: each word is 4-5 chars and chunk_size is 6.
        let chunker = RecursiveChunker::new(6, 0, [" ", ""]);
        let embedder = Recording::default();
        let pages = word_pages(3, 10);

        let (index, stats) =
            build_index(pages_from_vec(pages), "doc.pdf", &chunker, &embedder, 4).await.unwrap();

        assert_eq!(stats.chunks, 30);
        assert_eq!(index.len(), 30);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![4, 4, 4, 4, 4, 4, 4, 2]);
        assert_eq!(stats.batches, 8);
    }

    #[tokio::test]
    async fn insertion_order_follows_pages_then_chunks() {
        let chunker = RecursiveChunker::new(6, 0, [" ", ""]);
        let embedder = Recording::default();

        let (index, _) =
            build_index(pages_from_vec(word_pages(2, 3)), "doc.pdf", &chunker, &embedder, 2)
                .await
                .unwrap();

        let texts: Vec<&str> = index.chunks().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["p1w0", "p1w1", "p1w2", "p2w0", "p2w1", "p2w2"]);
    }

    #[tokio::test]
    async fn pages_are_extracted_off_the_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let chunker = RecursiveChunker::new(6, 0, [" ", ""]);
        let embedder = Recording::default();
        let source = word_pages(3, 2).into_iter().map(move |page| {
            assert_ne!(std::thread::current().id(), runtime_thread);
            Ok(page)
        });

        let (index, stats) = build_index(source, "doc.pdf", &chunker, &embedder, 4).await.unwrap();
        assert_eq!(stats.pages, 3);
        assert_eq!(index.len(), 6);
    }

    #[tokio::test]
    async fn empty_middle_page_is_skipped() {
        let chunker = RecursiveChunker::new(800, 150, ["\n\n", "\n", ".", " ", ""]);
        let embedder = Recording::default();
        let pages =
            vec![Page::new(1, "First page."), Page::new(2, "   "), Page::new(3, "Third page.")];

        let (index, stats) =
            build_index(pages_from_vec(pages), "doc.pdf", &chunker, &embedder, 32).await.unwrap();

        assert_eq!(stats.pages, 3);
        assert_eq!(stats.pages_with_text, 2);
        let pages: Vec<u32> = index.chunks().iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![1, 3]);
    }

    #[tokio::test]
    async fn document_without_text_is_a_content_extraction_error() {
        let chunker = RecursiveChunker::new(800, 150, [" ", ""]);
        let embedder = Recording::default();
        let pages = vec![Page::new(1, ""), Page::new(2, "\n")];

        let err = build_index(pages_from_vec(pages), "blank.pdf", &chunker, &embedder, 32)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ContentExtraction { filename, .. } if filename == "blank.pdf"));
        assert!(embedder.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_pass() {
        let chunker = RecursiveChunker::new(6, 0, [" ", ""]);
        let embedder = Recording { fail_on_batch: Some(1), ..Default::default() };

        let err = build_index(pages_from_vec(word_pages(2, 10)), "doc.pdf", &chunker, &embedder, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }

    #[tokio::test]
    async fn page_source_errors_propagate() {
        let chunker = RecursiveChunker::new(800, 150, [" ", ""]);
        let embedder = Recording::default();
        let pages = vec![
            Ok(Page::new(1, "fine")),
            Err(RagError::ContentExtraction { filename: "x.pdf".into(), message: "bad".into() }),
        ];

        let err = build_index(pages.into_iter(), "x.pdf", &chunker, &embedder, 32).await.unwrap_err();
        assert!(matches!(err, RagError::ContentExtraction { .. }));
    }

    struct ShortChanging;

    #[async_trait]
    impl EmbeddingProvider for ShortChanging {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "short"
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn mismatched_embedding_count_is_rejected() {
        let chunker = RecursiveChunker::new(6, 0, [" ", ""]);
        let err = build_index(pages_from_vec(word_pages(1, 3)), "doc.pdf", &chunker, &ShortChanging, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding { transient: false, .. }));
    }
}
