//! End-to-end pipeline tests with fake models and a temporary index directory.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{
    CannedQuery, Embedding, EmbeddingProvider, GenerativeModel, Page, RagConfig, RagError,
    RagPipeline, Result, pages_from_vec,
};
use tempfile::TempDir;

const DIM: usize = 16;

/// Deterministic bag-of-words embedder: each word adds 1.0 to a bucket
/// picked from its bytes.
struct HashingEmbedder {
    model_id: String,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    fn new(model_id: &str) -> Self {
        Self { model_id: model_id.to_string(), fail: AtomicBool::new(false), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Embedding {
                provider: self.model_id.clone(),
                message: "model unavailable".into(),
                transient: true,
            });
        }
        let mut v = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let bucket = word.bytes().map(usize::from).sum::<usize>() % DIM;
            v[bucket] += 1.0;
        }
        Ok(v)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Records the word prefixes of each batch as it starts, then yields to the
/// scheduler between texts so concurrent callers get a chance to interleave.
struct YieldingEmbedder {
    inner: HashingEmbedder,
    batches: Mutex<Vec<Vec<char>>>,
}

#[async_trait]
impl EmbeddingProvider for YieldingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let prefixes = texts.iter().filter_map(|t| t.chars().next()).collect();
        self.batches.lock().unwrap().push(prefixes);

        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            tokio::time::sleep(Duration::from_millis(1)).await;
            embeddings.push(self.inner.embed(text).await?);
            tokio::task::yield_now().await;
        }
        Ok(embeddings)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Returns the prompt it was given, so tests can inspect the context.
struct EchoModel;

#[async_trait]
impl GenerativeModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

struct Fixture {
    _dir: TempDir,
    config: RagConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        // One word per chunk: a word and the next (with its leading space)
        // never fit together in 6 chars.
        let config = RagConfig::builder()
            .chunk_size(6)
            .chunk_overlap(0)
            .separators([" ", ""])
            .batch_size(2)
            .top_k(2)
            .embedding_model("hash-a", DIM)
            .index_path(dir.path().join("index"))
            .upload_dir(dir.path().join("uploads"))
            .build()
            .unwrap();
        Self { _dir: dir, config }
    }

    fn pipeline(&self, embedder: Arc<HashingEmbedder>) -> RagPipeline {
        RagPipeline::builder()
            .config(self.config.clone())
            .embedding_provider(embedder)
            .generative_model(Arc::new(EchoModel))
            .build()
            .unwrap()
    }
}

/// One page of `n` four-character words: `a000 a001 ...`.
fn words(n: usize, prefix: &str) -> Vec<Page> {
    vec![Page::new(1, (0..n).map(|i| format!("{prefix}{i:03}")).collect::<Vec<_>>().join(" "))]
}

#[tokio::test]
async fn asking_before_ingestion_reports_missing_index() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));

    assert_eq!(
        pipeline.ask("What is this about?").await,
        "No PDF has been processed yet. Please upload and process a PDF first."
    );
    assert!(matches!(pipeline.retrieve("anything").await, Err(RagError::IndexNotFound)));
    assert!(pipeline.index_status().await.unwrap().is_none());
}

#[tokio::test]
async fn blank_question_is_rejected_without_embedding() {
    let fixture = Fixture::new();
    let embedder = Arc::new(HashingEmbedder::new("hash-a"));
    let pipeline = fixture.pipeline(embedder.clone());
    pipeline.ingest_pages("a.pdf", pages_from_vec(words(3, "a"))).await.unwrap();
    let calls = embedder.calls.load(Ordering::SeqCst);

    assert_eq!(pipeline.ask("   ").await, "Please enter a valid question.");
    assert!(matches!(pipeline.retrieve("").await, Err(RagError::InvalidInput(_))));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn second_ingestion_replaces_the_first() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));

    let first = pipeline.ingest_pages("a.pdf", pages_from_vec(words(5, "a"))).await.unwrap();
    assert_eq!(first.stats.chunks, 5);
    assert_eq!(first.stats.batches, 3);

    let second = pipeline.ingest_pages("b.pdf", pages_from_vec(words(3, "b"))).await.unwrap();
    assert_eq!(second.manifest.count, 3);

    let loaded = pipeline.open_index().await.unwrap().into_loaded().unwrap();
    assert_eq!(loaded.index.len(), 3);
    assert!(loaded.index.chunks().iter().all(|c| c.source == "b.pdf"));
    assert_eq!(loaded.manifest.source, "b.pdf");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestions_run_one_at_a_time() {
    let fixture = Fixture::new();
    let embedder = Arc::new(YieldingEmbedder {
        inner: HashingEmbedder::new("hash-a"),
        batches: Mutex::new(Vec::new()),
    });
    let pipeline = Arc::new(
        RagPipeline::builder()
            .config(fixture.config.clone())
            .embedding_provider(embedder.clone())
            .generative_model(Arc::new(EchoModel))
            .build()
            .unwrap(),
    );

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.ingest_pages("a.pdf", pages_from_vec(words(9, "a"))).await })
    };
    let second = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.ingest_pages("b.pdf", pages_from_vec(words(7, "b"))).await })
    };
    let (first, second) = tokio::join!(first, second);
    first.unwrap().unwrap();
    second.unwrap().unwrap();

    let batches = embedder.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 5 + 4);
    let mut order: Vec<char> = Vec::new();
    for batch in &batches {
        assert!(batch.iter().all(|c| *c == batch[0]), "mixed batch {batch:?}");
        if order.last() != Some(&batch[0]) {
            order.push(batch[0]);
        }
    }
    assert_eq!(order.len(), 2, "documents interleaved: {batches:?}");

    let last = order[1];
    let loaded = pipeline.open_index().await.unwrap().into_loaded().unwrap();
    let expected = if last == 'a' { 9 } else { 7 };
    assert_eq!(loaded.index.len(), expected);
    assert!(loaded.index.chunks().iter().all(|c| c.source == format!("{last}.pdf")));
}

#[tokio::test]
async fn answer_is_grounded_on_retrieved_chunks() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    let pages = vec![Page::new(1, "alpha beta"), Page::new(2, "gamma")];
    pipeline.ingest_pages("g.pdf", pages_from_vec(pages)).await.unwrap();

    let answer = pipeline.answer("gamma").await;
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].chunk.text, "gamma");
    assert_eq!(answer.sources[0].chunk.page, 2);
    assert!(answer.text.contains("Context:\ngamma"));
    assert!(answer.text.contains("Question:\ngamma"));
}

#[tokio::test]
async fn empty_page_contributes_nothing() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    let pages = vec![Page::new(1, "one"), Page::new(2, "  \n "), Page::new(3, "three")];

    let report = pipeline.ingest_pages("gap.pdf", pages_from_vec(pages)).await.unwrap();
    assert_eq!(report.stats.pages, 3);
    assert_eq!(report.stats.pages_with_text, 2);

    let loaded = pipeline.open_index().await.unwrap().into_loaded().unwrap();
    let pages: Vec<u32> = loaded.index.chunks().iter().map(|c| c.page).collect();
    assert_eq!(pages, vec![1, 3]);
}

#[tokio::test]
async fn failed_ingestion_keeps_the_previous_index() {
    let fixture = Fixture::new();
    let embedder = Arc::new(HashingEmbedder::new("hash-a"));
    let pipeline = fixture.pipeline(embedder.clone());
    pipeline.ingest_pages("a.pdf", pages_from_vec(words(5, "a"))).await.unwrap();

    embedder.fail.store(true, Ordering::SeqCst);
    let err = pipeline.ingest_pages("b.pdf", pages_from_vec(words(3, "b"))).await.unwrap_err();
    assert!(err.is_retryable());
    embedder.fail.store(false, Ordering::SeqCst);

    let loaded = pipeline.open_index().await.unwrap().into_loaded().unwrap();
    assert_eq!(loaded.manifest.source, "a.pdf");
    assert_eq!(loaded.index.len(), 5);
}

#[tokio::test]
async fn persisted_index_reloads_identically() {
    let fixture = Fixture::new();
    let writer = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    writer.ingest_pages("a.pdf", pages_from_vec(words(6, "w"))).await.unwrap();

    let reader = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    let before: Vec<String> =
        writer.retrieve("w003").await.unwrap().into_iter().map(|r| r.chunk.id).collect();
    let after: Vec<String> =
        reader.retrieve("w003").await.unwrap().into_iter().map(|r| r.chunk.id).collect();
    assert_eq!(before, after);
    assert_eq!(before[0], "a.pdf#p1-3");
}

#[tokio::test]
async fn index_from_another_embedder_is_incompatible() {
    let fixture = Fixture::new();
    let writer = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    writer.ingest_pages("a.pdf", pages_from_vec(words(3, "a"))).await.unwrap();

    let mut config = fixture.config.clone();
    config.embedding_model_id = "hash-b".to_string();
    let reader = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbedder::new("hash-b")))
        .generative_model(Arc::new(EchoModel))
        .build()
        .unwrap();

    assert!(matches!(
        reader.retrieve("a1").await,
        Err(RagError::IncompatibleIndex { found_model, .. }) if found_model == "hash-a"
    ));
    assert!(reader.ask("a1").await.contains("Please upload the PDF again"));
}

#[tokio::test]
async fn canned_queries_route_through_ask() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));
    pipeline.ingest_pages("a.pdf", pages_from_vec(words(4, "a"))).await.unwrap();

    let insights = pipeline.key_insights().await;
    assert!(insights.contains("Extract 5 key insights from this paper in bullet points."));
    let summary = pipeline.one_line_summary().await;
    assert_eq!(summary, pipeline.run(CannedQuery::OneLineSummary).await);
    let definition = pipeline.define_term("entropy").await;
    assert!(definition.contains("Explain the term 'entropy' in simple words."));
    assert_eq!(pipeline.run(CannedQuery::DefineTerm("  ".into())).await, "Please provide a valid term.");
}

#[tokio::test]
async fn unreadable_upload_is_saved_then_rejected() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Arc::new(HashingEmbedder::new("hash-a")));

    let err = pipeline.ingest_pdf("../notes.pdf", b"not a pdf".to_vec()).await.unwrap_err();
    assert!(matches!(err, RagError::ContentExtraction { filename, .. } if filename == "notes.pdf"));
    assert!(fixture.config.upload_dir.join("notes.pdf").exists());
    assert!(pipeline.index_status().await.unwrap().is_none());

    let saved: Vec<_> = std::fs::read_dir(&fixture.config.upload_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(saved, vec!["notes.pdf"]);
}

#[test]
fn builder_rejects_dimension_mismatch() {
    let config = RagConfig::builder().embedding_model("hash-a", 384).build().unwrap();
    let err = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbedder::new("hash-a")))
        .generative_model(Arc::new(EchoModel))
        .build()
        .unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}
