//! Lazy page sources.
//!
//! Ingestion consumes any `Iterator<Item = Result<Page>>`. [`PdfPageSource`]
//! parses the PDF structure once and extracts text one page per `next()`, so
//! only the current page's text is held at a time. Sources are finite,
//! single-pass, and not restartable.
//!
//! Extraction is CPU-bound, so ingestion drives sources through a
//! [`BlockingPageReader`], which runs them on the blocking thread pool.

use std::path::Path;

use lopdf::Document as PdfDocument;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::Page;
use crate::error::{RagError, Result};

/// A lazy, single-pass sequence of pages.
pub trait PageSource: Iterator<Item = Result<Page>> + Send {}

impl<T> PageSource for T where T: Iterator<Item = Result<Page>> + Send {}

/// Wrap already-extracted pages as a page source.
pub fn pages_from_vec(pages: Vec<Page>) -> impl PageSource {
    pages.into_iter().map(Ok)
}

/// Streams the text of a PDF page by page.
pub struct PdfPageSource {
    filename: String,
    document: PdfDocument,
    page_numbers: std::vec::IntoIter<u32>,
}

impl std::fmt::Debug for PdfPageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfPageSource")
            .field("filename", &self.filename)
            .field("remaining_pages", &self.page_numbers.len())
            .finish()
    }
}

impl PdfPageSource {
    /// Parse PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ContentExtraction`] if the bytes are not a readable PDF.
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let filename = filename.into();
        let document = PdfDocument::load_mem(bytes).map_err(|e| RagError::ContentExtraction {
            filename: filename.clone(),
            message: format!("PDF file is empty or could not be read: {e}"),
        })?;
        Ok(Self::from_document(filename, document))
    }

    /// Read and parse a PDF file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UploadIo`] if the file cannot be read and
    /// [`RagError::ContentExtraction`] if it is not a readable PDF.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = std::fs::read(path).map_err(|e| RagError::UploadIo {
            filename: filename.clone(),
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_bytes(filename, &bytes)
    }

    fn from_document(filename: String, document: PdfDocument) -> Self {
        let page_numbers: Vec<u32> = document.get_pages().into_keys().collect();
        debug!(%filename, pages = page_numbers.len(), "opened PDF");
        Self { filename, document, page_numbers: page_numbers.into_iter() }
    }

    /// The document's filename.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Pages not yet produced.
    pub fn remaining(&self) -> usize {
        self.page_numbers.len()
    }
}

impl Iterator for PdfPageSource {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let number = self.page_numbers.next()?;
        let text = match self.document.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                // An unreadable page contributes no chunks; the rest of the
                // document is still usable.
                warn!(filename = %self.filename, page = number, error = %e, "failed to extract page text");
                String::new()
            }
        };
        Some(Ok(Page::new(number, text)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.page_numbers.size_hint()
    }
}

/// Drives a [`PageSource`] on the blocking thread pool.
///
/// Pages cross over through a channel of capacity one, so at most one page
/// waits while the consumer works on the previous one. Dropping the reader
/// stops the source at its next page.
#[derive(Debug)]
pub struct BlockingPageReader {
    filename: String,
    pages: mpsc::Receiver<Result<Page>>,
    reader: Option<JoinHandle<()>>,
}

impl BlockingPageReader {
    /// Start reading `source` in the background.
    pub fn spawn<S>(filename: impl Into<String>, source: S) -> Self
    where
        S: PageSource + 'static,
    {
        let (tx, pages) = mpsc::channel(1);
        let reader = tokio::task::spawn_blocking(move || {
            for page in source {
                if tx.blocking_send(page).is_err() {
                    break;
                }
            }
        });
        Self { filename: filename.into(), pages, reader: Some(reader) }
    }

    /// The next page, or `None` once the source is exhausted.
    ///
    /// A panic while reading is reported as [`RagError::ContentExtraction`].
    pub async fn next_page(&mut self) -> Option<Result<Page>> {
        if let Some(page) = self.pages.recv().await {
            return Some(page);
        }
        match self.reader.take()?.await {
            Ok(()) => None,
            Err(e) => Some(Err(RagError::ContentExtraction {
                filename: self.filename.clone(),
                message: format!("page reader aborted: {e}"),
            })),
        }
    }
}
