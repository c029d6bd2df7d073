//! Page chunking.
//!
//! [`RecursiveChunker`] splits each page on the first separator (in priority
//! order) that occurs in the text, merges the pieces back into chunks of at
//! most `chunk_size` characters carrying up to `chunk_overlap` characters of
//! the previous chunk, and recurses with the remaining separators into any
//! piece that is still too large. The empty separator splits between
//! characters, so with it in the list every chunk fits.
//!
//! Lengths are counted in `char`s, never bytes.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::RagConfig;
use crate::document::{Chunk, Page};

/// A strategy for splitting pages into chunks.
///
/// Chunks never span pages. Implementations produce chunks in page order,
/// then in order of appearance within the page.
pub trait Chunker: Send + Sync {
    /// Split one page. Returns an empty `Vec` for a page with no text.
    fn split_page(&self, page: &Page, source: &str) -> Vec<Chunk>;

    /// Split a sequence of pages, tagging every chunk with `source`.
    fn split(&self, pages: &[Page], source: &str) -> Vec<Chunk> {
        pages.iter().flat_map(|page| self.split_page(page, source)).collect()
    }
}

/// Splits text hierarchically through an ordered list of separators.
///
/// The default list is paragraph break, line break, period, space, and
/// finally the empty separator (raw characters). Separators stay attached to
/// the start of the piece that follows them, so each chunk is a verbatim
/// (whitespace-trimmed) span of the page.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(800, 150, ["\n\n", "\n", ".", " ", ""]);
/// let chunks = chunker.split_page(&page, "paper.pdf");
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of characters repeated from the previous chunk
    /// * `separators`: boundary markers in priority order
    pub fn new<I, S>(chunk_size: usize, chunk_overlap: usize, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: separators.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a chunker from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap, config.separators.iter().cloned())
    }

    /// Split raw text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, remaining) = pick_separator(text, separators);
        let mut chunks = Vec::new();
        let mut fitting: Vec<(&str, usize)> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            let len = piece.chars().count();
            if len < self.chunk_size {
                fitting.push((piece, len));
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }
            if remaining.is_empty() {
                // Nothing finer left to try; fall back to raw characters so
                // no chunk exceeds chunk_size.
                let by_char = split_keeping_separator(piece, "")
                    .into_iter()
                    .map(|c| (c, 1))
                    .collect::<Vec<_>>();
                chunks.extend(self.merge(&by_char));
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }
        chunks
    }

    /// Greedily merge pieces into chunks, carrying a tail of at most
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[(&str, usize)]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &(piece, len) in pieces {
            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_trimmed(&window) {
                    chunks.push(chunk);
                }
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        if let Some(chunk) = join_trimmed(&window) {
            chunks.push(chunk);
        }
        chunks
    }
}

impl Chunker for RecursiveChunker {
    fn split_page(&self, page: &Page, source: &str) -> Vec<Chunk> {
        if page.text.trim().is_empty() {
            debug!(source, page = page.number, "skipping empty page");
            return Vec::new();
        }

        self.split_text(&page.text)
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk::new(text, source, page.number, i))
            .collect()
    }
}

/// Return the first separator present in `text` (the empty separator always
/// matches) and the separators after it. Falls back to the last separator.
fn pick_separator<'s>(text: &str, separators: &'s [String]) -> (&'s str, &'s [String]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator.as_str()) {
            return (separator.as_str(), &separators[i + 1..]);
        }
    }
    (separators.last().map(String::as_str).unwrap_or(""), &[])
}

/// Split text at a separator, keeping the separator at the start of the piece
/// that follows it. The empty separator yields single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }

    let mut result = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            result.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

fn join_trimmed(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}
