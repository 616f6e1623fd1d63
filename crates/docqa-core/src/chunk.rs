//! Recursive, separator-priority text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters
//! (Unicode scalar values), carrying up to `chunk_overlap` characters of
//! trailing context from one chunk into the next.
//!
//! # Algorithm
//!
//! 1. Split the text on paragraph breaks (`\n\n`). Paragraphs are hard
//!    boundaries: text from two paragraphs never shares a chunk.
//! 2. A paragraph that fits in `chunk_size` becomes one chunk.
//! 3. Otherwise pick the coarsest separator present in the text from
//!    `["\n", ".", " ", ""]` and split on it, keeping the separator attached
//!    to the end of the preceding piece (`""` splits into characters).
//! 4. Pieces shorter than `chunk_size` are merged greedily up to
//!    `chunk_size`; after each emitted chunk the merge window keeps trailing
//!    pieces totalling at most `chunk_overlap` characters.
//! 5. Pieces that are still too long recurse with the finer separators.
//! 6. Every chunk is trimmed; whitespace-only chunks are dropped.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::{chunk_documents, ChunkOptions};
//! use docqa_core::models::{Document, DocumentMetadata};
//!
//! let doc = Document::new(
//!     "Paris is the capital of France.\n\nBerlin is the capital of Germany.",
//!     DocumentMetadata::new("capitals.txt", "text/plain"),
//! );
//! let chunks = chunk_documents(&[doc], &ChunkOptions::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].content, "Paris is the capital of France.");
//! ```

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, DocumentMetadata};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Separators tried inside a paragraph, coarsest first.
const SEPARATORS: &[&str] = &["\n", ".", " ", ""];

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkOptions {
    /// Create options, rejecting `chunk_size == 0` and `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split every document into chunks, propagating its metadata.
///
/// Chunk indices restart at 0 for each document. A document whose text is
/// empty or whitespace-only yields no chunks.
pub fn chunk_documents(documents: &[Document], options: &ChunkOptions) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| {
            split_text(&doc.text, options)
                .into_iter()
                .enumerate()
                .map(move |(index, content)| make_chunk(&doc.metadata, index, content))
        })
        .collect()
}

/// Split raw text into trimmed, non-empty passages.
pub fn split_text(text: &str, options: &ChunkOptions) -> Vec<String> {
    split_keeping_separator(text, PARAGRAPH_SEPARATOR)
        .into_iter()
        .flat_map(|paragraph| split_recursive(paragraph, SEPARATORS, options))
        .collect()
}

fn split_recursive(text: &str, separators: &[&str], options: &ChunkOptions) -> Vec<String> {
    if char_len(text) <= options.chunk_size {
        return trimmed(text).into_iter().collect();
    }

    let position = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces = if separator.is_empty() {
        split_chars(text)
    } else {
        split_keeping_separator(text, separator)
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) < options.chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, options));
            fitting.clear();
        }
        if finer.is_empty() {
            chunks.extend(trimmed(piece));
        } else {
            chunks.extend(split_recursive(piece, finer, options));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, options));
    }

    chunks
}

/// Greedily merge small pieces into chunks, keeping an overlap window.
fn merge_pieces(pieces: &[&str], options: &ChunkOptions) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > options.chunk_size && !window.is_empty() {
            chunks.extend(join_window(&window));
            while total > options.chunk_overlap
                || (total + len > options.chunk_size && total > 0)
            {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }

    chunks.extend(join_window(&window));
    chunks
}

fn join_window(window: &VecDeque<&str>) -> Option<String> {
    let joined: String = window.iter().copied().collect();
    trimmed(&joined)
}

fn trimmed(text: &str) -> Option<String> {
    let t = text.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Split at `separator`, leaving it attached to the end of the preceding piece.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Build a [`Chunk`] with a content hash and a deterministic id.
fn make_chunk(metadata: &DocumentMetadata, index: usize, content: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(content.as_bytes()));

    let mut hasher = Sha256::new();
    hasher.update(metadata.source.as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata.page.unwrap_or(0).to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(hash.as_bytes());
    let id = format!("{:x}", hasher.finalize());

    Chunk {
        id: id[..32].to_string(),
        chunk_index: index,
        content,
        hash,
        metadata: metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new(text, DocumentMetadata::new("test.txt", "text/plain"))
    }

    fn words(n: usize) -> String {
        words_from(0, n)
    }

    fn words_from(start: usize, n: usize) -> String {
        (start..start + n)
            .map(|i| format!("word{:04}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn overlap_len(a: &str, b: &str) -> usize {
        let max = a.len().min(b.len());
        (1..=max)
            .rev()
            .find(|&k| b.is_char_boundary(k) && a.ends_with(&b[..k]))
            .map(|k| b[..k].chars().count())
            .unwrap_or(0)
    }

    #[test]
    fn test_paragraphs_are_separate_chunks() {
        let text = "Paris is the capital of France.\n\nBerlin is the capital of Germany.";
        let chunks = chunk_documents(&[doc(text)], &ChunkOptions::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "Paris is the capital of France.");
        assert_eq!(chunks[1].content, "Berlin is the capital of Germany.");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_documents(&[doc("Hello, world!")], &ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
    }

    #[test]
    fn test_empty_and_whitespace_text_yield_nothing() {
        let options = ChunkOptions::default();
        assert!(chunk_documents(&[doc("")], &options).is_empty());
        assert!(chunk_documents(&[doc("  \n\n \t\n\n  ")], &options).is_empty());
    }

    #[test]
    fn test_lines_merge_within_paragraph() {
        let text = "line one\nline two\nline three";
        let chunks = split_text(text, &ChunkOptions::new(20, 5).unwrap());
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(chunks[0], "line one\nline two");
    }

    #[test]
    fn test_sentence_separator_keeps_terminator() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = split_text(text, &ChunkOptions::new(25, 0).unwrap());
        assert_eq!(chunks[0], "First sentence here.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 25));
    }

    #[test]
    fn test_size_bound() {
        let text = format!("{}\n\n{}", words(300), words(50));
        let options = ChunkOptions::new(60, 20).unwrap();
        for chunk in split_text(&text, &options) {
            assert!(chunk.chars().count() <= 60, "oversized chunk: {}", chunk);
        }
    }

    #[test]
    fn test_overlap_bound_and_presence() {
        let text = words(200);
        let options = ChunkOptions::new(50, 20).unwrap();
        let chunks = split_text(&text, &options);
        assert!(chunks.len() > 2);
        let mut saw_overlap = false;
        for pair in chunks.windows(2) {
            let ov = overlap_len(&pair[0], &pair[1]);
            assert!(ov <= 20, "overlap {} exceeds bound", ov);
            saw_overlap |= ov > 0;
        }
        assert!(saw_overlap);
    }

    #[test]
    fn test_zero_overlap_has_no_shared_text() {
        let text = words(100);
        let chunks = split_text(&text, &ChunkOptions::new(40, 0).unwrap());
        for pair in chunks.windows(2) {
            assert_eq!(overlap_len(&pair[0], &pair[1]), 0);
        }
    }

    #[test]
    fn test_coverage_of_non_whitespace() {
        let text = format!(
            "{}\n{}.\n\n{}. {}",
            words_from(0, 40),
            words_from(100, 30),
            words_from(200, 25),
            words_from(300, 60)
        );
        let chunks = split_text(&text, &ChunkOptions::new(70, 25).unwrap());

        let mut covered = vec![false; text.len()];
        let mut search_from = 0;
        for chunk in &chunks {
            let pos = text[search_from..]
                .find(chunk.as_str())
                .map(|p| p + search_from)
                .expect("chunk must be a substring of the source text");
            covered[pos..pos + chunk.len()].iter_mut().for_each(|c| *c = true);
            search_from = pos + chunk.chars().next().map(char::len_utf8).unwrap_or(1);
        }
        for (i, ch) in text.char_indices() {
            if !ch.is_whitespace() {
                assert!(covered[i], "character {:?} at {} not covered", ch, i);
            }
        }
    }

    #[test]
    fn test_character_fallback_for_long_token() {
        let text = "x".repeat(120);
        let chunks = split_text(&text, &ChunkOptions::new(50, 10).unwrap());
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = split_text(text, &ChunkOptions::new(5, 1).unwrap());
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn test_metadata_propagated() {
        let mut meta = DocumentMetadata::new("report.pdf", "application/pdf");
        meta.page = Some(2);
        meta.author = Some("Ada".into());
        let chunks = chunk_documents(
            &[Document::new("One paragraph.\n\nAnother one.", meta.clone())],
            &ChunkOptions::default(),
        );
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert_eq!(c.metadata, meta);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = format!("Alpha\n\nBeta\n\n{}", words(120));
        let options = ChunkOptions::new(40, 10).unwrap();
        let c1 = chunk_documents(&[doc(&text)], &options);
        let c2 = chunk_documents(&[doc(&text)], &options);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_ids_unique_within_document() {
        let text = "same\n\nsame\n\nsame";
        let chunks = chunk_documents(&[doc(text)], &ChunkOptions::default());
        assert_eq!(chunks.len(), 3);
        assert_ne!(chunks[0].id, chunks[1].id);
        assert_eq!(chunks[0].hash, chunks[1].hash);
    }

    #[test]
    fn test_options_validation() {
        assert!(ChunkOptions::new(500, 200).is_ok());
        assert!(matches!(ChunkOptions::new(0, 0), Err(RagError::Config(_))));
        assert!(matches!(ChunkOptions::new(100, 100), Err(RagError::Config(_))));
        assert!(matches!(ChunkOptions::new(100, 150), Err(RagError::Config(_))));
    }
}
