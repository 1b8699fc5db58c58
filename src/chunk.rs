//! Recursive character text splitter.
//!
//! Splits document content into [`Chunk`]s of at most `chunk_size`
//! characters, carrying up to `chunk_overlap` characters of trailing context
//! from one chunk into the next. Splitting prefers the largest structural
//! boundary present in the text (`\n\n`, then `\n`, then a space) and only
//! falls back to cutting between individual characters when no boundary
//! is left. When a piece is too long to keep any whole predecessor in the
//! window, the next chunk opens with the tail of the previous one instead.
//!
//! Separators stay attached to the start of the piece that follows them,
//! so joining pieces back together reproduces the source text exactly;
//! every chunk is a substring of its parent document (modulo trimming).
//!
//! Lengths are counted in Unicode scalar values, not bytes.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document, META_CHUNK_INDEX};

/// Boundaries tried in order, largest first. The empty separator means
/// "between any two characters".
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits documents into bounded, overlapping chunks.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split every document, propagating its metadata to each chunk.
    ///
    /// Chunk indices restart at 0 for each document. Documents with no
    /// non-whitespace content produce no chunks.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            for (index, text) in self.split_text(&doc.content).into_iter().enumerate() {
                chunks.push(make_chunk(doc, index, &text));
            }
        }
        chunks
    }

    /// Split raw text into trimmed, non-empty pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut atoms = Vec::new();
        self.split_recursive(text, &SEPARATORS, &mut atoms);
        self.merge(&atoms)
    }

    /// Break `text` into contiguous pieces shorter than `chunk_size`, using
    /// the largest separator present and recursing into oversized pieces.
    fn split_recursive(&self, text: &str, separators: &[&str], out: &mut Vec<String>) {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, &sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size || finer.is_empty() {
                out.push(piece);
            } else {
                self.split_recursive(&piece, finer, out);
            }
        }
    }

    /// Greedily pack pieces into chunks, sliding a window of at most
    /// `chunk_overlap` characters from each emitted chunk into the next.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<String> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                let emitted: String = window.iter().map(String::as_str).collect();
                push_trimmed(&mut merged, &emitted);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(first) => total -= char_len(&first),
                        None => break,
                    }
                }
                // No whole piece survived: carry the emitted chunk's tail instead.
                if window.is_empty() {
                    let keep = self.chunk_overlap.min(self.chunk_size.saturating_sub(len));
                    let tail = char_tail(&emitted, keep);
                    if !tail.is_empty() {
                        total = char_len(tail);
                        window.push_back(tail.to_string());
                    }
                }
            }
            window.push_back(piece.clone());
            total += len;
        }

        let rest: String = window.iter().map(String::as_str).collect();
        push_trimmed(&mut merged, &rest);
        merged
    }
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// The last `n` characters of `s`.
fn char_tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Split on `separator`, keeping each occurrence at the start of the piece
/// that follows it. Empty pieces are dropped.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(text[start..idx].to_string());
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

/// SHA-256 hex digest of chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(parent: &Document, index: usize, text: &str) -> Chunk {
    let mut metadata = parent.metadata.clone();
    metadata.insert(META_CHUNK_INDEX.to_string(), index.to_string());

    Chunk {
        id: Uuid::new_v4().to_string(),
        content: text.to_string(),
        metadata,
        hash: content_hash(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, META_SOURCE};

    fn doc(content: &str) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert(META_SOURCE.to_string(), "notes.txt".to_string());
        Document::new(content, metadata)
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = RecursiveSplitter::default().split_documents(&[doc("Hello, world!")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].metadata[META_CHUNK_INDEX], "0");
    }

    #[test]
    fn test_empty_and_blank_text_produce_no_chunks() {
        let splitter = RecursiveSplitter::default();
        assert!(splitter.split_documents(&[doc("")]).is_empty());
        assert!(splitter.split_documents(&[doc(" \n\n \t ")]).is_empty());
    }

    #[test]
    fn test_metadata_propagates_to_every_chunk() {
        let text = "word ".repeat(500);
        let chunks = RecursiveSplitter::new(100, 20).split_documents(&[doc(&text)]);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.source(), Some("notes.txt"));
            assert_eq!(c.metadata[META_CHUNK_INDEX], i.to_string());
        }
    }

    #[test]
    fn test_never_exceeds_chunk_size() {
        let splitter = RecursiveSplitter::new(120, 30);
        for sep in ["\n", " ", "\n\n"] {
            let text = (0..200)
                .map(|i| format!("Sentence number {} talks about checkout flows.", i))
                .collect::<Vec<_>>()
                .join(sep);
            for piece in splitter.split_text(&text) {
                assert!(piece.chars().count() <= 120, "too long: {}", piece.len());
                assert!(!piece.is_empty());
            }
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let para_a = "a".repeat(60);
        let para_b = "b".repeat(60);
        let text = format!("{}\n\n{}", para_a, para_b);
        let pieces = RecursiveSplitter::new(100, 10).split_text(&text);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], para_a);
        assert_eq!(pieces[1], format!("{}\n\n{}", "a".repeat(10), para_b));
    }

    #[test]
    fn test_long_paragraphs_carry_tail_overlap() {
        let text = format!("{}\n\n{}", "a".repeat(700), "b".repeat(700));
        let pieces = RecursiveSplitter::new(800, 150).split_text(&text);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "a".repeat(700));
        // 800 - 702 leaves room for 98 characters of the first paragraph.
        assert_eq!(pieces[1], format!("{}\n\n{}", "a".repeat(98), "b".repeat(700)));
        for piece in &pieces {
            assert!(piece.chars().count() <= 800);
            assert!(text.contains(piece.as_str()));
        }
    }

    #[test]
    fn test_tail_overlap_cuts_on_char_boundaries() {
        let text = format!("{}\n\n{}", "é".repeat(70), "ü".repeat(70));
        let pieces = RecursiveSplitter::new(80, 15).split_text(&text);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[1].starts_with("éééééééé\n\n"));
        assert!(text.contains(pieces[1].as_str()));
    }

    #[test]
    fn test_long_run_is_hard_cut_with_overlap() {
        let text = "A".repeat(10_000);
        let pieces = RecursiveSplitter::new(800, 150).split_text(&text);
        assert!(pieces.len() > 1);
        assert_eq!(pieces[0].len(), 800);
        for piece in &pieces {
            assert!(piece.len() <= 800);
            assert!(text.contains(piece.as_str()));
        }
        // 800-char windows advancing by 650 characters.
        assert_eq!(pieces.len(), 16);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..300)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = RecursiveSplitter::new(80, 20).split_text(&text);
        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let last_word = pair[0].split(' ').last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_multibyte_lengths_counted_in_chars() {
        let text = "é".repeat(500);
        for piece in RecursiveSplitter::new(100, 10).split_text(&text) {
            assert!(piece.chars().count() <= 100);
        }
    }

    #[test]
    fn test_keep_separator_reconstructs_text() {
        let text = "one\n\ntwo\n\n\n\nthree";
        let pieces = split_keep_separator(text, "\n\n");
        assert_eq!(pieces.concat(), text);
        assert_eq!(pieces[0], "one");
    }

    #[test]
    fn test_chunk_hash_is_content_digest() {
        let chunks = RecursiveSplitter::default().split_documents(&[doc("Alpha"), doc("Alpha")]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].hash, chunks[1].hash);
        assert_ne!(chunks[0].id, chunks[1].id);
    }
}
