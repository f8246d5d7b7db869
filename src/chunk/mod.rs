//! Chunking utilities for splitting extracted text into overlapping
//! segments
//!
//! Chunks are the minimal unit of indexing. Splitting is character-based
//! with a configurable overlap, breaking at word boundaries so no token is
//! cut in half. Chunks are immutable once written; their ordinals are
//! dense and zero-based.

use crate::source::Pair;

/// A chunk of text from a larger document, before indexing metadata is
/// attached.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The chunk text
    pub text: String,
    /// Zero-based chunk ordinal within the document
    pub ordinal: u32,
    /// Character offset where this chunk starts in the original document
    pub start_offset: usize,
}

/// Split text into overlapping chunks.
///
/// If the text is shorter than `chunk_size`, returns a single chunk.
/// Whitespace-only input produces no chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let text_len = text.len();

    if text.trim().is_empty() {
        return Vec::new();
    }

    if text_len <= chunk_size {
        return vec![Chunk {
            text: text.to_string(),
            ordinal: 0,
            start_offset: 0,
        }];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut ordinal = 0u32;

    while start < text_len {
        let end = (start + chunk_size).min(text_len);

        // Break at a word boundary unless we're at the end of the text
        let chunk_end = if end < text_len {
            find_word_boundary(text, end)
        } else {
            end
        };

        let start_aligned = ceil_char_boundary(text, start);
        if start_aligned < chunk_end {
            let slice = &text[start_aligned..chunk_end];
            if !slice.trim().is_empty() {
                chunks.push(Chunk {
                    text: slice.to_string(),
                    ordinal,
                    start_offset: start_aligned,
                });
                ordinal += 1;
            }
        }

        start += step;

        // Avoid a tiny final fragment that the previous chunk already covers
        if text_len.saturating_sub(start) < chunk_size / 4 && !chunks.is_empty() {
            break;
        }
    }

    chunks
}

/// Find a word boundary near the given position, preferring to break at
/// whitespace.
fn find_word_boundary(text: &str, pos: usize) -> usize {
    let pos = floor_char_boundary(text, pos);
    let search_start = floor_char_boundary(text, pos.saturating_sub(100));
    let search_region = &text[search_start..pos];

    if let Some(ws_offset) = search_region.rfind(|c: char| c.is_whitespace()) {
        let boundary = search_start + ws_offset + 1;
        if boundary > 0 {
            return boundary;
        }
    }

    pos
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos.min(text.len())
}

/// Indices into a document's pair list for the pairs whose model name or
/// part number demonstrably appears in the chunk text.
pub fn pair_refs(chunk_text: &str, pairs: &[Pair]) -> Vec<usize> {
    pairs
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            chunk_text.contains(p.model_name.as_str())
                || chunk_text.contains(p.part_number.as_str())
        })
        .map(|(i, _)| i)
        .collect()
}
