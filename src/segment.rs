//! Document segmenter.
//!
//! Converts parsed PDF elements into retrievable units: table elements
//! pass through whole (a fragmented table loses its meaning), everything
//! else is concatenated in document order and split into overlapping
//! chunks by a recursive boundary-preference splitter. Chunks below the
//! configured minimum length are dropped as boilerplate.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::extract::{Element, ElementKind};

/// Boundary ladder, coarsest first. The splitter uses the coarsest
/// separator present in the text and recurses with finer ones only for
/// pieces still over the size limit.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Partition elements into `(text_chunks, table_units)`.
///
/// Zero elements yield two empty vectors; an empty document is valid,
/// just answer-free.
pub fn segment_elements(
    elements: &[Element],
    config: &ChunkingConfig,
) -> (Vec<String>, Vec<String>) {
    let mut tables = Vec::new();
    let mut blob = String::new();

    for element in elements {
        match element.kind {
            ElementKind::Table => tables.push(element.text.clone()),
            ElementKind::Prose | ElementKind::Heading => {
                if !blob.is_empty() {
                    blob.push_str("\n\n");
                }
                blob.push_str(&element.text);
            }
        }
    }

    let texts = split_text(&blob, config.chunk_size, config.chunk_overlap)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| chunk.len() >= config.min_chunk_chars)
        .collect();

    (texts, tables)
}

/// Split text into chunks of at most `size` bytes, consecutive chunks
/// overlapping by approximately `overlap` bytes.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= size {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![text.to_string()];
    }
    split_with(text, 0, size, overlap)
}

fn split_with(text: &str, level: usize, size: usize, overlap: usize) -> Vec<String> {
    // Coarsest separator (from this level down) that actually occurs.
    let sep_idx = (level..SEPARATORS.len()).find(|&i| text.contains(SEPARATORS[i]));
    let Some(idx) = sep_idx else {
        return split_chars(text, size, overlap);
    };
    let sep = SEPARATORS[idx];

    let mut chunks = Vec::new();
    let mut small: Vec<String> = Vec::new();

    for piece in text.split(sep) {
        if piece.is_empty() {
            continue;
        }
        if piece.len() <= size {
            small.push(piece.to_string());
        } else {
            // Oversized piece: flush accumulated small pieces, then
            // recurse with finer separators.
            if !small.is_empty() {
                chunks.extend(merge_pieces(std::mem::take(&mut small), sep, size, overlap));
            }
            chunks.extend(split_with(piece, idx + 1, size, overlap));
        }
    }

    if !small.is_empty() {
        chunks.extend(merge_pieces(small, sep, size, overlap));
    }

    chunks
}

/// Greedily pack pieces into chunks up to `size`, carrying a tail of at
/// most `overlap` bytes of each emitted chunk into the next one.
fn merge_pieces(pieces: Vec<String>, sep: &str, size: usize, overlap: usize) -> Vec<String> {
    let sep_len = sep.len();
    let mut chunks = Vec::new();
    let mut window: VecDeque<String> = VecDeque::new();
    // Joined length of the window, separators included.
    let mut total: usize = 0;

    for piece in pieces {
        let piece_len = piece.len();
        let join_cost = if window.is_empty() { 0 } else { sep_len };

        if total + piece_len + join_cost > size && !window.is_empty() {
            chunks.push(join(&window, sep));

            // Shrink the window to at most `overlap` bytes (and far
            // enough that the incoming piece fits).
            while total > overlap || (total + piece_len + sep_len > size && total > 0) {
                let first = window.pop_front().expect("non-empty window");
                total -= first.len() + if window.is_empty() { 0 } else { sep_len };
            }
        }

        if !window.is_empty() {
            total += sep_len;
        }
        total += piece_len;
        window.push_back(piece);
    }

    if !window.is_empty() {
        chunks.push(join(&window, sep));
    }

    chunks
}

fn join(window: &VecDeque<String>, sep: &str) -> String {
    window.iter().cloned().collect::<Vec<_>>().join(sep)
}

/// Character-level fallback for text with no usable boundary: fixed-size
/// windows advancing by `size - overlap`, aligned to char boundaries.
fn split_chars(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let stride = size.saturating_sub(overlap).max(1);
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0usize; // index into bounds

    while start < bounds.len() - 1 {
        let start_byte = bounds[start];
        let mut end = start;
        while end + 1 < bounds.len() && bounds[end + 1] - start_byte <= size {
            end += 1;
        }
        if end == start {
            // A single char wider than the limit; take it anyway.
            end = start + 1;
        }
        chunks.push(text[start_byte..bounds[end]].to_string());

        if bounds[end] >= text.len() {
            break;
        }
        let target = start_byte + stride;
        let mut next = start + 1;
        while next + 1 < bounds.len() && bounds[next] < target {
            next += 1;
        }
        start = next;
    }

    chunks
}
