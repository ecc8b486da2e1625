//! Character-budget splitter with overlap.
//!
//! Each window of at most `chunk_size` characters is cut at the latest
//! natural boundary it contains, trying in order:
//! 1. a paragraph break (`\n\n`)
//! 2. a single newline
//! 3. a space
//! 4. a hard cut at the budget
//!
//! The following window starts `chunk_overlap` characters before the cut, so
//! dropping the first `chunk_overlap` characters of every chunk but the first
//! and concatenating gives back the input exactly.

use super::ChunkParams;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// A chunk of text with its character offsets in the source string.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split `text` into overlapping spans. Parameters must already be validated.
pub fn split_text(text: &str, params: &ChunkParams) -> Vec<Span> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the string
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = bounds.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let limit = (start + params.chunk_size).min(char_len);
        let end = if limit == char_len {
            char_len
        } else {
            find_break(text, &bounds, start + params.chunk_overlap, limit).unwrap_or(limit)
        };

        spans.push(Span {
            text: text[bounds[start]..bounds[end]].to_string(),
            start,
            end,
        });

        if end == char_len {
            break;
        }
        start = end - params.chunk_overlap;
    }

    spans
}

/// Latest separator whose end lies in `(floor, limit]`, as a char index.
fn find_break(text: &str, bounds: &[usize], floor: usize, limit: usize) -> Option<usize> {
    let window_start = bounds[floor];
    let window = &text[window_start..bounds[limit]];

    SEPARATORS.iter().find_map(|sep| {
        window.rfind(sep).map(|pos| {
            let end_byte = window_start + pos + sep.len();
            // Separators are ASCII so end_byte is always a char boundary
            bounds.partition_point(|&b| b < end_byte)
        })
    })
}
