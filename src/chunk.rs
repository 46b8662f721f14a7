//! Overlapping character-window text chunker.
//!
//! Splits text into windows of at most `chunk_size` characters. When a
//! window stops short of the end of the text, it is pulled back to the last
//! sentence terminator (`.`, `!`, `?`) or newline, provided that break point
//! lies past the middle of the window. Consecutive windows overlap by
//! `overlap` characters.
//!
//! All offsets are in characters (Unicode scalar values), so multi-byte text
//! is never split inside a code point.

use crate::error::{RagError, Result};

/// Split `text` into stripped, non-empty chunks.
///
/// Returns an error if `chunk_size` is zero or `overlap >= chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    let chars: Vec<char> = text.chars().collect();
    let spans = chunk_spans_of(&chars, chunk_size, overlap)?;

    Ok(spans
        .into_iter()
        .filter_map(|(start, end)| {
            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect())
}

/// Character offsets `(start, end)` of every window `chunk_text` would cut.
///
/// Spans are reported before stripping, so whitespace-only windows still
/// appear here.
pub fn chunk_spans(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<(usize, usize)>> {
    let chars: Vec<char> = text.chars().collect();
    chunk_spans_of(&chars, chunk_size, overlap)
}

fn chunk_spans_of(chars: &[char], chunk_size: usize, overlap: usize) -> Result<Vec<(usize, usize)>> {
    if chunk_size == 0 {
        return Err(RagError::invalid("chunk_size must be greater than zero"));
    }
    if overlap >= chunk_size {
        return Err(RagError::invalid(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    let len = chars.len();
    if len <= chunk_size {
        return Ok(vec![(0, len)]);
    }

    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + chunk_size).min(len);

        if end < len {
            if let Some(pos) = last_break(&chars[start..end]) {
                if pos > chunk_size / 2 {
                    end = start + pos + 1;
                }
            }
        }

        spans.push((start, end));

        if end >= len {
            break;
        }

        // Always move forward, even if a soft break landed inside the overlap.
        start = (end - overlap).max(start + 1);
    }

    Ok(spans)
}

/// Index of the last sentence terminator or newline in `window`.
fn last_break(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '\n'))
}
