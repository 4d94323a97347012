//! Splits narration text into ordered, bounded-length fragments.
//!
//! Text is cut into pieces that end at sentence or clause boundaries
//! (`.`, `?`, `!`, newline, `।`, `॥`, `。`, `？`, `！`). Pieces are packed
//! greedily into fragments of at most `max_len` characters. A single piece
//! longer than `max_len` becomes its own fragment, unmodified.

use serde::Serialize;

use crate::error::{NarrationError, Result};

/// One ordered piece of narration text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub index: usize,
    pub text: String,
}

fn is_boundary(c: char) -> bool {
    matches!(c, '.' | '?' | '!' | '\n' | '।' | '॥' | '。' | '？' | '！')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split text into boundary-terminated pieces.
///
/// A piece is the text up to a boundary character plus the run of boundary
/// characters and whitespace that follows it. Concatenating all pieces gives
/// back the input exactly.
fn split_pieces(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_tail = false;

    for (i, c) in text.char_indices() {
        if in_tail {
            if is_boundary(c) || c.is_whitespace() {
                continue;
            }
            pieces.push(&text[start..i]);
            start = i;
            in_tail = false;
        }
        if is_boundary(c) {
            in_tail = true;
        }
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

/// Fragment `text` into pieces of at most `max_len` characters.
///
/// Lengths are counted in Unicode scalar values. Returns `EmptyInput` for
/// blank text and `InvalidFragmentLength` when `max_len` is zero.
pub fn fragment(text: &str, max_len: usize) -> Result<Vec<Fragment>> {
    if max_len == 0 {
        return Err(NarrationError::InvalidFragmentLength);
    }
    if text.trim().is_empty() {
        return Err(NarrationError::EmptyInput);
    }

    let mut texts: Vec<String> = Vec::new();
    let mut buf = String::new();

    for piece in split_pieces(text) {
        let candidate_len = char_len(format!("{buf}{piece}").trim());
        if candidate_len > max_len && !buf.trim().is_empty() {
            texts.push(buf.trim().to_string());
            buf.clear();
        }
        buf.push_str(piece);
    }

    let rest = buf.trim();
    if !rest.is_empty() {
        texts.push(rest.to_string());
    }

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Fragment { index, text })
        .collect())
}
