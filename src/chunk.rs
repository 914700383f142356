//! Overlapping fixed-size text chunker.
//!
//! Splits [`SourceDocument`]s into [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive windows overlap by `overlap` characters so a
//! sentence that straddles a boundary survives intact in at least one chunk.
//!
//! # Algorithm
//!
//! 1. Work on chars, not bytes, so multi-byte text never splits mid-codepoint.
//! 2. A window runs from `start` to `start + chunk_size`.
//! 3. If the window does not reach the end of the text, its end is pulled
//!    back to the last whitespace in the second half of the window, so words
//!    are not cut when avoidable.
//! 4. The next window starts at `end - overlap`, but always strictly after
//!    the previous start.
//! 5. Each window is trimmed; whitespace-only windows are dropped.
//!
//! Output is fully deterministic: the chunk id is derived from source, page,
//! index and content hash, so the same input always yields the same chunks.
//!
//! # Example
//!
//! ```rust
//! use askdocs::chunk::split;
//! use askdocs::models::SourceDocument;
//!
//! let doc = SourceDocument {
//!     text: "The capital of France is Paris.".to_string(),
//!     source: "facts.txt".to_string(),
//!     page: None,
//! };
//! let chunks = split(&[doc], 1000, 100).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::{Chunk, SourceDocument};

/// Split documents into overlapping chunks, preserving document order.
///
/// # Errors
///
/// Fails when `chunk_size == 0` or `overlap >= chunk_size`.
pub fn split(documents: &[SourceDocument], chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    if overlap >= chunk_size {
        bail!(
            "overlap ({}) must be less than chunk_size ({})",
            overlap,
            chunk_size
        );
    }

    let mut chunks = Vec::new();
    for doc in documents {
        chunks.extend(split_document(doc, chunk_size, overlap));
    }
    Ok(chunks)
}

fn split_document(doc: &SourceDocument, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = doc.text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            snap_to_whitespace(&chars, start, hard_end, chunk_size)
        } else {
            hard_end
        };

        let window: String = chars[start..end].iter().collect();
        let leading = window.chars().take_while(|c| c.is_whitespace()).count();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            chunks.push(make_chunk(doc, chunk_index, start + leading, trimmed));
            chunk_index += 1;
        }

        if end >= total {
            break;
        }
        // Always advance, but never past the overlap.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Pull `end` back to just after the last whitespace in the second half of
/// the window. Returns `end` unchanged if there is none.
fn snap_to_whitespace(chars: &[char], start: usize, end: usize, chunk_size: usize) -> usize {
    let floor = start + chunk_size / 2;
    (floor..end)
        .rev()
        .find(|&i| chars[i].is_whitespace())
        .map(|i| i + 1)
        .filter(|&i| i > start)
        .unwrap_or(end)
}

fn make_chunk(doc: &SourceDocument, index: usize, offset: usize, text: &str) -> Chunk {
    let hash = sha256_hex(text.as_bytes());

    let mut id_hasher = Sha256::new();
    id_hasher.update(doc.source.as_bytes());
    id_hasher.update(doc.page.unwrap_or(0).to_le_bytes());
    id_hasher.update((index as u64).to_le_bytes());
    id_hasher.update(hash.as_bytes());
    let id = format!("{:x}", id_hasher.finalize());

    Chunk {
        id: id[..32].to_string(),
        text: text.to_string(),
        source: doc.source.clone(),
        page: doc.page,
        offset,
        chunk_index: index,
        hash,
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
