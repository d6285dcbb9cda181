//! Chunking utilities for splitting a document into overlapping segments.
//!
//! The document is walked with a sliding window of `chunk_size` characters.
//! Each window end is pulled back to a natural breakpoint (paragraph, line,
//! sentence, word) when one exists near the end of the window, and the next
//! window starts `overlap` characters before the previous end. Consecutive
//! chunks therefore always share exactly `overlap` characters, and dropping
//! that shared prefix from every chunk after the first reconstructs the
//! document.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Fraction of the window (1/N) searched backwards for a breakpoint.
const BOUNDARY_TOLERANCE_DIVISOR: usize = 4;

/// Breakpoints in priority order. Whitespace in general is the last resort
/// before a hard cut and is handled separately.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? "];

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Reject a zero chunk size and an overlap that would stall the window.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Document-level provenance attached to every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_title: String,
    pub source_url: String,
    /// Zero-based chunk index within the document.
    pub position: usize,
    /// Character offset where this chunk starts in the document.
    pub offset: usize,
}

/// A bounded span of the source document with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Split a document into overlapping chunks.
///
/// An empty document yields no chunks. A zero `chunk_size`, or an `overlap`
/// that is not strictly smaller than it, fails with
/// [`Error::InvalidConfiguration`].
///
/// # Examples
///
/// ```
/// use wikirag::chunking::{split, DocumentSource};
///
/// let source = DocumentSource {
///     title: "Cybersecurity".into(),
///     url: "https://en.wikipedia.org/wiki/Computer_security".into(),
/// };
/// let chunks = split("Hello, world!", 800, 150, &source).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
/// assert_eq!(chunks[0].metadata.source_title, "Cybersecurity");
/// ```
pub fn split(
    document: &str,
    chunk_size: usize,
    overlap: usize,
    source: &DocumentSource,
) -> Result<Vec<Chunk>> {
    ChunkingConfig {
        chunk_size,
        overlap,
    }
    .validate()?;

    if document.is_empty() {
        return Ok(Vec::new());
    }

    // Char index -> byte index, with one trailing entry for the end.
    let char_to_byte: Vec<usize> = document
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(document.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;
    let tolerance = (chunk_size / BOUNDARY_TOLERANCE_DIVISOR).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + chunk_size).min(char_count);
        let end = if hard_end < char_count {
            // The window must stay longer than the overlap or it never moves.
            let earliest = (start + overlap + 1).max(hard_end - tolerance);
            find_breakpoint(document, &char_to_byte, earliest, hard_end)
        } else {
            hard_end
        };

        chunks.push(Chunk {
            text: document[char_to_byte[start]..char_to_byte[end]].to_string(),
            metadata: ChunkMetadata {
                source_title: source.title.clone(),
                source_url: source.url.clone(),
                position: chunks.len(),
                offset: start,
            },
        });

        if end >= char_count {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

/// Find the best window end in `earliest..=hard_end` (char positions).
///
/// Returns the position just after the highest-priority separator found,
/// or `hard_end` when the region has none.
fn find_breakpoint(
    text: &str,
    char_to_byte: &[usize],
    earliest: usize,
    hard_end: usize,
) -> usize {
    if earliest >= hard_end {
        return hard_end;
    }

    let region_start = char_to_byte[earliest];
    let region = &text[region_start..char_to_byte[hard_end]];

    let after = SEPARATORS
        .iter()
        .find_map(|sep| region.rfind(sep).map(|at| at + sep.len()))
        .or_else(|| {
            region
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(at, c)| at + c.len_utf8())
        });

    match after {
        Some(offset) => char_to_byte
            .binary_search(&(region_start + offset))
            .unwrap_or(hard_end),
        None => hard_end,
    }
}
