//! Parsed document representation.
//!
//! Documents arrive from an external parser as ordered chunks plus the
//! concatenated full text. Chunks refer to their parent by index, never by
//! pointer; the document owns its chunks for the duration of one extraction.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A contiguous segment of document text with positional metadata.
///
/// # Examples
///
/// ```
/// use sr_extract::core::DocumentChunk;
///
/// let chunk = DocumentChunk::new(0, "We enrolled 50 patients.".to_string());
/// assert_eq!(chunk.estimate_tokens(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Chunk text.
    pub text: String,

    /// Section label where known (e.g. "methods", "references").
    #[serde(default)]
    pub section: Option<String>,

    /// 1-based page number where known.
    #[serde(default)]
    pub page_number: Option<u32>,

    /// Sequential index within the document (0-based).
    pub chunk_index: usize,
}

impl DocumentChunk {
    /// Creates a chunk with no section or page metadata.
    #[must_use]
    pub const fn new(chunk_index: usize, text: String) -> Self {
        Self {
            text,
            section: None,
            page_number: None,
            chunk_index,
        }
    }

    /// Creates a chunk with a section label.
    #[must_use]
    pub fn with_section(chunk_index: usize, text: String, section: &str) -> Self {
        Self {
            text,
            section: Some(section.to_string()),
            page_number: None,
            chunk_index,
        }
    }

    /// Estimates token count using the ~4 chars per token approximation.
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.text.len().div_ceil(4)
    }

    /// Returns a grapheme-safe preview of the chunk text.
    ///
    /// Never splits a grapheme cluster, so the preview is always valid for
    /// display inside classifier prompts.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        self.text.graphemes(true).take(max_chars).collect()
    }

    /// Checks whether the chunk contains no non-whitespace text.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A parsed document: identity plus ordered chunks and concatenated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Source filename; identity within a batch.
    pub filename: String,

    /// Ordered chunks.
    pub chunks: Vec<DocumentChunk>,

    /// Concatenated text of all chunks.
    pub full_text: String,
}

impl Document {
    /// Creates a document, deriving `full_text` from the chunks.
    #[must_use]
    pub fn new(filename: &str, chunks: Vec<DocumentChunk>) -> Self {
        let full_text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            filename: filename.to_string(),
            chunks,
            full_text,
        }
    }

    /// Creates a single-chunk document from plain text.
    #[must_use]
    pub fn from_text(filename: &str, text: &str) -> Self {
        Self::new(filename, vec![DocumentChunk::new(0, text.to_string())])
    }

    /// Parses a document from the external parser's JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the parser contract.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| PipelineError::InvalidInput(format!("document parse: {e}")).into())
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Estimates total token count across all chunks.
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.chunks.iter().map(DocumentChunk::estimate_tokens).sum()
    }
}
