//! Content filter: boilerplate and near-duplicate removal.
//!
//! Drops chunks from boilerplate sections, strips repeated journal
//! headers/footers, lone page numbers, and watermark tokens, caps blank
//! runs, and removes near-duplicate chunks by token Jaccard similarity.
//! The filter is idempotent: running it over its own output is a no-op.

use crate::config::FilterConfig;
use crate::core::{DocumentChunk, FilterStats};
use rayon::prelude::*;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// Pattern literals are known-valid; a failed compile would be a bug here.
#[allow(clippy::unwrap_used)]
static PAGE_NUMBER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d{1,4}\s*$").unwrap());

#[allow(clippy::unwrap_used)]
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

/// Filtered chunks plus removal statistics.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Chunks surviving the filter, original order preserved.
    pub chunks: Vec<DocumentChunk>,
    /// Counts and token savings.
    pub stats: FilterStats,
}

/// Drops boilerplate and near-duplicate content ahead of classification.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    config: FilterConfig,
}

impl ContentFilter {
    /// Creates a filter from configuration.
    #[must_use]
    pub const fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Filters chunks, returning survivors and statistics.
    #[must_use]
    pub fn filter_chunks(&self, chunks: &[DocumentChunk]) -> FilterOutcome {
        let original_chunks = chunks.len();
        let original_tokens: usize = chunks.iter().map(DocumentChunk::estimate_tokens).sum();

        let repeated_lines = self.repeated_header_lines(chunks);

        // Per-chunk text cleanup, then section and blank drops.
        let cleaned: Vec<DocumentChunk> = chunks
            .iter()
            .filter(|chunk| !self.is_boilerplate_section(chunk))
            .map(|chunk| {
                let mut cleaned = chunk.clone();
                cleaned.text = self.clean_text(&chunk.text, &repeated_lines);
                cleaned
            })
            .filter(|chunk| !chunk.is_blank())
            .collect();

        // Near-duplicate drop: first occurrence wins. The scan over kept
        // chunks is the O(n^2) part, so candidate comparisons run on the
        // rayon pool.
        let mut kept: Vec<DocumentChunk> = Vec::with_capacity(cleaned.len());
        let mut kept_tokens: Vec<HashSet<String>> = Vec::with_capacity(cleaned.len());
        for chunk in cleaned {
            let tokens = tokenize(&chunk.text);
            let duplicate = kept_tokens
                .par_iter()
                .any(|earlier| jaccard(earlier, &tokens) > self.config.similarity_threshold);
            if !duplicate {
                kept.push(chunk);
                kept_tokens.push(tokens);
            }
        }

        let filtered_tokens: usize = kept.iter().map(DocumentChunk::estimate_tokens).sum();
        let stats = FilterStats {
            original_chunks,
            filtered_chunks: kept.len(),
            removed_chunks: original_chunks - kept.len(),
            estimated_tokens_saved: original_tokens.saturating_sub(filtered_tokens),
        };

        tracing::debug!(
            original = stats.original_chunks,
            kept = stats.filtered_chunks,
            tokens_saved = stats.estimated_tokens_saved,
            "content filter applied"
        );

        FilterOutcome { chunks: kept, stats }
    }

    fn is_boilerplate_section(&self, chunk: &DocumentChunk) -> bool {
        chunk.section.as_ref().is_some_and(|section| {
            let section = section.to_lowercase();
            self.config
                .boilerplate_sections
                .iter()
                .any(|b| section.contains(b.as_str()))
        })
    }

    /// Collects short lines repeated across enough distinct pages to count
    /// as running headers or footers.
    fn repeated_header_lines(&self, chunks: &[DocumentChunk]) -> HashSet<String> {
        let mut pages_per_line: HashMap<&str, HashSet<u32>> = HashMap::new();
        for chunk in chunks {
            let Some(page) = chunk.page_number else {
                continue;
            };
            for line in chunk.text.lines() {
                let line = line.trim();
                if line.is_empty() || line.len() > 80 {
                    continue;
                }
                pages_per_line.entry(line).or_default().insert(page);
            }
        }
        pages_per_line
            .into_iter()
            .filter(|(_, pages)| pages.len() >= self.config.header_min_page_count)
            .map(|(line, _)| line.to_string())
            .collect()
    }

    /// Strips repeated headers, page-number lines, and watermarks, and caps
    /// consecutive blank lines at two while preserving paragraph structure.
    fn clean_text(&self, text: &str, repeated_lines: &HashSet<String>) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut blank_run = 0_usize;

        for line in text.lines() {
            let trimmed = line.trim();
            if repeated_lines.contains(trimmed) || PAGE_NUMBER_LINE.is_match(line) {
                continue;
            }
            let mut line = line.to_string();
            for token in &self.config.watermark_tokens {
                line = line.replace(token.as_str(), "");
            }
            if line.trim().is_empty() {
                blank_run += 1;
                if blank_run > 2 {
                    continue;
                }
                out.push(String::new());
            } else {
                blank_run = 0;
                out.push(line.trim_end().to_string());
            }
        }

        // Trailing blanks would accumulate across repeated passes.
        while out.last().is_some_and(String::is_empty) {
            out.pop();
        }
        out.join("\n")
    }
}

/// Lowercase word tokenization.
#[must_use]
pub fn tokenize(text: &str) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Token Jaccard similarity: |A ∩ B| / |A ∪ B|.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
