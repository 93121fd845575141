//! Evidence grounding.
//!
//! Locates each evidence quote in the extraction context: exact substring
//! match first, then a token-Jaccard sliding-window fuzzy match for quotes
//! the model lightly paraphrased. Grounded quotes get their character span
//! filled in; ungrounded quotes are down-weighted.

use crate::core::EvidenceItem;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Minimum Jaccard score for a fuzzy match.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

/// Window slack: how much the candidate window may differ from the
/// pattern length, as a fraction.
const WINDOW_SLACK: f64 = 0.5;

/// Confidence multiplier applied to quotes that cannot be located.
const UNGROUNDED_FACTOR: f64 = 0.8;

#[allow(clippy::unwrap_used)]
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").unwrap());

/// A located quote.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundedMatch {
    /// The matched source text.
    pub matched_text: String,
    /// Jaccard score of the match (1.0 for exact).
    pub score: f64,
    /// Start byte offset in the source.
    pub start: usize,
    /// End byte offset in the source.
    pub end: usize,
}

/// Finds the best match for a quote within the source text.
///
/// Exact matches short-circuit at score 1.0. Otherwise a token sliding
/// window compares Jaccard similarity, with window sizes within
/// `WINDOW_SLACK` of the quote's token count.
#[must_use]
pub fn find_best_match(text: &str, pattern: &str, threshold: f64) -> Option<GroundedMatch> {
    if pattern.is_empty() || text.is_empty() {
        return None;
    }

    if let Some(start) = text.find(pattern) {
        return Some(GroundedMatch {
            matched_text: pattern.to_string(),
            score: 1.0,
            start,
            end: start + pattern.len(),
        });
    }

    let pattern_tokens: Vec<String> = WORD
        .find_iter(&pattern.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect();
    if pattern_tokens.is_empty() {
        return None;
    }
    let pattern_set: HashSet<&str> = pattern_tokens.iter().map(String::as_str).collect();

    // Token map over the original text: (lowercased token, start, end).
    let lower = text.to_lowercase();
    let token_map: Vec<(String, usize, usize)> = WORD
        .find_iter(&lower)
        .map(|m| (m.as_str().to_string(), m.start(), m.end()))
        .collect();
    if token_map.is_empty() {
        return None;
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let (min_window, max_window) = {
        let n = pattern_tokens.len() as f64;
        let min = ((n * (1.0 - WINDOW_SLACK)) as usize).max(1);
        let max = (n * (1.0 + WINDOW_SLACK)) as usize + 1;
        (min, max)
    };

    let mut best_score = 0.0;
    let mut best_window = None;

    for start in 0..token_map.len() {
        if start + min_window > token_map.len() {
            break;
        }
        let longest = max_window.min(token_map.len() - start);
        for window_len in min_window..=longest {
            let window: HashSet<&str> = token_map[start..start + window_len]
                .iter()
                .map(|(token, _, _)| token.as_str())
                .collect();
            let score = jaccard(&window, &pattern_set);
            if score > best_score {
                best_score = score;
                best_window = Some((start, start + window_len));
            }
        }
    }

    let (window_start, window_end) = best_window?;
    if best_score < threshold {
        return None;
    }
    let start = token_map[window_start].1;
    let end = token_map[window_end - 1].2;
    Some(GroundedMatch {
        matched_text: text.get(start..end).unwrap_or_default().to_string(),
        score: best_score,
        start,
        end,
    })
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
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

/// Grounds every evidence item against the context.
///
/// Located quotes get `start_char`/`end_char` filled; quotes that cannot
/// be located keep their text but lose a fifth of their confidence.
pub fn ground_evidence(items: &mut [EvidenceItem], context: &str) {
    for item in items {
        if item.exact_quote.trim().is_empty() {
            continue;
        }
        match find_best_match(context, &item.exact_quote, FUZZY_MATCH_THRESHOLD) {
            Some(located) => {
                item.start_char = Some(located.start);
                item.end_char = Some(located.end);
            }
            None => {
                tracing::debug!(
                    field = item.field_name.as_str(),
                    "evidence quote not found in context; down-weighting"
                );
                item.confidence = (item.confidence * UNGROUNDED_FACTOR).clamp(0.0, 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEXT: &str = "The patient was a 52-year-old woman who presented \
                        with progressive dyspnea over 6 months.";

    #[test]
    fn test_exact_match() {
        let m = find_best_match(TEXT, "52-year-old woman", 0.8).unwrap();
        assert!((m.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(&TEXT[m.start..m.end], "52-year-old woman");
    }

    #[test]
    fn test_fuzzy_match_tolerates_small_edits() {
        // Quote drops one word relative to the source.
        let m = find_best_match(TEXT, "presented with progressive dyspnea 6 months", 0.7)
            .unwrap();
        assert!(m.score >= 0.7);
        assert!(m.matched_text.contains("progressive dyspnea"));
    }

    #[test]
    fn test_unrelated_pattern_no_match() {
        assert!(find_best_match(TEXT, "completely unrelated content about engines", 0.8).is_none());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(find_best_match("", "x", 0.8).is_none());
        assert!(find_best_match("x", "", 0.8).is_none());
    }

    #[test]
    fn test_ground_evidence_sets_spans() {
        let mut items = vec![EvidenceItem::new(
            "age",
            json!("52"),
            "52-year-old woman",
            0.9,
        )];
        ground_evidence(&mut items, TEXT);
        assert!(items[0].start_char.is_some());
        assert!(items[0].end_char.is_some());
        assert!((items[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ground_evidence_downweights_fabricated_quote() {
        let mut items = vec![EvidenceItem::new(
            "age",
            json!("52"),
            "this quote appears nowhere in the source document",
            1.0,
        )];
        ground_evidence(&mut items, TEXT);
        assert!(items[0].start_char.is_none());
        assert!((items[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_ground_evidence_skips_empty_quotes() {
        let mut items = vec![EvidenceItem::new("age", json!("52"), "", 0.9)];
        ground_evidence(&mut items, TEXT);
        assert!((items[0].confidence - 0.9).abs() < f64::EPSILON);
    }
}
