//! Tier-0 regex extraction.
//!
//! Well-patterned fields (DOI, publication year, sample sizes, ages) are
//! extracted with calibrated confidences before any model is consulted.
//! Confidences are per pattern, reflecting how specific the pattern is;
//! the controller accepts a match only at or above the configured mid
//! threshold.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A Tier-0 match: value, calibrated confidence, and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexResult {
    /// Extracted value, normalized to a string.
    pub value: String,
    /// Calibrated confidence in [0, 1].
    pub confidence: f64,
    /// Start byte offset of the match in the input text.
    pub start: usize,
    /// End byte offset of the match in the input text.
    pub end: usize,
}

enum Capture {
    /// Single capture group becomes the value.
    Single,
    /// Two capture groups joined as "low-high".
    Range,
}

struct Pattern {
    regex: Regex,
    confidence: f64,
    capture: Capture,
}

struct FieldPatterns {
    field: &'static str,
    patterns: Vec<Pattern>,
}

#[allow(clippy::unwrap_used)]
fn pattern(raw: &str, confidence: f64, capture: Capture) -> Pattern {
    Pattern {
        regex: Regex::new(raw).unwrap(),
        confidence,
        capture,
    }
}

static FIELD_PATTERNS: LazyLock<Vec<FieldPatterns>> = LazyLock::new(|| {
    vec![
        FieldPatterns {
            field: "doi",
            patterns: vec![pattern(
                r#"(?i)(?:doi[:\s]+|doi\.org/)(10\.\d{4,9}/[^\s,;"']+)"#,
                0.97,
                Capture::Single,
            )],
        },
        FieldPatterns {
            field: "publication_year",
            patterns: vec![
                pattern(
                    r"(?i)published(?:\s+online)?(?:\s+in)?\s+((?:19|20)\d{2})",
                    0.88,
                    Capture::Single,
                ),
                pattern(r"\(((?:19|20)\d{2})\)", 0.80, Capture::Single),
                pattern(r"©\s*((?:19|20)\d{2})", 0.80, Capture::Single),
            ],
        },
        FieldPatterns {
            field: "sample_size",
            patterns: vec![
                pattern(r"(?i)\bn\s*=\s*(\d+)", 0.93, Capture::Single),
                pattern(
                    r"(?i)(?:enrolled|included|recruited|identified)\s+(?:a\s+total\s+of\s+)?(\d+)\s+(?:patients|subjects|participants|cases)",
                    0.88,
                    Capture::Single,
                ),
                pattern(
                    r"(?i)sample\s+size\s+(?:was|of)\s+(?:n\s*=\s*)?(\d+)",
                    0.90,
                    Capture::Single,
                ),
            ],
        },
        FieldPatterns {
            field: "case_count",
            patterns: vec![
                pattern(
                    r"(?i)(?:identified|reported|included)\s+(\d+)\s+cases",
                    0.85,
                    Capture::Single,
                ),
                pattern(
                    r"(?i)(?:study|series)\s+included\s+(\d+)\s+patients",
                    0.82,
                    Capture::Single,
                ),
                pattern(r"(?i)(\d+)\s+(?:cases|patients)\b", 0.78, Capture::Single),
            ],
        },
        FieldPatterns {
            field: "patient_age",
            patterns: vec![
                pattern(
                    r"(?i)(\d+(?:\.\d+)?)[-\s]year[-\s]old",
                    0.92,
                    Capture::Single,
                ),
                pattern(
                    r"(?i)(?:median|mean)\s+age\s+(?:was|of)\s+(\d+(?:\.\d+)?)",
                    0.88,
                    Capture::Single,
                ),
                pattern(
                    r"(?i)ages?\s+ranged\s+from\s+(\d+)\s+to\s+(\d+)",
                    0.85,
                    Capture::Range,
                ),
            ],
        },
    ]
});

/// Extracts well-patterned fields with calibrated confidences.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexExtractor;

impl RegexExtractor {
    /// Creates an extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Field names this extractor has patterns for.
    #[must_use]
    pub fn supported_fields() -> Vec<&'static str> {
        FIELD_PATTERNS.iter().map(|f| f.field).collect()
    }

    /// Attempts to extract one field; patterns are tried in declaration
    /// order and the first match wins.
    #[must_use]
    pub fn extract_field(&self, field: &str, text: &str) -> Option<RegexResult> {
        let entry = FIELD_PATTERNS.iter().find(|f| f.field == field)?;
        for pattern in &entry.patterns {
            if let Some(captures) = pattern.regex.captures(text) {
                let full = captures.get(0)?;
                let value = match pattern.capture {
                    Capture::Single => trim_value(captures.get(1)?.as_str()),
                    Capture::Range => format!(
                        "{}-{}",
                        captures.get(1)?.as_str(),
                        captures.get(2)?.as_str()
                    ),
                };
                return Some(RegexResult {
                    value,
                    confidence: pattern.confidence,
                    start: full.start(),
                    end: full.end(),
                });
            }
        }
        None
    }

    /// Extracts every supported field that matches.
    #[must_use]
    pub fn extract_all(&self, text: &str) -> BTreeMap<String, RegexResult> {
        FIELD_PATTERNS
            .iter()
            .filter_map(|entry| {
                self.extract_field(entry.field, text)
                    .map(|result| (entry.field.to_string(), result))
            })
            .collect()
    }
}

/// Strips trailing sentence punctuation from a captured value.
fn trim_value(raw: &str) -> String {
    raw.trim_end_matches(['.', ',', ';', ')']).to_string()
}
