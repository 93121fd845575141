//! Evidence items and extraction payloads.
//!
//! Models from different providers return "near-shapes": bare strings
//! instead of evidence records, nulls or numbers where a quote string is
//! expected, confidences outside [0, 1]. All coercion happens here, at the
//! deserialization boundary, before typed code ever sees the data. Each
//! coercion is deterministic and preserves the original information.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered extraction tiers, cheapest first.
///
/// The ordering is total: `Regex < LocalLight < LocalStandard < CloudCheap
/// < CloudPremium`. The cascade only ever moves upward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 0: calibrated regex patterns.
    Regex,
    /// Small local model.
    LocalLight,
    /// Standard local model.
    LocalStandard,
    /// Inexpensive cloud model.
    CloudCheap,
    /// Premium cloud model.
    CloudPremium,
}

impl Tier {
    /// Returns the next tier up, or `None` at the terminal tier.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Regex => Some(Self::LocalLight),
            Self::LocalLight => Some(Self::LocalStandard),
            Self::LocalStandard => Some(Self::CloudCheap),
            Self::CloudCheap => Some(Self::CloudPremium),
            Self::CloudPremium => None,
        }
    }

    /// Canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::LocalLight => "local_light",
            Self::LocalStandard => "local_standard",
            Self::CloudCheap => "cloud_cheap",
            Self::CloudPremium => "cloud_premium",
        }
    }

    /// Whether this tier runs against the cloud stream.
    #[must_use]
    pub const fn is_cloud(self) -> bool {
        matches!(self, Self::CloudCheap | Self::CloudPremium)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quote grounding an extracted value in source text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    /// Field this evidence supports.
    pub field_name: String,

    /// The extracted value, as returned by the model.
    pub extracted_value: serde_json::Value,

    /// Exact quote from the source. Always a string after parsing, even if
    /// the transport returned null, a number, or a list.
    pub exact_quote: String,

    /// 1-based page number, when locatable.
    pub page_number: Option<u32>,

    /// Index of the chunk the quote was found in.
    pub chunk_index: Option<usize>,

    /// Start byte offset of the quote within the extraction context.
    pub start_char: Option<usize>,

    /// End byte offset of the quote within the extraction context.
    pub end_char: Option<usize>,

    /// Confidence in [0, 1].
    pub confidence: f64,
}

impl EvidenceItem {
    /// Creates an evidence item with a clamped confidence.
    #[must_use]
    pub fn new(field_name: &str, value: serde_json::Value, quote: &str, confidence: f64) -> Self {
        Self {
            field_name: field_name.to_string(),
            extracted_value: value,
            exact_quote: quote.to_string(),
            page_number: None,
            chunk_index: None,
            start_char: None,
            end_char: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Checks whether the quote is substantial enough to count as grounding.
    #[must_use]
    pub fn has_quote(&self) -> bool {
        self.exact_quote.trim().len() > 10
    }
}

// Manual Deserialize: accepts either a full record or a bare quote string,
// coercing quote and confidence along the way.
impl<'de> Deserialize<'de> for EvidenceItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawItem {
            #[serde(default)]
            field_name: Option<String>,
            #[serde(default)]
            extracted_value: serde_json::Value,
            #[serde(default)]
            exact_quote: serde_json::Value,
            #[serde(default)]
            page_number: Option<u32>,
            #[serde(default)]
            chunk_index: Option<usize>,
            #[serde(default)]
            start_char: Option<usize>,
            #[serde(default)]
            end_char: Option<usize>,
            #[serde(default)]
            confidence: Option<f64>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Full(RawItem),
            // Some models return plain quote strings instead of records.
            Bare(serde_json::Value),
        }

        match Shape::deserialize(deserializer)? {
            Shape::Full(raw) => Ok(Self {
                field_name: raw.field_name.unwrap_or_default(),
                extracted_value: raw.extracted_value,
                exact_quote: coerce_to_string(&raw.exact_quote),
                page_number: raw.page_number,
                chunk_index: raw.chunk_index,
                start_char: raw.start_char,
                end_char: raw.end_char,
                confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            }),
            Shape::Bare(value) => match value {
                serde_json::Value::Object(_) => Err(de::Error::custom(
                    "evidence object did not match the expected shape",
                )),
                other => Ok(Self {
                    field_name: String::new(),
                    extracted_value: serde_json::Value::Null,
                    exact_quote: coerce_to_string(&other),
                    page_number: None,
                    chunk_index: None,
                    start_char: None,
                    end_char: None,
                    confidence: 0.5,
                }),
            },
        }
    }
}

/// Coerces an arbitrary JSON value into a string without dropping data.
///
/// Strings pass through; null becomes empty; numbers and booleans render
/// canonically; lists join on "; "; objects render as compact JSON.
#[must_use]
pub fn coerce_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(coerce_to_string)
            .collect::<Vec<_>>()
            .join("; "),
        other @ serde_json::Value::Object(_) => other.to_string(),
    }
}

/// Per-field and per-run extraction bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Tier that produced the accepted value, per field.
    #[serde(default)]
    pub tier_used: BTreeMap<String, Tier>,

    /// Combined confidence of the accepted value, per field.
    #[serde(default)]
    pub field_confidence: BTreeMap<String, f64>,

    /// Number of LLM calls made.
    #[serde(default)]
    pub model_calls: u32,

    /// Free-form notes (warnings, coercion records).
    #[serde(default)]
    pub notes: Vec<String>,
}

/// A structured extraction: field values, evidence, and bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Field key to extracted value. Covers every schema key; fields no
    /// tier could extract are null.
    pub data: BTreeMap<String, serde_json::Value>,

    /// Evidence quotes supporting the values.
    pub evidence: Vec<EvidenceItem>,

    /// Bookkeeping.
    pub extraction_metadata: ExtractionMetadata,
}

impl Extraction {
    /// Returns the evidence item for a field, if any.
    #[must_use]
    pub fn evidence_for(&self, field: &str) -> Option<&EvidenceItem> {
        self.evidence.iter().find(|e| e.field_name == field)
    }

    /// Counts fields with non-null values.
    #[must_use]
    pub fn extracted_count(&self) -> usize {
        self.data.values().filter(|v| !v.is_null()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_ordering_total() {
        assert!(Tier::Regex < Tier::LocalLight);
        assert!(Tier::LocalLight < Tier::LocalStandard);
        assert!(Tier::LocalStandard < Tier::CloudCheap);
        assert!(Tier::CloudCheap < Tier::CloudPremium);
    }

    #[test]
    fn test_tier_next_chain() {
        assert_eq!(Tier::Regex.next(), Some(Tier::LocalLight));
        assert_eq!(Tier::CloudPremium.next(), None);
    }

    #[test]
    fn test_tier_is_cloud() {
        assert!(!Tier::LocalStandard.is_cloud());
        assert!(Tier::CloudCheap.is_cloud());
    }

    #[test]
    fn test_evidence_full_record() {
        let item: EvidenceItem = serde_json::from_value(json!({
            "field_name": "patient_age",
            "extracted_value": "61",
            "exact_quote": "A 61-year-old female",
            "confidence": 0.95
        }))
        .unwrap();
        assert_eq!(item.field_name, "patient_age");
        assert_eq!(item.exact_quote, "A 61-year-old female");
        assert!((item.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evidence_bare_string() {
        // Some providers return {"evidence": ["quote1", "quote2", ""]}.
        let items: Vec<EvidenceItem> =
            serde_json::from_value(json!(["A 61-year-old female", ""])).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].exact_quote, "A 61-year-old female");
        assert_eq!(items[1].exact_quote, "");
    }

    #[test]
    fn test_evidence_null_quote_becomes_empty_string() {
        let item: EvidenceItem = serde_json::from_value(json!({
            "field_name": "doi",
            "exact_quote": null
        }))
        .unwrap();
        assert_eq!(item.exact_quote, "");
    }

    #[test]
    fn test_evidence_numeric_quote_becomes_string() {
        let item: EvidenceItem = serde_json::from_value(json!({
            "field_name": "year",
            "exact_quote": 2024
        }))
        .unwrap();
        assert_eq!(item.exact_quote, "2024");
    }

    #[test]
    fn test_evidence_list_quote_joined() {
        let item: EvidenceItem = serde_json::from_value(json!({
            "field_name": "symptoms",
            "exact_quote": ["fever", "dyspnea"]
        }))
        .unwrap();
        assert_eq!(item.exact_quote, "fever; dyspnea");
    }

    #[test]
    fn test_evidence_confidence_clamped() {
        let item: EvidenceItem = serde_json::from_value(json!({
            "field_name": "x",
            "exact_quote": "q",
            "confidence": 7.5
        }))
        .unwrap();
        assert!((item.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evidence_has_quote() {
        let short = EvidenceItem::new("f", json!("v"), "too short", 0.9);
        assert!(!short.has_quote());
        let long = EvidenceItem::new("f", json!("v"), "a quote long enough to ground", 0.9);
        assert!(long.has_quote());
    }

    #[test]
    fn test_coerce_to_string_shapes() {
        assert_eq!(coerce_to_string(&json!(null)), "");
        assert_eq!(coerce_to_string(&json!("s")), "s");
        assert_eq!(coerce_to_string(&json!(42)), "42");
        assert_eq!(coerce_to_string(&json!(true)), "true");
        assert_eq!(coerce_to_string(&json!(["a", "b"])), "a; b");
        assert_eq!(coerce_to_string(&json!({"k": "v"})), r#"{"k":"v"}"#);
    }

    #[test]
    fn test_extraction_helpers() {
        let mut extraction = Extraction::default();
        extraction
            .data
            .insert("doi".to_string(), json!("10.1234/x"));
        extraction.data.insert("year".to_string(), json!(null));
        extraction
            .evidence
            .push(EvidenceItem::new("doi", json!("10.1234/x"), "doi: 10.1234/x", 0.9));

        assert_eq!(extraction.extracted_count(), 1);
        assert!(extraction.evidence_for("doi").is_some());
        assert!(extraction.evidence_for("year").is_none());
    }
}
