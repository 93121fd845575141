//! Extractor LLM response shapes.
//!
//! The extraction prompt asks for `{"data": {...}, "evidence": [...],
//! "field_confidence": {...}}`, but providers frequently flatten the
//! wrapper, inline `<field>_quote` keys, or omit confidences entirely.
//! Normalization restores the canonical shape without dropping anything.

use crate::core::EvidenceItem;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Parsed extractor response after coercion.
#[derive(Debug, Clone, Default)]
pub struct ExtractorResponse {
    /// Field key to value.
    pub data: BTreeMap<String, serde_json::Value>,
    /// Evidence items, including ones recovered from `*_quote` keys.
    pub evidence: Vec<EvidenceItem>,
    /// Per-field self-reported confidence.
    pub field_confidence: BTreeMap<String, f64>,
    /// Whole-extraction self-reported confidence.
    pub extraction_confidence: Option<f64>,
}

impl ExtractorResponse {
    /// Parses a raw model value into the canonical response shape.
    ///
    /// Accepts the wrapped form or a bare field mapping. `<field>_quote`
    /// keys for known fields become evidence items rather than data.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if the value is not an object.
    pub fn parse(
        raw: serde_json::Value,
        schema_keys: &[&str],
    ) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Wrapped {
            data: BTreeMap<String, serde_json::Value>,
            #[serde(default)]
            evidence: Vec<EvidenceItem>,
            #[serde(default)]
            field_confidence: BTreeMap<String, f64>,
            #[serde(default)]
            extraction_confidence: Option<f64>,
        }

        if raw.get("data").is_some_and(serde_json::Value::is_object) {
            let wrapped: Wrapped = serde_json::from_value(raw)?;
            let mut response = Self {
                data: wrapped.data,
                evidence: wrapped.evidence,
                field_confidence: clamp_map(wrapped.field_confidence),
                extraction_confidence: wrapped
                    .extraction_confidence
                    .map(|c| c.clamp(0.0, 1.0)),
            };
            response.lift_quote_keys(schema_keys);
            return Ok(response);
        }

        // Bare mapping: the entire object is data, with well-known keys
        // pulled out first.
        let mut map: BTreeMap<String, serde_json::Value> = serde_json::from_value(raw)?;
        let evidence = map
            .remove("evidence")
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();
        let field_confidence = map
            .remove("field_confidence")
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();
        let extraction_confidence = map
            .remove("extraction_confidence")
            .and_then(|v| v.as_f64())
            .map(|c| c.clamp(0.0, 1.0));

        let mut response = Self {
            data: map,
            evidence,
            field_confidence: clamp_map(field_confidence),
            extraction_confidence,
        };
        response.lift_quote_keys(schema_keys);
        Ok(response)
    }

    /// Moves `<field>_quote` entries into evidence for known schema keys.
    fn lift_quote_keys(&mut self, schema_keys: &[&str]) {
        let quote_keys: Vec<String> = self
            .data
            .keys()
            .filter(|k| {
                k.strip_suffix("_quote")
                    .is_some_and(|base| schema_keys.contains(&base))
            })
            .cloned()
            .collect();

        for quote_key in quote_keys {
            let Some(quote_value) = self.data.remove(&quote_key) else {
                continue;
            };
            let field = quote_key.trim_end_matches("_quote").to_string();
            let quote = crate::core::evidence::coerce_to_string(&quote_value);
            if quote.is_empty() || self.evidence.iter().any(|e| e.field_name == field) {
                continue;
            }
            let value = self
                .data
                .get(&field)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let confidence = self.field_confidence.get(&field).copied().unwrap_or(0.5);
            self.evidence
                .push(EvidenceItem::new(&field, value, &quote, confidence));
        }
    }

    /// Returns the evidence quote for a field, if any.
    #[must_use]
    pub fn quote_for(&self, field: &str) -> Option<&str> {
        self.evidence
            .iter()
            .find(|e| e.field_name == field)
            .map(|e| e.exact_quote.as_str())
    }

    /// Self-reported confidence for a field, falling back to the
    /// whole-extraction confidence.
    #[must_use]
    pub fn confidence_for(&self, field: &str) -> Option<f64> {
        self.field_confidence
            .get(field)
            .copied()
            .or(self.extraction_confidence)
    }
}

fn clamp_map(map: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    map.into_iter()
        .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
        .collect()
}
