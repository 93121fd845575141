//! Pure pipeline stages.
//!
//! Context building, regex pre-fill, recall scanning, and pre-fill
//! carry-over are plain functions with no I/O: fully testable and shared
//! by the sync and async entry points.

use crate::config::PipelineConfig;
use crate::core::{DocumentChunk, Extraction, Schema, Tier};
use crate::extract::cascade::PreFilled;
use crate::extract::regex::RegexExtractor;
use std::collections::BTreeMap;

/// Concatenates relevant chunk text in original order, bounded by
/// `max_chars`.
///
/// Stops at the first chunk that would overflow the bound, preserving
/// whole chunks only.
#[must_use]
pub fn build_context(chunks: &[DocumentChunk], max_chars: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut total = 0;
    for chunk in chunks {
        if total + chunk.text.len() > max_chars {
            break;
        }
        parts.push(chunk.text.as_str());
        total += chunk.text.len();
    }
    parts.join("\n\n")
}

/// Runs Tier-0 regex extraction over the context.
///
/// A match becomes a pre-filled field when the schema declares the field
/// and the calibrated confidence is at or above the mid threshold.
#[must_use]
pub fn apply_regex_prefill(
    context: &str,
    schema: &Schema,
    extractor: &RegexExtractor,
    confidence_threshold_mid: f64,
) -> BTreeMap<String, PreFilled> {
    let mut pre_filled = BTreeMap::new();
    for (field, result) in extractor.extract_all(context) {
        if schema.field(&field).is_none() {
            continue;
        }
        if result.confidence >= confidence_threshold_mid {
            tracing::info!(
                field = field.as_str(),
                value = result.value.as_str(),
                confidence = result.confidence,
                "tier 0 accepted"
            );
            pre_filled.insert(
                field,
                PreFilled {
                    value: serde_json::Value::String(result.value),
                    tier: Tier::Regex,
                    confidence: result.confidence,
                },
            );
        }
    }
    pre_filled
}

/// Schema keys that are null in the data but whose policy demands a
/// targeted recall pass.
#[must_use]
pub fn missing_recall_fields(
    data: &BTreeMap<String, serde_json::Value>,
    schema: &Schema,
    config: &PipelineConfig,
) -> Vec<String> {
    schema
        .fields
        .iter()
        .filter(|spec| {
            spec.policy.is_recall_critical()
                || (config.recall_boost_inferred
                    && spec.policy == crate::core::ExtractionPolicy::CanBeInferred)
        })
        .filter(|spec| data.get(&spec.key).is_none_or(serde_json::Value::is_null))
        .map(|spec| spec.key.clone())
        .collect()
}

/// Converts accepted fields of an extraction into pre-fills for the next
/// iteration, stabilizing convergence.
#[must_use]
pub fn carried_pre_filled(extraction: &Extraction) -> BTreeMap<String, PreFilled> {
    extraction
        .data
        .iter()
        .filter(|(_, value)| !value.is_null())
        .filter_map(|(key, value)| {
            let tier = extraction.extraction_metadata.tier_used.get(key)?;
            let confidence = extraction
                .extraction_metadata
                .field_confidence
                .get(key)
                .copied()
                .unwrap_or(0.5);
            Some((
                key.clone(),
                PreFilled {
                    value: value.clone(),
                    tier: *tier,
                    confidence,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExtractionPolicy, FieldSpec};
    use serde_json::json;

    fn chunk(index: usize, text: &str) -> DocumentChunk {
        DocumentChunk::new(index, text.to_string())
    }

    #[test]
    fn test_build_context_joins_in_order() {
        let chunks = vec![chunk(0, "first"), chunk(1, "second")];
        assert_eq!(build_context(&chunks, 1_000), "first\n\nsecond");
    }

    #[test]
    fn test_build_context_stops_at_first_overflow() {
        let chunks = vec![chunk(0, "aaaa"), chunk(1, "bbbbbbbbbb"), chunk(2, "cc")];
        // Chunk 1 would overflow; the scan stops there even though chunk 2
        // alone would fit.
        assert_eq!(build_context(&chunks, 8), "aaaa");
    }

    #[test]
    fn test_build_context_empty_when_first_chunk_overflows() {
        let chunks = vec![chunk(0, "much too long for the configured bound")];
        assert_eq!(build_context(&chunks, 4), "");
    }

    #[test]
    fn test_regex_prefill_respects_schema_and_threshold() {
        let schema = Schema::new(
            "demo",
            1,
            vec![
                FieldSpec::scalar("doi", ""),
                FieldSpec::scalar("sample_size", ""),
            ],
        )
        .unwrap();
        let context = "DOI: 10.1234/test. Published 2024. We enrolled 50 patients.";
        let pre_filled =
            apply_regex_prefill(context, &schema, &RegexExtractor::new(), 0.75);

        assert_eq!(pre_filled["doi"].value, json!("10.1234/test"));
        assert_eq!(pre_filled["sample_size"].value, json!("50"));
        assert_eq!(pre_filled["doi"].tier, Tier::Regex);
        // publication_year matched the text but is not in the schema.
        assert!(!pre_filled.contains_key("publication_year"));
    }

    #[test]
    fn test_regex_prefill_confidence_exactly_at_threshold_accepted() {
        let schema = Schema::new("demo", 1, vec![FieldSpec::scalar("sample_size", "")]).unwrap();
        // The n= pattern carries confidence 0.93; a threshold of exactly
        // 0.93 still accepts.
        let pre_filled = apply_regex_prefill(
            "sample n=42",
            &schema,
            &RegexExtractor::new(),
            0.93,
        );
        assert!(pre_filled.contains_key("sample_size"));
    }

    #[test]
    fn test_regex_prefill_below_threshold_rejected() {
        let schema = Schema::new("demo", 1, vec![FieldSpec::scalar("sample_size", "")]).unwrap();
        let pre_filled = apply_regex_prefill(
            "sample n=42",
            &schema,
            &RegexExtractor::new(),
            0.99,
        );
        assert!(pre_filled.is_empty());
    }

    #[test]
    fn test_missing_recall_fields_default_policy_set() {
        let schema = Schema::new(
            "demo",
            1,
            vec![
                FieldSpec::scalar("primary_outcome", "")
                    .with_policy(ExtractionPolicy::MustBeExplicit),
                FieldSpec::scalar("context_field", "")
                    .with_policy(ExtractionPolicy::CanBeInferred),
            ],
        )
        .unwrap();
        let mut data = BTreeMap::new();
        data.insert("primary_outcome".to_string(), json!(null));
        data.insert("context_field".to_string(), json!(null));

        let config = PipelineConfig::default();
        let missing = missing_recall_fields(&data, &schema, &config);
        assert_eq!(missing, vec!["primary_outcome".to_string()]);
    }

    #[test]
    fn test_missing_recall_fields_inferred_toggle() {
        let schema = Schema::new(
            "demo",
            1,
            vec![FieldSpec::scalar("context_field", "")
                .with_policy(ExtractionPolicy::CanBeInferred)],
        )
        .unwrap();
        let mut data = BTreeMap::new();
        data.insert("context_field".to_string(), json!(null));

        let config = PipelineConfig {
            recall_boost_inferred: true,
            ..PipelineConfig::default()
        };
        let missing = missing_recall_fields(&data, &schema, &config);
        assert_eq!(missing, vec!["context_field".to_string()]);
    }

    #[test]
    fn test_missing_recall_fields_filled_not_listed() {
        let schema = Schema::new(
            "demo",
            1,
            vec![FieldSpec::scalar("primary_outcome", "")
                .with_policy(ExtractionPolicy::MustBeExplicit)],
        )
        .unwrap();
        let mut data = BTreeMap::new();
        data.insert("primary_outcome".to_string(), json!("Survival"));
        let missing = missing_recall_fields(&data, &schema, &PipelineConfig::default());
        assert!(missing.is_empty());
    }

    #[test]
    fn test_carried_pre_filled_skips_nulls() {
        let mut extraction = Extraction::default();
        extraction.data.insert("a".to_string(), json!("value"));
        extraction.data.insert("b".to_string(), json!(null));
        extraction
            .extraction_metadata
            .tier_used
            .insert("a".to_string(), Tier::LocalStandard);
        extraction
            .extraction_metadata
            .field_confidence
            .insert("a".to_string(), 0.88);

        let carried = carried_pre_filled(&extraction);
        assert_eq!(carried.len(), 1);
        assert_eq!(carried["a"].tier, Tier::LocalStandard);
        assert!((carried["a"].confidence - 0.88).abs() < f64::EPSILON);
    }
}
