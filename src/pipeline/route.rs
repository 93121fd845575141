//! Post-extraction confidence routing.
//!
//! Component scores (completeness, traceability, certainty) plus the mean
//! field confidence combine into a routing decision: approve
//! automatically, flag for a human, or mark for re-extraction.

use crate::core::{ConfidenceBreakdown, Extraction, RouteDecision, Schema};
use crate::extract::tier::NOT_REPORTED_PHRASES;

/// Score at or above which a concern-free extraction auto-approves.
const AUTO_APPROVE_THRESHOLD: f64 = 0.8;
/// Score at or above which an extraction goes to human review instead of
/// re-extraction.
const HUMAN_REVIEW_THRESHOLD: f64 = 0.5;

const COMPLETENESS_WEIGHT: f64 = 0.35;
const TRACEABILITY_WEIGHT: f64 = 0.30;
const CERTAINTY_WEIGHT: f64 = 0.20;
const SELF_CONFIDENCE_WEIGHT: f64 = 0.15;

/// Assesses an extraction and produces a route plus its breakdown.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn assess_routing(extraction: &Extraction, schema: &Schema) -> (RouteDecision, ConfidenceBreakdown) {
    let mut breakdown = ConfidenceBreakdown::default();

    for spec in &schema.fields {
        let value = extraction.data.get(&spec.key);
        let filled = value.is_some_and(|v| !v.is_null() && *v != serde_json::Value::String(String::new()));
        if filled {
            breakdown.fields_extracted += 1;
            if let Some(value) = value {
                let text = crate::core::evidence::coerce_to_string(value).to_lowercase();
                if NOT_REPORTED_PHRASES.iter().any(|p| text.contains(p)) {
                    breakdown.not_reported_count += 1;
                }
            }
        } else {
            breakdown.fields_missing += 1;
        }
        if extraction
            .evidence_for(&spec.key)
            .is_some_and(crate::core::EvidenceItem::has_quote)
        {
            breakdown.fields_with_quotes += 1;
        }
    }

    let total = (breakdown.fields_extracted + breakdown.fields_missing).max(1);
    let extracted = breakdown.fields_extracted.max(1);
    breakdown.completeness = breakdown.fields_extracted as f64 / total as f64;
    breakdown.traceability =
        (breakdown.fields_with_quotes as f64 / extracted as f64).clamp(0.0, 1.0);
    breakdown.certainty = 1.0 - breakdown.not_reported_count as f64 / extracted as f64;

    // Required fields: explicit-policy keys left empty halve completeness.
    let required_missing: Vec<&str> = schema
        .fields
        .iter()
        .filter(|spec| spec.policy.is_recall_critical())
        .filter(|spec| {
            extraction
                .data
                .get(&spec.key)
                .is_none_or(serde_json::Value::is_null)
        })
        .map(|spec| spec.key.as_str())
        .collect();
    if !required_missing.is_empty() {
        breakdown
            .concerns
            .push(format!("missing required fields: {}", required_missing.join(", ")));
        breakdown.completeness *= 0.5;
    }

    let self_confidence = if extraction.extraction_metadata.field_confidence.is_empty() {
        1.0
    } else {
        let sum: f64 = extraction
            .extraction_metadata
            .field_confidence
            .values()
            .sum();
        sum / extraction.extraction_metadata.field_confidence.len() as f64
    };
    if self_confidence < 0.7 {
        breakdown
            .concerns
            .push(format!("low mean field confidence: {self_confidence:.2}"));
    }

    if breakdown.fields_missing > breakdown.fields_extracted {
        breakdown.concerns.push(format!(
            "more fields missing ({}) than extracted ({})",
            breakdown.fields_missing, breakdown.fields_extracted
        ));
    }
    if breakdown.fields_extracted > 0
        && breakdown.not_reported_count * 2 > breakdown.fields_extracted
    {
        breakdown.concerns.push(format!(
            "high not-reported count: {}/{}",
            breakdown.not_reported_count, breakdown.fields_extracted
        ));
    }
    if breakdown.traceability < 0.5 {
        breakdown.concerns.push(format!(
            "low traceability: only {}/{} fields have quotes",
            breakdown.fields_with_quotes, breakdown.fields_extracted
        ));
    }

    let overall = breakdown.completeness * COMPLETENESS_WEIGHT
        + breakdown.traceability * TRACEABILITY_WEIGHT
        + breakdown.certainty * CERTAINTY_WEIGHT
        + self_confidence * SELF_CONFIDENCE_WEIGHT;

    let route = if overall >= AUTO_APPROVE_THRESHOLD && breakdown.concerns.is_empty() {
        RouteDecision::AutoApprove
    } else if overall >= HUMAN_REVIEW_THRESHOLD {
        RouteDecision::HumanReview
    } else {
        RouteDecision::ReExtract
    };

    (route, breakdown)
}
