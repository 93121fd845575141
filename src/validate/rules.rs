//! Deterministic validation rules.
//!
//! Range checks from schema bounds and cross-field consistency checks run
//! before the LLM checker and merge into its issue list. These rules never
//! suspend and never fail.

use crate::core::{Issue, Schema, Severity};
use std::collections::BTreeMap;

/// Runs all deterministic rules over extracted data.
#[must_use]
pub fn run_rules(data: &BTreeMap<String, serde_json::Value>, schema: &Schema) -> Vec<Issue> {
    let mut issues = Vec::new();
    range_issues(data, schema, &mut issues);
    finding_issues(data, &mut issues);
    issues
}

/// Checks numeric fields against their declared bounds.
fn range_issues(
    data: &BTreeMap<String, serde_json::Value>,
    schema: &Schema,
    issues: &mut Vec<Issue>,
) {
    for spec in &schema.fields {
        let Some(bounds) = spec.bounds else { continue };
        let Some(value) = data.get(&spec.key) else {
            continue;
        };
        let Some(number) = as_number(value) else {
            if !value.is_null() {
                issues.push(Issue::new(
                    &spec.key,
                    "non_numeric",
                    Severity::Medium,
                    &format!("cannot range-check non-numeric value {value}"),
                ));
            }
            continue;
        };
        if !bounds.contains(number) {
            issues.push(Issue::new(
                &spec.key,
                "out_of_range",
                Severity::High,
                &format!(
                    "value {number} outside [{}, {}]",
                    bounds.min, bounds.max
                ),
            ));
        }
    }
}

/// Checks finding-shaped values for n > N inconsistencies.
///
/// Typed [`crate::core::FindingReport`] values can never violate this, but
/// raw model output flows through as JSON until the caller converts it.
fn finding_issues(data: &BTreeMap<String, serde_json::Value>, issues: &mut Vec<Issue>) {
    for (key, value) in data {
        let serde_json::Value::Object(map) = value else {
            continue;
        };
        let n = map.get("n").and_then(serde_json::Value::as_u64);
        let total = map.get("N").and_then(serde_json::Value::as_u64);
        if let (Some(n), Some(total)) = (n, total)
            && n > total
        {
            issues.push(Issue::new(
                key,
                "inconsistent_frequencies",
                Severity::High,
                &format!("numerator {n} exceeds denominator {total}"),
            ));
        }
    }
}

/// Interprets a JSON value as a number, accepting numeric strings and
/// range strings like "37-73" (checked by their endpoints' midpoint).
fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(number) = s.parse::<f64>() {
                return Some(number);
            }
            // "low-high" ranges: check the midpoint.
            let (low, high) = s.split_once('-')?;
            let low: f64 = low.trim().parse().ok()?;
            let high: f64 = high.trim().parse().ok()?;
            Some(f64::midpoint(low, high))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldSpec;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "demo",
            1,
            vec![
                FieldSpec::scalar("sample_size", "").with_bounds(1.0, 100_000.0),
                FieldSpec::scalar("mean_age", "").with_bounds(0.0, 120.0),
                FieldSpec::scalar("unbounded", ""),
            ],
        )
        .unwrap()
    }

    fn data(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_in_range_clean() {
        let issues = run_rules(&data(&[("sample_size", json!(50))]), &schema());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_out_of_range_flagged_high() {
        let issues = run_rules(&data(&[("mean_age", json!(412))]), &schema());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "out_of_range");
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].field, "mean_age");
    }

    #[test]
    fn test_numeric_string_checked() {
        let issues = run_rules(&data(&[("sample_size", json!("50"))]), &schema());
        assert!(issues.is_empty());

        let issues = run_rules(&data(&[("sample_size", json!("0"))]), &schema());
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_range_string_uses_midpoint() {
        let issues = run_rules(&data(&[("mean_age", json!("37-73"))]), &schema());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_non_numeric_bounded_field_flagged() {
        let issues = run_rules(&data(&[("mean_age", json!("elderly"))]), &schema());
        assert_eq!(issues[0].issue_type, "non_numeric");
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_null_values_skipped() {
        let issues = run_rules(&data(&[("mean_age", json!(null))]), &schema());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_unbounded_field_ignored() {
        let issues = run_rules(&data(&[("unbounded", json!("whatever"))]), &schema());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_finding_n_exceeds_total() {
        let issues = run_rules(
            &data(&[("finding", json!({"status": "present", "n": 12, "N": 10}))]),
            &schema(),
        );
        assert_eq!(issues[0].issue_type, "inconsistent_frequencies");
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_finding_consistent_clean() {
        let issues = run_rules(
            &data(&[("finding", json!({"status": "present", "n": 3, "N": 10}))]),
            &schema(),
        );
        assert!(issues.is_empty());
    }
}
