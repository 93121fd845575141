//! Checker LLM response shapes.
//!
//! Scores arrive as numbers, strings, or null; issues sometimes carry
//! non-string types; suggestions may be dict-shaped. Everything coerces
//! deterministically here: null scores become 0.0, scores clamp to [0, 1],
//! non-string fields stringify, and nothing is silently dropped.

use crate::core::{Issue, Severity};
use crate::core::evidence::coerce_to_string;
use serde::de::Deserializer;
use serde::Deserialize;

/// Parsed checker response after coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckerResponse {
    /// Accuracy score in [0, 1]; null coerces to 0.0.
    pub accuracy_score: f64,
    /// Consistency score in [0, 1]; null coerces to 0.0.
    pub consistency_score: f64,
    /// Issues found by the checker.
    pub issues: Vec<Issue>,
    /// Revision suggestions as plain strings.
    pub suggestions: Vec<String>,
}

impl<'de> Deserialize<'de> for CheckerResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            accuracy_score: serde_json::Value,
            #[serde(default)]
            consistency_score: serde_json::Value,
            #[serde(default)]
            issues: Vec<serde_json::Value>,
            #[serde(default)]
            suggestions: Vec<serde_json::Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            accuracy_score: coerce_score(&raw.accuracy_score),
            consistency_score: coerce_score(&raw.consistency_score),
            issues: raw.issues.iter().map(coerce_issue).collect(),
            suggestions: raw
                .suggestions
                .iter()
                .map(coerce_to_string)
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}

/// Coerces a score value: numbers clamp to [0, 1], numeric strings parse,
/// everything else (including null) becomes 0.0.
#[must_use]
pub fn coerce_score(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn coerce_issue(value: &serde_json::Value) -> Issue {
    match value {
        serde_json::Value::Object(map) => {
            let severity = map
                .get("severity")
                .and_then(serde_json::Value::as_str)
                .map_or(Severity::Medium, parse_severity);
            Issue {
                field: map.get("field").map(coerce_to_string).unwrap_or_default(),
                issue_type: map
                    .get("issue_type")
                    .map(coerce_to_string)
                    .unwrap_or_else(|| "unspecified".to_string()),
                severity,
                detail: map.get("detail").map(coerce_to_string).unwrap_or_default(),
                suggested_fix: map
                    .get("suggested_fix")
                    .filter(|v| !v.is_null())
                    .map(coerce_to_string),
            }
        }
        other => Issue::new("", "unspecified", Severity::Medium, &coerce_to_string(other)),
    }
}

fn parse_severity(raw: &str) -> Severity {
    match raw.trim().to_lowercase().as_str() {
        "low" => Severity::Low,
        "high" | "critical" => Severity::High,
        _ => Severity::Medium,
    }
}
