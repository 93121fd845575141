//! Validation results and the per-document pipeline result.

use crate::core::evidence::{EvidenceItem, Tier};
use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a validation issue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or informational.
    Low,
    /// Worth a revision pass.
    #[default]
    Medium,
    /// Demotes the overall verdict.
    High,
}

/// A single validation or audit issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Field the issue concerns.
    pub field: String,
    /// Issue category, e.g. "missing_quote", "out_of_range".
    pub issue_type: String,
    /// Severity.
    #[serde(default)]
    pub severity: Severity,
    /// Human-readable detail.
    pub detail: String,
    /// Suggested correction, if the checker offered one.
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl Issue {
    /// Creates an issue.
    #[must_use]
    pub fn new(field: &str, issue_type: &str, severity: Severity, detail: &str) -> Self {
        Self {
            field: field.to_string(),
            issue_type: issue_type.to_string(),
            severity,
            detail: detail.to_string(),
            suggested_fix: None,
        }
    }
}

/// Outcome of one validation pass over an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckerResult {
    /// How well values match the source, in [0, 1].
    pub accuracy_score: f64,
    /// Internal consistency of the extraction, in [0, 1].
    pub consistency_score: f64,
    /// Weighted mean of the component scores, in [0, 1].
    pub overall_score: f64,
    /// Whether the overall score met the configured threshold.
    pub passed: bool,
    /// Issues found.
    pub issues: Vec<Issue>,
    /// Revision suggestions.
    pub suggestions: Vec<String>,
}

impl CheckerResult {
    /// Builds a result from component scores using the configured weights.
    ///
    /// Scores and the weighted mean are clamped to [0, 1]; `passed` is set
    /// against the supplied threshold at emission time.
    #[must_use]
    pub fn weighted(
        accuracy: f64,
        consistency: f64,
        accuracy_weight: f64,
        consistency_weight: f64,
        score_threshold: f64,
    ) -> Self {
        let accuracy = accuracy.clamp(0.0, 1.0);
        let consistency = consistency.clamp(0.0, 1.0);
        let weight_sum = accuracy_weight + consistency_weight;
        let overall = if weight_sum > 0.0 {
            ((accuracy * accuracy_weight + consistency * consistency_weight) / weight_sum)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            accuracy_score: accuracy,
            consistency_score: consistency,
            overall_score: overall,
            passed: overall >= score_threshold,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Builds the failure result used when the validator itself raised.
    #[must_use]
    pub fn validator_error(detail: &str) -> Self {
        Self {
            accuracy_score: 0.0,
            consistency_score: 0.0,
            overall_score: 0.0,
            passed: false,
            issues: vec![Issue::new("", "validator_error", Severity::High, detail)],
            suggestions: Vec::new(),
        }
    }

    /// Applies an additive penalty, re-clamping and re-deriving `passed`.
    pub fn apply_penalty(&mut self, penalty: f64, score_threshold: f64) {
        self.overall_score = (self.overall_score - penalty).clamp(0.0, 1.0);
        self.passed = self.overall_score >= score_threshold;
    }

    /// Counts issues at or above a severity.
    #[must_use]
    pub fn issues_at_least(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity >= severity).count()
    }

    /// Whether this result records a validator failure rather than a
    /// checked extraction; the revision loop terminates on these.
    #[must_use]
    pub fn is_validator_error(&self) -> bool {
        self.issues.iter().any(|i| i.issue_type == "validator_error")
    }
}

/// Compact audit trail entry for one validation iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationAudit {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Accuracy score for the iteration.
    pub accuracy_score: f64,
    /// Consistency score for the iteration.
    pub consistency_score: f64,
    /// Overall score after audit penalties.
    pub overall_score: f64,
    /// Number of issues raised.
    pub issue_count: usize,
    /// Number of suggestions raised.
    pub suggestion_count: usize,
    /// Fields failed by the adversarial audit at high severity.
    pub audit_failures: Vec<String>,
}

/// Post-extraction routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    /// High confidence; proceed automatically.
    AutoApprove,
    /// Medium confidence; flag for a manual check.
    HumanReview,
    /// Low confidence; the extraction should be redone.
    ReExtract,
}

/// Component scores behind a routing decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    /// Share of schema fields with non-null values.
    pub completeness: f64,
    /// Share of extracted fields backed by a substantial quote.
    pub traceability: f64,
    /// 1 minus the share of extracted fields that read "not reported".
    pub certainty: f64,
    /// Fields with non-null values.
    pub fields_extracted: usize,
    /// Fields left null.
    pub fields_missing: usize,
    /// Fields with substantial quotes.
    pub fields_with_quotes: usize,
    /// Extracted fields whose value reads as "not reported".
    pub not_reported_count: usize,
    /// Human-readable concerns.
    pub concerns: Vec<String>,
}

/// Content filter statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// Chunks before filtering.
    pub original_chunks: usize,
    /// Chunks surviving the filter.
    pub filtered_chunks: usize,
    /// Chunks removed.
    pub removed_chunks: usize,
    /// Estimated tokens saved by removal.
    pub estimated_tokens_saved: usize,
}

/// Relevance classification statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceStats {
    /// Chunks classified relevant.
    pub relevant_chunks_count: usize,
    /// Mean classifier confidence across chunks.
    pub avg_confidence: f64,
}

/// Token usage accumulated from transport-reported counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens generated.
    pub completion_tokens: u64,
    /// Number of LLM calls that reported usage.
    pub calls: u64,
}

impl TokenUsage {
    /// Adds another usage record into this one.
    pub const fn absorb(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.calls += other.calls;
    }

    /// Total tokens in both directions.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A recorded per-document failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Coarse failure kind.
    pub kind: FailureKind,
    /// Failure message.
    pub message: String,
}

/// The complete result of extracting one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Source filename.
    pub filename: String,
    /// Content fingerprint of the document text.
    pub fingerprint: String,
    /// Field key to extracted value; keys are exactly the schema's keys.
    pub data: BTreeMap<String, serde_json::Value>,
    /// Evidence quotes supporting the values.
    pub evidence: Vec<EvidenceItem>,
    /// Final validation outcome.
    pub checker: CheckerResult,
    /// Validation iterations performed.
    pub iteration_count: u32,
    /// Per-iteration audit summaries.
    pub iteration_history: Vec<IterationAudit>,
    /// Chunks classified relevant.
    pub relevant_chunks_count: usize,
    /// Content filter statistics.
    pub filter_stats: FilterStats,
    /// Relevance classification statistics.
    pub relevance_stats: RelevanceStats,
    /// Tier that produced each accepted field.
    pub tier_used: BTreeMap<String, Tier>,
    /// Combined confidence each accepted field was accepted with.
    pub field_confidence: BTreeMap<String, f64>,
    /// Routing decision from the confidence assessment.
    pub route: RouteDecision,
    /// Component scores behind the route.
    pub confidence_breakdown: ConfidenceBreakdown,
    /// Token usage across all LLM calls for this document.
    pub usage: TokenUsage,
    /// Wall-clock processing time in milliseconds.
    pub elapsed_ms: u64,
    /// Unix timestamp of completion, in seconds.
    pub timestamp: i64,
}

impl PipelineResult {
    /// Whether the extraction passed validation.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.checker.passed
    }

    /// Returns the current Unix timestamp in seconds.
    #[allow(clippy::cast_possible_wrap)]
    #[must_use]
    pub fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_overall_score() {
        let result = CheckerResult::weighted(1.0, 0.5, 0.6, 0.4, 0.8);
        assert!((result.overall_score - 0.8).abs() < 1e-9);
        assert!(result.passed);
    }

    #[test]
    fn test_weighted_clamps_inputs() {
        let result = CheckerResult::weighted(1.7, -0.3, 0.6, 0.4, 0.8);
        assert!((result.accuracy_score - 1.0).abs() < f64::EPSILON);
        assert!(result.consistency_score.abs() < f64::EPSILON);
        assert!(result.overall_score <= 1.0);
    }

    #[test]
    fn test_weighted_zero_weights() {
        let result = CheckerResult::weighted(1.0, 1.0, 0.0, 0.0, 0.8);
        assert!(result.overall_score.abs() < f64::EPSILON);
        assert!(!result.passed);
    }

    #[test]
    fn test_validator_error_shape() {
        let result = CheckerResult::validator_error("model timed out");
        assert!(result.overall_score.abs() < f64::EPSILON);
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].issue_type, "validator_error");
        assert_eq!(result.issues[0].severity, Severity::High);
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_apply_penalty_clamps_and_rederives() {
        let mut result = CheckerResult::weighted(0.9, 0.9, 0.5, 0.5, 0.8);
        assert!(result.passed);
        result.apply_penalty(0.15, 0.8);
        assert!((result.overall_score - 0.75).abs() < 1e-9);
        assert!(!result.passed);
        // Penalties never push below zero.
        result.apply_penalty(5.0, 0.8);
        assert!(result.overall_score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_issues_at_least() {
        let mut result = CheckerResult::default();
        result.issues.push(Issue::new("a", "t", Severity::Low, ""));
        result.issues.push(Issue::new("b", "t", Severity::High, ""));
        assert_eq!(result.issues_at_least(Severity::Medium), 1);
        assert_eq!(result.issues_at_least(Severity::Low), 2);
    }

    #[test]
    fn test_token_usage_absorb() {
        let mut usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            calls: 1,
        };
        usage.absorb(TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            calls: 1,
        });
        assert_eq!(usage.total(), 180);
        assert_eq!(usage.calls, 2);
    }

    #[test]
    fn test_route_decision_serde() {
        let json = serde_json::to_string(&RouteDecision::AutoApprove).unwrap();
        assert_eq!(json, "\"auto_approve\"");
    }
}
