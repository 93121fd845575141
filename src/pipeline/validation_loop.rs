//! Bounded extract-check-audit-revise loop.
//!
//! Implemented once, async, and shared by both entry points. Each
//! iteration runs the cascade, grounds evidence, checks, audits, and
//! either terminates or builds the next revision prompt: validator
//! suggestions plus a recall boost naming still-null explicit fields.
//! Accepted fields carry forward as pre-fills so iterations converge
//! instead of oscillating.

use crate::config::PipelineConfig;
use crate::core::{
    CheckerResult, DocumentChunk, Extraction, IterationAudit, Issue, Schema, Severity,
};
use crate::error::Result;
use crate::extract::TieredExtractor;
use crate::extract::cascade::PreFilled;
use crate::extract::prompt::build_recall_boost;
use crate::pipeline::stages::{carried_pre_filled, missing_recall_fields};
use crate::validate::{
    FieldAuditor, StructuredChecker, format_revision_prompt, ground_evidence,
    high_severity_failures,
};
use std::collections::BTreeMap;

/// Outcome of the validation loop.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Final extraction.
    pub extraction: Extraction,
    /// Final checker result, audit penalties applied.
    pub checker: CheckerResult,
    /// Iterations performed (at least 1).
    pub iterations: u32,
    /// Per-iteration audit trail.
    pub history: Vec<IterationAudit>,
    /// Fields the cascade exhausted in the final iteration.
    pub exhausted: Vec<String>,
}

/// Runs the bounded revision loop.
///
/// Termination: score at threshold with no recall-critical fields
/// missing, iterations exhausted, nothing actionable to revise, or a
/// validator error.
///
/// # Errors
///
/// Propagates fatal transport errors from the cascade; checker and
/// auditor failures degrade instead of propagating.
#[allow(clippy::too_many_arguments)]
pub async fn run_validation_loop(
    cascade: &TieredExtractor,
    checker: &StructuredChecker,
    auditor: &FieldAuditor,
    config: &PipelineConfig,
    context: &str,
    chunks: &[DocumentChunk],
    schema: &Schema,
    theme: &str,
    initial_pre_filled: BTreeMap<String, PreFilled>,
) -> Result<LoopOutcome> {
    let mut pre_filled = initial_pre_filled;
    let mut revision_prompts: Vec<String> = Vec::new();
    let mut history = Vec::new();

    let mut iteration = 1_u32;
    loop {
        tracing::info!(iteration, "validation iteration");

        let cascade_outcome = cascade
            .extract(context, schema, theme, &pre_filled, &revision_prompts)
            .await?;
        let mut extraction = cascade_outcome.extraction;
        ground_evidence(&mut extraction.evidence, context);

        let mut checker_result = checker
            .check(
                chunks,
                &extraction.data,
                &extraction.evidence,
                schema,
                config.score_threshold,
            )
            .await;

        let audits = auditor
            .audit(context, &extraction.data, &extraction.evidence)
            .await;
        let audit_failures = high_severity_failures(&audits);
        for field in &audit_failures {
            checker_result.apply_penalty(
                config.audit_high_severity_penalty,
                config.score_threshold,
            );
            let explanation = audits
                .iter()
                .find(|a| &a.field == field)
                .map(|a| a.explanation.clone())
                .unwrap_or_default();
            checker_result.issues.push(Issue::new(
                field,
                "audit_failure",
                Severity::High,
                &explanation,
            ));
        }

        history.push(IterationAudit {
            iteration,
            accuracy_score: checker_result.accuracy_score,
            consistency_score: checker_result.consistency_score,
            overall_score: checker_result.overall_score,
            issue_count: checker_result.issues.len(),
            suggestion_count: checker_result.suggestions.len(),
            audit_failures: audit_failures.clone(),
        });

        let missing = missing_recall_fields(&extraction.data, schema, config);

        // Validator errors end the loop: the iteration scored zero and a
        // revision prompt cannot be built from a failed check.
        if checker_result.is_validator_error() {
            tracing::warn!(iteration, "validator error; terminating revision loop");
            return Ok(LoopOutcome {
                extraction,
                checker: checker_result,
                iterations: iteration,
                history,
                exhausted: cascade_outcome.exhausted,
            });
        }

        let passed_and_complete = checker_result.overall_score >= config.score_threshold
            && missing.is_empty();
        if passed_and_complete || iteration >= config.max_iterations {
            return Ok(LoopOutcome {
                extraction,
                checker: checker_result,
                iterations: iteration,
                history,
                exhausted: cascade_outcome.exhausted,
            });
        }

        // Assemble the next revision: validator feedback plus a recall
        // boost for still-null critical fields.
        revision_prompts.clear();
        if let Some(prompt) = format_revision_prompt(&checker_result) {
            revision_prompts.push(prompt);
        }
        if !missing.is_empty() {
            tracing::info!(missing = ?missing, "recall boost for missing critical fields");
            revision_prompts.push(build_recall_boost(&missing));
        }
        if revision_prompts.is_empty() {
            // Nothing actionable; more iterations would repeat the same call.
            return Ok(LoopOutcome {
                extraction,
                checker: checker_result,
                iterations: iteration,
                history,
                exhausted: cascade_outcome.exhausted,
            });
        }

        pre_filled = carried_pre_filled(&extraction);
        iteration += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TierConfig, TransportConfig};
    use crate::core::{ExtractionPolicy, FieldSpec};
    use crate::llm::{MockClient, UsageTracker};
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        cascade_local: Arc<MockClient>,
        checker_client: Arc<MockClient>,
        auditor_client: Arc<MockClient>,
        cascade: TieredExtractor,
        checker: StructuredChecker,
        auditor: FieldAuditor,
        config: PipelineConfig,
    }

    fn harness() -> Harness {
        let mut config = PipelineConfig::default();
        config.transport.max_retries = 1;
        config.transport.retry_backoff_ms = 1;

        let cascade_local = Arc::new(MockClient::new());
        let cascade_cloud = Arc::new(MockClient::new());
        let checker_client = Arc::new(MockClient::new());
        let auditor_client = Arc::new(MockClient::new());
        let usage = Arc::new(UsageTracker::new());

        let transport = TransportConfig {
            max_retries: 1,
            retry_backoff_ms: 1,
            ..TransportConfig::default()
        };
        let cascade = TieredExtractor::new(
            cascade_local.clone(),
            cascade_cloud,
            TierConfig::default(),
            transport,
            usage.clone(),
        );
        let checker = StructuredChecker::new(checker_client.clone(), &config, usage.clone());
        let auditor = FieldAuditor::new(auditor_client.clone(), &config, usage);

        Harness {
            cascade_local,
            checker_client,
            auditor_client,
            cascade,
            checker,
            auditor,
            config,
        }
    }

    fn schema() -> Schema {
        Schema::new(
            "trial",
            1,
            vec![
                FieldSpec::scalar("sample_size", "Number of patients").with_tier(3),
                FieldSpec::scalar("primary_outcome", "Main outcome measure")
                    .with_policy(ExtractionPolicy::MustBeExplicit)
                    .with_tier(3),
            ],
        )
        .unwrap()
    }

    fn chunks() -> Vec<DocumentChunk> {
        vec![DocumentChunk::new(0, "Survival was the primary outcome in 100 patients.".to_string())]
    }

    fn passing_check() -> serde_json::Value {
        json!({"accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []})
    }

    fn all_correct_audit() -> serde_json::Value {
        json!({"audits": []})
    }

    #[tokio::test]
    async fn test_single_iteration_when_complete_and_passing() {
        let h = harness();
        h.cascade_local.push_ok(json!({
            "data": {"sample_size": "100", "primary_outcome": "Survival"},
            "field_confidence": {"sample_size": 0.9, "primary_outcome": 0.9}
        }));
        h.checker_client.push_ok(passing_check());
        h.auditor_client.push_ok(all_correct_audit());

        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(outcome.checker.passed);
        assert_eq!(outcome.history.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_explicit_field_triggers_recall_iteration() {
        // Iteration 1 passes validation but omits the explicit field;
        // iteration 2 must receive a recall prompt naming it.
        let h = harness();
        h.cascade_local.push_ok(json!({
            "data": {"sample_size": "100", "primary_outcome": null},
            "field_confidence": {"sample_size": 0.9}
        }));
        // The standard local tier misses the field too.
        h.cascade_local.push_ok(json!({
            "data": {"primary_outcome": null},
            "field_confidence": {}
        }));
        // Iteration 2, after the recall boost.
        h.cascade_local.push_ok(json!({
            "data": {"primary_outcome": "Survival"},
            "field_confidence": {"primary_outcome": 0.9}
        }));
        h.checker_client.push_ok(json!({
            "accuracy_score": 0.82, "consistency_score": 0.82,
            "issues": [], "suggestions": []
        }));
        h.checker_client.push_ok(passing_check());
        h.auditor_client.push_ok(all_correct_audit());
        h.auditor_client.push_ok(all_correct_audit());

        // Cloud tiers also see the field in iteration 1 and return null.
        // (The cascade cloud mock is separate and unscripted; escalation
        // failures degrade to exhausted, which is fine for this test.)
        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.extraction.data["primary_outcome"], json!("Survival"));
        // The iteration-2 extraction call carried a recall prompt naming
        // the field, with the accepted field carried as a pre-fill.
        let requests = h.cascade_local.requests();
        let recall_prompt = &requests
            .iter()
            .find(|request| {
                request
                    .messages
                    .last()
                    .is_some_and(|m| m.content.contains("still missing"))
            })
            .unwrap()
            .messages[1]
            .content;
        assert!(recall_prompt.contains("primary_outcome"));
        assert!(recall_prompt.contains("sample_size = \"100\""));
    }

    #[tokio::test]
    async fn test_validator_error_terminates_loop() {
        let h = harness();
        h.cascade_local.push_ok(json!({
            "data": {"sample_size": "100", "primary_outcome": "Survival"},
            "field_confidence": {"sample_size": 0.9, "primary_outcome": 0.9}
        }));
        // Checker transport fails once; retries exhausted at 1.
        h.checker_client
            .push_err(crate::error::TransportError::Timeout { seconds: 1 });
        h.auditor_client.push_ok(all_correct_audit());

        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(outcome.checker.is_validator_error());
        assert!(outcome.checker.overall_score.abs() < f64::EPSILON);
        assert!(!outcome.checker.passed);
    }

    #[tokio::test]
    async fn test_audit_failure_demotes_score() {
        let h = harness();
        h.cascade_local.push_ok(json!({
            "data": {"sample_size": "100", "primary_outcome": "Survival"},
            "field_confidence": {"sample_size": 0.9, "primary_outcome": 0.9}
        }));
        h.checker_client.push_ok(json!({
            "accuracy_score": 0.85, "consistency_score": 0.85,
            "issues": [], "suggestions": []
        }));
        h.auditor_client.push_ok(json!({
            "audits": [
                {"field": "sample_size", "is_correct": false, "confidence": 0.9,
                 "explanation": "value from a different cohort", "severity": "high"}
            ]
        }));
        // The demoted score falls below threshold; there are no
        // suggestions and nothing missing, so the loop stops.

        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert!((outcome.checker.overall_score - 0.75).abs() < 1e-9);
        assert!(!outcome.checker.passed);
        assert!(outcome
            .checker
            .issues
            .iter()
            .any(|i| i.issue_type == "audit_failure" && i.field == "sample_size"));
        assert_eq!(outcome.history[0].audit_failures, vec!["sample_size".to_string()]);
    }

    #[tokio::test]
    async fn test_iterations_bounded() {
        let mut h = harness();
        h.config.max_iterations = 2;
        // Every iteration: low score with a suggestion, so it keeps revising.
        for _ in 0..2 {
            h.cascade_local.push_ok(json!({
                "data": {"sample_size": "100", "primary_outcome": "Survival"},
                "field_confidence": {"sample_size": 0.9, "primary_outcome": 0.9}
            }));
            h.checker_client.push_ok(json!({
                "accuracy_score": 0.4, "consistency_score": 0.4,
                "issues": [], "suggestions": ["look harder"]
            }));
            h.auditor_client.push_ok(all_correct_audit());
        }

        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.history.len(), 2);
        assert!(!outcome.checker.passed);
    }

    #[tokio::test]
    async fn test_no_suggestions_terminates_early() {
        let h = harness();
        h.cascade_local.push_ok(json!({
            "data": {"sample_size": "100", "primary_outcome": "Survival"},
            "field_confidence": {"sample_size": 0.9, "primary_outcome": 0.9}
        }));
        // Below threshold, but the checker offers nothing actionable.
        h.checker_client.push_ok(json!({
            "accuracy_score": 0.5, "consistency_score": 0.5,
            "issues": [], "suggestions": []
        }));
        h.auditor_client.push_ok(all_correct_audit());

        let outcome = run_validation_loop(
            &h.cascade,
            &h.checker,
            &h.auditor,
            &h.config,
            "ctx",
            &chunks(),
            &schema(),
            "theme",
            BTreeMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.checker.passed);
    }
}
