//! Structured validation of extractions.
//!
//! The checker scores (data, evidence) against a bounded window of the
//! source chunks, merges deterministic rule issues with the model's
//! findings, and formats the revision prompt consumed by the next
//! iteration. A checker failure never crashes the document: it yields a
//! zero-score result flagged as a validator error.

use crate::config::PipelineConfig;
use crate::core::{CheckerResult, DocumentChunk, EvidenceItem, Schema};
use crate::llm::{ChatMessage, ChatRequest, LlmClient, UsageTracker, chat_with_retry};
use crate::validate::models::CheckerResponse;
use crate::validate::rules::run_rules;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Characters of source text shown to the checker.
const CHECKER_WINDOW_CHARS: usize = 8_000;

/// System prompt for the structured checker.
const CHECKER_SYSTEM_PROMPT: &str = r#"You are a validation agent for structured extractions from scientific papers. You receive source text, extracted field values, and evidence quotes.

Score the extraction on two axes:
- accuracy: do the values match what the source text actually says?
- consistency: are the values internally consistent with each other and with their evidence quotes?

Return a JSON object:

{
  "accuracy_score": 0.9,
  "consistency_score": 0.85,
  "issues": [
    {"field": "<field>", "issue_type": "<category>", "severity": "low" | "medium" | "high",
     "detail": "<what is wrong>", "suggested_fix": "<how to fix it>"}
  ],
  "suggestions": ["<concrete revision instruction>"]
}

Rules:
- Scores are between 0 and 1.
- Flag values that contradict the text, quotes that do not appear in the text, and fields whose evidence does not support the value.
- Suggestions must be actionable instructions for a revision pass.
- Output JSON only."#;

/// Validates extractions and formats revision feedback.
pub struct StructuredChecker {
    client: Arc<dyn LlmClient>,
    model: String,
    deadline: Duration,
    max_retries: u32,
    backoff_ms: u64,
    accuracy_weight: f64,
    consistency_weight: f64,
    usage: Arc<UsageTracker>,
}

impl StructuredChecker {
    /// Creates a checker from configuration.
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>, config: &PipelineConfig, usage: Arc<UsageTracker>) -> Self {
        Self {
            client,
            model: config.tiers.checker_model.clone(),
            deadline: Duration::from_secs(config.transport.deadline_secs),
            max_retries: config.transport.max_retries,
            backoff_ms: config.transport.retry_backoff_ms,
            accuracy_weight: config.accuracy_weight,
            consistency_weight: config.consistency_weight,
            usage,
        }
    }

    /// Scores an extraction against the source.
    ///
    /// Deterministic rule issues merge with the model's findings. On any
    /// transport or parse failure the result is
    /// [`CheckerResult::validator_error`]: scores zero, one high-severity
    /// issue, no suggestions.
    pub async fn check(
        &self,
        chunks: &[DocumentChunk],
        data: &BTreeMap<String, serde_json::Value>,
        evidence: &[EvidenceItem],
        schema: &Schema,
        score_threshold: f64,
    ) -> CheckerResult {
        let rule_issues = run_rules(data, schema);

        let prompt = build_checker_prompt(chunks, data, evidence);
        let request = ChatRequest::json(
            &self.model,
            vec![
                ChatMessage::system(CHECKER_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            self.deadline,
        );

        let outcome = match chat_with_retry(
            &*self.client,
            request,
            self.max_retries,
            self.backoff_ms,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "checker call failed");
                return CheckerResult::validator_error(&err.to_string());
            }
        };
        self.usage.record(outcome.usage);

        let response: CheckerResponse = match serde_json::from_value(outcome.value) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "checker output unparseable");
                return CheckerResult::validator_error(&err.to_string());
            }
        };

        let mut result = CheckerResult::weighted(
            response.accuracy_score,
            response.consistency_score,
            self.accuracy_weight,
            self.consistency_weight,
            score_threshold,
        );
        result.issues = rule_issues;
        result.issues.extend(response.issues);
        result.suggestions = response.suggestions;
        result
    }
}

/// Formats the checker's user message.
///
/// Private keys (leading underscore) and paired `*_quote` keys are
/// excluded from the data block; quotes travel in the evidence block.
#[must_use]
pub fn build_checker_prompt(
    chunks: &[DocumentChunk],
    data: &BTreeMap<String, serde_json::Value>,
    evidence: &[EvidenceItem],
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "## Source text");
    let mut used = 0;
    for chunk in chunks {
        if used + chunk.text.len() > CHECKER_WINDOW_CHARS {
            break;
        }
        let _ = writeln!(prompt, "{}", chunk.text);
        used += chunk.text.len();
    }

    let _ = writeln!(prompt, "\n## Extracted data");
    for (key, value) in data {
        if key.starts_with('_') || key.ends_with("_quote") {
            continue;
        }
        let _ = writeln!(prompt, "- {key} = {value}");
    }

    let _ = writeln!(prompt, "\n## Evidence");
    for item in evidence {
        let _ = writeln!(
            prompt,
            "- {}: \"{}\" (confidence {:.2})",
            item.field_name, item.exact_quote, item.confidence
        );
    }

    prompt
}

/// Formats validator feedback into a revision prompt.
///
/// Returns `None` when there is nothing actionable, which terminates the
/// revision loop.
#[must_use]
pub fn format_revision_prompt(result: &CheckerResult) -> Option<String> {
    if result.suggestions.is_empty() && result.issues.iter().all(|i| i.suggested_fix.is_none()) {
        return None;
    }
    let mut prompt = String::from("The previous extraction had problems. Apply these corrections:\n");
    for suggestion in &result.suggestions {
        let _ = writeln!(prompt, "- {suggestion}");
    }
    for issue in &result.issues {
        if let Some(fix) = &issue.suggested_fix {
            let _ = writeln!(prompt, "- {}: {fix}", issue.field);
        }
    }
    Some(prompt)
}
