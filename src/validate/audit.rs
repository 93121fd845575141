//! Per-field adversarial audit.
//!
//! After validation, every non-null field faces a skeptical second look:
//! is the value actually supported by the text, or did the extractor
//! pattern-match its way to something plausible? High-severity failures
//! demote the overall score by the configured penalty.

use crate::config::PipelineConfig;
use crate::core::evidence::coerce_to_string;
use crate::core::{EvidenceItem, Severity};
use crate::llm::{ChatMessage, ChatRequest, LlmClient, UsageTracker, chat_with_retry};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Characters of source text shown to the auditor.
const AUDIT_WINDOW_CHARS: usize = 6_000;

/// System prompt for the field auditor.
const AUDITOR_SYSTEM_PROMPT: &str = r#"You are an adversarial auditor for structured extractions. For each extracted field, actively try to find reasons the value is wrong: misread numbers, values taken from the wrong cohort, quotes that do not support the claim, inferred values presented as explicit.

Return a JSON object:

{
  "audits": [
    {"field": "<field>", "is_correct": true, "confidence": 0.9,
     "explanation": "<why>", "severity": "low" | "medium" | "high"}
  ]
}

Rules:
- One entry per field you were given.
- "severity" matters only when is_correct is false: "high" means the value is clearly contradicted by the text.
- Be skeptical, but do not invent problems: a well-supported value is correct.
- Output JSON only."#;

/// Verdict of one field audit.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAudit {
    /// Audited field.
    pub field: String,
    /// Whether the value survived the adversarial check.
    pub is_correct: bool,
    /// Auditor confidence in the verdict.
    pub confidence: f64,
    /// Reasoning.
    pub explanation: String,
    /// Severity of the failure, when incorrect.
    pub severity: Severity,
}

/// Runs adversarial checks over extracted fields.
pub struct FieldAuditor {
    client: Arc<dyn LlmClient>,
    model: String,
    deadline: Duration,
    max_retries: u32,
    backoff_ms: u64,
    usage: Arc<UsageTracker>,
}

impl FieldAuditor {
    /// Creates an auditor from configuration.
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>, config: &PipelineConfig, usage: Arc<UsageTracker>) -> Self {
        Self {
            client,
            model: config.tiers.checker_model.clone(),
            deadline: Duration::from_secs(config.transport.deadline_secs),
            max_retries: config.transport.max_retries,
            backoff_ms: config.transport.retry_backoff_ms,
            usage,
        }
    }

    /// Audits every non-null field in one batched call.
    ///
    /// An audit that cannot run (transport failure, unparseable output)
    /// returns no verdicts: the extraction is not penalized for auditor
    /// downtime, and the controller logs the skip.
    pub async fn audit(
        &self,
        context: &str,
        data: &BTreeMap<String, serde_json::Value>,
        evidence: &[EvidenceItem],
    ) -> Vec<FieldAudit> {
        let audited: Vec<(&String, &serde_json::Value)> =
            data.iter().filter(|(_, v)| !v.is_null()).collect();
        if audited.is_empty() {
            return Vec::new();
        }

        let prompt = build_audit_prompt(context, &audited, evidence);
        let request = ChatRequest::json(
            &self.model,
            vec![
                ChatMessage::system(AUDITOR_SYSTEM_PROMPT),
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
                tracing::warn!(error = %err, "field audit skipped");
                return Vec::new();
            }
        };
        self.usage.record(outcome.usage);

        parse_audits(&outcome.value)
    }
}

/// Fields failed at high severity; these demote the overall score.
#[must_use]
pub fn high_severity_failures(audits: &[FieldAudit]) -> Vec<String> {
    audits
        .iter()
        .filter(|a| !a.is_correct && a.severity == Severity::High)
        .map(|a| a.field.clone())
        .collect()
}

fn build_audit_prompt(
    context: &str,
    audited: &[(&String, &serde_json::Value)],
    evidence: &[EvidenceItem],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Source text");
    let window: String = context.chars().take(AUDIT_WINDOW_CHARS).collect();
    let _ = writeln!(prompt, "{window}");

    let _ = writeln!(prompt, "\n## Fields to audit");
    for (key, value) in audited {
        let quote = evidence
            .iter()
            .find(|e| e.field_name == **key)
            .map(|e| e.exact_quote.as_str())
            .unwrap_or("");
        let _ = writeln!(prompt, "- {key} = {value} (evidence: \"{quote}\")");
    }
    prompt
}

fn parse_audits(value: &serde_json::Value) -> Vec<FieldAudit> {
    let items = value
        .get("audits")
        .and_then(serde_json::Value::as_array)
        .or_else(|| value.as_array());
    let Some(items) = items else {
        tracing::warn!("audit output had no audits list");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let map = item.as_object()?;
            let field = map.get("field").map(coerce_to_string)?;
            let is_correct = map
                .get("is_correct")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);
            let confidence = map
                .get("confidence")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            let explanation = map
                .get("explanation")
                .map(coerce_to_string)
                .unwrap_or_default();
            let severity = match map
                .get("severity")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("medium")
                .to_lowercase()
                .as_str()
            {
                "low" => Severity::Low,
                "high" | "critical" => Severity::High,
                _ => Severity::Medium,
            };
            Some(FieldAudit {
                field,
                is_correct,
                confidence,
                explanation,
                severity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::llm::MockClient;
    use serde_json::json;

    fn auditor(mock: Arc<MockClient>) -> FieldAuditor {
        let mut config = PipelineConfig::default();
        config.transport.max_retries = 1;
        config.transport.retry_backoff_ms = 1;
        FieldAuditor::new(mock, &config, Arc::new(UsageTracker::new()))
    }

    fn data(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_audit_parses_verdicts() {
        let mock = Arc::new(MockClient::new());
        mock.push_ok(json!({
            "audits": [
                {"field": "age", "is_correct": true, "confidence": 0.95,
                 "explanation": "matches text", "severity": "low"},
                {"field": "sample_size", "is_correct": false, "confidence": 0.8,
                 "explanation": "wrong cohort", "severity": "high"}
            ]
        }));
        let audits = auditor(mock)
            .audit("ctx", &data(&[("age", json!(52)), ("sample_size", json!(10))]), &[])
            .await;
        assert_eq!(audits.len(), 2);
        assert!(audits[0].is_correct);
        assert!(!audits[1].is_correct);
        assert_eq!(high_severity_failures(&audits), vec!["sample_size".to_string()]);
    }

    #[tokio::test]
    async fn test_audit_bare_list_accepted() {
        let mock = Arc::new(MockClient::new());
        mock.push_ok(json!([
            {"field": "age", "is_correct": false, "severity": "high", "explanation": ""}
        ]));
        let audits = auditor(mock).audit("ctx", &data(&[("age", json!(52))]), &[]).await;
        assert_eq!(audits.len(), 1);
        assert_eq!(high_severity_failures(&audits), vec!["age".to_string()]);
    }

    #[tokio::test]
    async fn test_audit_null_fields_skipped() {
        let mock = Arc::new(MockClient::new());
        // No scripted response needed: nothing to audit, no call made.
        let audits = auditor(mock.clone())
            .audit("ctx", &data(&[("age", json!(null))]), &[])
            .await;
        assert!(audits.is_empty());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_audit_transport_failure_returns_empty() {
        let mock = Arc::new(MockClient::new());
        mock.push_err(TransportError::Timeout { seconds: 1 });
        let audits = auditor(mock).audit("ctx", &data(&[("age", json!(52))]), &[]).await;
        assert!(audits.is_empty());
    }

    #[test]
    fn test_high_severity_filter_ignores_correct_and_medium() {
        let audits = vec![
            FieldAudit {
                field: "a".to_string(),
                is_correct: true,
                confidence: 0.9,
                explanation: String::new(),
                severity: Severity::High,
            },
            FieldAudit {
                field: "b".to_string(),
                is_correct: false,
                confidence: 0.9,
                explanation: String::new(),
                severity: Severity::Medium,
            },
        ];
        assert!(high_severity_failures(&audits).is_empty());
    }
}
