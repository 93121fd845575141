//! Tiered LLM extraction cascade.
//!
//! Per-field state machine: regex pre-fills arrive as confirmed values,
//! every remaining extractable field walks the LLM tiers in order, and a
//! field is accepted at the first tier whose combined confidence meets the
//! field's threshold. Fields no tier can satisfy come back null, listed as
//! exhausted so the controller can queue them for manual review.
//!
//! The cascade always returns a value slot for every schema key, and a
//! carried pre-filled value is never overwritten with null.

use crate::config::{TierConfig, TransportConfig};
use crate::core::{EvidenceItem, Extraction, Schema, Tier};
use crate::error::TransportError;
use crate::extract::models::ExtractorResponse;
use crate::extract::prompt::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};
use crate::extract::tier::{LLM_TIER_SEQUENCE, combine_confidence, model_for_tier};
use crate::llm::{ChatMessage, ChatRequest, LlmClient, UsageTracker, chat_with_retry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A value carried into the cascade as already confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFilled {
    /// The confirmed value.
    pub value: serde_json::Value,
    /// Tier that produced it.
    pub tier: Tier,
    /// Confidence it was accepted with.
    pub confidence: f64,
}

/// Cascade output: the extraction plus fields no tier could satisfy.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    /// The extraction, covering every schema key.
    pub extraction: Extraction,
    /// Fields that reached the terminal tier without acceptance.
    pub exhausted: Vec<String>,
}

/// Greedy per-field escalation across local and cloud models.
pub struct TieredExtractor {
    local: Arc<dyn LlmClient>,
    cloud: Arc<dyn LlmClient>,
    tiers: TierConfig,
    transport: TransportConfig,
    usage: Arc<UsageTracker>,
}

impl TieredExtractor {
    /// Creates a cascade over a local and a cloud transport.
    #[must_use]
    pub fn new(
        local: Arc<dyn LlmClient>,
        cloud: Arc<dyn LlmClient>,
        tiers: TierConfig,
        transport: TransportConfig,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            local,
            cloud,
            tiers,
            transport,
            usage,
        }
    }

    fn client_for(&self, tier: Tier) -> &Arc<dyn LlmClient> {
        if tier.is_cloud() { &self.cloud } else { &self.local }
    }

    /// Runs the cascade over the context.
    ///
    /// Transport failures at one tier escalate to the next; a failure at
    /// the terminal tier leaves the remaining fields exhausted rather than
    /// failing the document.
    ///
    /// # Errors
    ///
    /// Currently infallible at the cascade level (failures degrade to
    /// exhausted fields); the signature leaves room for fatal transport
    /// policies.
    pub async fn extract(
        &self,
        context: &str,
        schema: &Schema,
        theme: &str,
        pre_filled: &BTreeMap<String, PreFilled>,
        revision_prompts: &[String],
    ) -> Result<CascadeOutcome, TransportError> {
        let mut extraction = Extraction::default();

        // Every schema key gets a slot up front; misses stay null.
        for key in schema.keys() {
            extraction
                .data
                .insert(key.to_string(), serde_json::Value::Null);
        }
        for (key, carried) in pre_filled {
            extraction.data.insert(key.clone(), carried.value.clone());
            extraction
                .extraction_metadata
                .tier_used
                .insert(key.clone(), carried.tier);
            extraction
                .extraction_metadata
                .field_confidence
                .insert(key.clone(), carried.confidence);
        }

        let mut todo: Vec<String> = schema
            .fields
            .iter()
            .filter(|spec| spec.policy.is_llm_extractable())
            .filter(|spec| !pre_filled.contains_key(&spec.key))
            .map(|spec| spec.key.clone())
            .collect();

        let schema_keys: Vec<&str> = schema.keys().collect();

        for tier in LLM_TIER_SEQUENCE {
            if todo.is_empty() {
                break;
            }

            let fields: Vec<_> = todo
                .iter()
                .filter_map(|key| schema.field(key))
                .collect();
            let confirmed: BTreeMap<String, serde_json::Value> = extraction
                .data
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let prompt = build_extraction_prompt(
                context,
                schema,
                &fields,
                theme,
                &confirmed,
                revision_prompts,
            );
            let request = ChatRequest::json(
                model_for_tier(tier, &self.tiers),
                vec![
                    ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
                    ChatMessage::user(prompt),
                ],
                Duration::from_secs(self.transport.deadline_secs),
            );

            let outcome = match chat_with_retry(
                &**self.client_for(tier),
                request,
                self.transport.max_retries,
                self.transport.retry_backoff_ms,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(tier = %tier, error = %err, "tier failed, escalating");
                    extraction
                        .extraction_metadata
                        .notes
                        .push(format!("tier {tier} failed: {err}"));
                    continue;
                }
            };
            self.usage.record(outcome.usage);
            extraction.extraction_metadata.model_calls += 1;

            let response = match ExtractorResponse::parse(outcome.value, &schema_keys) {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(tier = %tier, error = %err, "unparseable tier output, escalating");
                    extraction
                        .extraction_metadata
                        .notes
                        .push(format!("tier {tier} output unparseable: {err}"));
                    continue;
                }
            };

            todo.retain(|key| {
                let Some(spec) = schema.field(key) else {
                    return false;
                };
                let value = response
                    .data
                    .get(key)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                if value.is_null() {
                    return true; // miss at this tier
                }
                let confidence = combine_confidence(
                    response.confidence_for(key),
                    &value,
                    response.quote_for(key),
                );
                let threshold = self.tiers.threshold_for(spec.tier);
                if confidence < threshold {
                    tracing::debug!(
                        field = key.as_str(),
                        tier = %tier,
                        confidence,
                        threshold,
                        "below threshold, escalating"
                    );
                    return true;
                }

                extraction.data.insert(key.clone(), value.clone());
                extraction
                    .extraction_metadata
                    .tier_used
                    .insert(key.clone(), tier);
                extraction
                    .extraction_metadata
                    .field_confidence
                    .insert(key.clone(), confidence);
                if let Some(item) = response.evidence.iter().find(|e| e.field_name == *key) {
                    extraction.evidence.push(item.clone());
                } else if spec.requires_evidence_quote {
                    extraction
                        .evidence
                        .push(EvidenceItem::new(key, value, "", confidence));
                }
                false
            });
        }

        let exhausted = todo;
        for key in &exhausted {
            extraction
                .extraction_metadata
                .notes
                .push(format!("cascade exhausted for {key}"));
        }

        Ok(CascadeOutcome {
            extraction,
            exhausted,
        })
    }
}
