//! Staged extraction controller.
//!
//! Drives one document through fingerprint → cache check → filter →
//! classify → context build → tiered extraction → validation/audit →
//! bounded revision loop → routing, then writes the result back to the
//! cache. The cache, review queue, and transports are injected
//! capabilities; the controller owns no global state.

pub mod route;
pub mod stages;
pub mod validation_loop;

pub use route::assess_routing;
pub use stages::{apply_regex_prefill, build_context, carried_pre_filled, missing_recall_fields};
pub use validation_loop::{LoopOutcome, run_validation_loop};

use crate::cache::{CachedField, ResultCache};
use crate::classify::RelevanceClassifier;
use crate::config::PipelineConfig;
use crate::core::{
    Document, DocumentChunk, PipelineResult, RelevanceStats, RouteDecision, Schema, TokenUsage,
};
use crate::error::{Error, PipelineError, Result};
use crate::extract::{RegexExtractor, TieredExtractor};
use crate::filter::ContentFilter;
use crate::fingerprint::document_fingerprint;
use crate::llm::{LlmClient, UsageTracker};
use crate::review::ReviewQueue;
use crate::validate::{FieldAuditor, StructuredChecker};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The staged extraction pipeline.
///
/// One instance serves many documents concurrently; per-document work is
/// internally sequential, parallelism lives between documents.
pub struct ExtractionPipeline {
    config: PipelineConfig,
    filter: ContentFilter,
    classifier: RelevanceClassifier,
    regex: RegexExtractor,
    cascade: TieredExtractor,
    checker: StructuredChecker,
    auditor: FieldAuditor,
    cache: Arc<dyn ResultCache>,
    review: Arc<dyn ReviewQueue>,
    usage: Arc<UsageTracker>,
}

impl ExtractionPipeline {
    /// Assembles a pipeline from configuration and capabilities.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        local: Arc<dyn LlmClient>,
        cloud: Arc<dyn LlmClient>,
        cache: Arc<dyn ResultCache>,
        review: Arc<dyn ReviewQueue>,
    ) -> Self {
        let usage = Arc::new(UsageTracker::new());
        let filter = ContentFilter::new(config.filter.clone());
        let classifier = RelevanceClassifier::new(
            local.clone(),
            &config.tiers.classifier_model,
            Duration::from_secs(config.transport.deadline_secs),
            config.transport.max_retries,
            config.transport.retry_backoff_ms,
        );
        let cascade = TieredExtractor::new(
            local.clone(),
            cloud,
            config.tiers.clone(),
            config.transport.clone(),
            usage.clone(),
        );
        let checker = StructuredChecker::new(local.clone(), &config, usage.clone());
        let auditor = FieldAuditor::new(local, &config, usage.clone());

        Self {
            config,
            filter,
            classifier,
            regex: RegexExtractor::new(),
            cascade,
            checker,
            auditor,
            cache,
            review,
            usage,
        }
    }

    /// Accumulated token usage across all documents this pipeline served.
    #[must_use]
    pub fn total_usage(&self) -> TokenUsage {
        self.usage.snapshot()
    }

    /// Extracts one document against a schema.
    ///
    /// # Errors
    ///
    /// Returns `empty_context` when no relevant text survives filtering,
    /// and propagates storage errors. Transport and validator failures
    /// degrade inside the run instead of failing the document.
    pub async fn extract(
        &self,
        document: &Document,
        schema: &Schema,
        theme: &str,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let usage_before = self.usage.snapshot();

        // Identity is content: same text under a different filename hits.
        let fingerprint = document_fingerprint(&document.full_text);
        if let Some(cached) = self.cache.get_pipeline(&fingerprint, schema.version)? {
            tracing::info!(
                filename = document.filename.as_str(),
                fingerprint = fingerprint.as_str(),
                "pipeline cache hit"
            );
            return Ok(cached);
        }

        // Stage 1: drop boilerplate.
        let filtered = self.filter.filter_chunks(&document.chunks);

        // Stage 2: relevance. A classifier failure keeps every chunk.
        let field_names: Vec<&str> = schema.keys().collect();
        let (relevant_chunks, relevance_stats) = match self
            .classifier
            .classify(&filtered.chunks, theme, &field_names)
            .await
        {
            Ok(outcome) => {
                if !filtered.chunks.is_empty() {
                    self.usage.record(outcome.usage);
                }
                let kept: Vec<DocumentChunk> = filtered
                    .chunks
                    .iter()
                    .zip(&outcome.relevant)
                    .filter(|(_, keep)| **keep)
                    .map(|(chunk, _)| chunk.clone())
                    .collect();
                (kept, outcome.stats)
            }
            Err(err) => {
                tracing::warn!(
                    filename = document.filename.as_str(),
                    error = %err,
                    "classifier failed; treating all chunks as relevant"
                );
                let stats = RelevanceStats {
                    relevant_chunks_count: filtered.chunks.len(),
                    avg_confidence: 0.0,
                };
                (filtered.chunks.clone(), stats)
            }
        };

        // Stage 3: context window.
        let context = build_context(&relevant_chunks, self.config.max_context_chars);
        if context.trim().is_empty() {
            self.review.add(
                &document.filename,
                "empty_context: no relevant chunks survived filtering",
                None,
                None,
            )?;
            return Err(PipelineError::EmptyContext {
                filename: document.filename.clone(),
            }
            .into());
        }

        // Stage 4: Tier 0.
        let pre_filled = apply_regex_prefill(
            &context,
            schema,
            &self.regex,
            self.config.confidence_threshold_mid,
        );
        if !pre_filled.is_empty() {
            tracing::info!(
                count = pre_filled.len(),
                "tier 0 pre-filled fields via regex"
            );
        }

        // Stages 5-8: cascade, check, audit, revise.
        let outcome = run_validation_loop(
            &self.cascade,
            &self.checker,
            &self.auditor,
            &self.config,
            &context,
            &relevant_chunks,
            schema,
            theme,
            pre_filled,
        )
        .await?;

        // Manual-review handoff: exhausted fields, human-review policy
        // fields, and whole documents that ran out of iterations unwell.
        for field in &outcome.exhausted {
            self.review.add(
                &document.filename,
                "cascade_exhausted: no tier met the confidence threshold",
                Some(field),
                None,
            )?;
        }
        for spec in &schema.fields {
            if spec.policy == crate::core::ExtractionPolicy::HumanReview
                && outcome
                    .extraction
                    .data
                    .get(&spec.key)
                    .is_some_and(|v| !v.is_null())
            {
                self.review.add(
                    &document.filename,
                    "human_review policy field",
                    Some(&spec.key),
                    None,
                )?;
            }
        }

        let (route, breakdown) = assess_routing(&outcome.extraction, schema);
        if route == RouteDecision::ReExtract && !outcome.checker.passed {
            self.review.add(
                &document.filename,
                "low-confidence extraction after exhausting revisions",
                None,
                Some(&serde_json::json!({
                    "overall_score": outcome.checker.overall_score,
                    "concerns": breakdown.concerns.clone(),
                })),
            )?;
        }

        let usage_after = self.usage.snapshot();
        let usage = TokenUsage {
            prompt_tokens: usage_after.prompt_tokens - usage_before.prompt_tokens,
            completion_tokens: usage_after.completion_tokens - usage_before.completion_tokens,
            calls: usage_after.calls - usage_before.calls,
        };

        #[allow(clippy::cast_possible_truncation)]
        let result = PipelineResult {
            filename: document.filename.clone(),
            fingerprint: fingerprint.clone(),
            data: outcome.extraction.data.clone(),
            evidence: outcome.extraction.evidence.clone(),
            checker: outcome.checker,
            iteration_count: outcome.iterations,
            iteration_history: outcome.history,
            relevant_chunks_count: relevant_chunks.len(),
            filter_stats: filtered.stats,
            relevance_stats,
            tier_used: outcome.extraction.extraction_metadata.tier_used.clone(),
            field_confidence: outcome
                .extraction
                .extraction_metadata
                .field_confidence
                .clone(),
            route,
            confidence_breakdown: breakdown,
            usage,
            elapsed_ms: started.elapsed().as_millis() as u64,
            timestamp: PipelineResult::now(),
        };

        // Write-back: whole result plus per-field entries.
        self.cache
            .set_pipeline(&fingerprint, schema.version, &result)?;
        for (field, value) in &result.data {
            if value.is_null() {
                continue;
            }
            let entry = CachedField {
                payload: value.clone(),
                tier: result.tier_used.get(field).copied(),
                confidence: outcome
                    .extraction
                    .extraction_metadata
                    .field_confidence
                    .get(field)
                    .copied(),
                created_at: result.timestamp,
            };
            self.cache
                .set_field(&fingerprint, field, schema.version, &entry)?;
        }

        tracing::info!(
            filename = document.filename.as_str(),
            score = result.checker.overall_score,
            passed = result.checker.passed,
            iterations = result.iteration_count,
            elapsed_ms = result.elapsed_ms,
            "extraction complete"
        );
        Ok(result)
    }

    /// Synchronous entry point wrapping the shared async loop.
    ///
    /// # Errors
    ///
    /// As [`Self::extract`], plus runtime construction failures.
    pub fn extract_blocking(
        &self,
        document: &Document,
        schema: &Schema,
        theme: &str,
    ) -> Result<PipelineResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Io(e.to_string()))?;
        runtime.block_on(self.extract(document, schema, theme))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::core::FieldSpec;
    use crate::llm::MockClient;
    use crate::review::{ReviewStatus, SqliteReviewQueue};
    use serde_json::json;

    struct Harness {
        local: Arc<MockClient>,
        pipeline: ExtractionPipeline,
        review: Arc<SqliteReviewQueue>,
    }

    fn harness() -> Harness {
        let mut config = PipelineConfig::default();
        config.transport.max_retries = 1;
        config.transport.retry_backoff_ms = 1;

        let local = Arc::new(MockClient::new());
        let cloud = Arc::new(MockClient::new());
        let cache = Arc::new(SqliteCache::in_memory().unwrap());
        let review = Arc::new(SqliteReviewQueue::in_memory().unwrap());

        let pipeline = ExtractionPipeline::new(
            config,
            local.clone(),
            cloud,
            cache,
            review.clone(),
        );
        Harness {
            local,
            pipeline,
            review,
        }
    }

    fn schema() -> Schema {
        Schema::new(
            "demo",
            1,
            vec![FieldSpec::scalar("sample_size", "Patients").with_tier(3)],
        )
        .unwrap()
    }

    fn classify_all_relevant(n: usize) -> serde_json::Value {
        json!(std::iter::repeat_n(1, n).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_empty_context_fails_and_enqueues_review() {
        let h = harness();
        // A document whose only chunk is a references section.
        let document = Document::new(
            "refs_only.pdf",
            vec![crate::core::DocumentChunk::with_section(
                0,
                "1. Smith 2019.".to_string(),
                "references",
            )],
        );
        let result = h.pipeline.extract(&document, &schema(), "theme").await;
        assert!(matches!(
            result,
            Err(Error::Pipeline(PipelineError::EmptyContext { .. }))
        ));
        let pending = h.review.list(Some(ReviewStatus::Pending), 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].failure_reason.contains("empty_context"));
    }

    #[tokio::test]
    async fn test_classifier_failure_keeps_all_chunks() {
        let h = harness();
        // Classifier fails; extraction proceeds over everything. The
        // regex tier pre-fills sample_size, so the next scripted
        // responses serve the checker and auditor.
        h.local
            .push_err(crate::error::TransportError::Timeout { seconds: 1 });
        h.local.push_ok(json!({
            "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
        }));
        h.local.push_ok(json!({"audits": []}));

        let document = Document::from_text("ok.pdf", "We enrolled 50 patients in this study.");
        let result = h.pipeline.extract(&document, &schema(), "theme").await.unwrap();
        assert_eq!(result.relevant_chunks_count, 1);
        assert!(result.passed());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_llm_entirely() {
        let h = harness();
        let text = "DOI: 10.1234/test. We enrolled 50 patients.";

        // First run: classify + cascade-free (regex prefilled sample_size)
        // but checker and auditor still run.
        h.local.push_ok(classify_all_relevant(1));
        h.local.push_ok(json!({
            "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
        }));
        h.local.push_ok(json!({"audits": []}));

        let first = h
            .pipeline
            .extract(&Document::from_text("a.pdf", text), &schema(), "theme")
            .await
            .unwrap();
        let calls_after_first = h.local.requests().len();

        // Second run: same content, different filename. Pure cache hit.
        let second = h
            .pipeline
            .extract(&Document::from_text("b.pdf", text), &schema(), "theme")
            .await
            .unwrap();
        assert_eq!(h.local.requests().len(), calls_after_first);
        assert_eq!(first, second);
        assert_eq!(second.data["sample_size"], json!("50"));
    }

    #[tokio::test]
    async fn test_schema_version_bump_is_cache_miss() {
        let h = harness();
        let text = "We enrolled 50 patients.";

        for _ in 0..2 {
            h.local.push_ok(classify_all_relevant(1));
            h.local.push_ok(json!({
                "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
            }));
            h.local.push_ok(json!({"audits": []}));
        }

        let v1 = schema();
        let mut v2 = schema();
        v2.version = 2;

        let document = Document::from_text("a.pdf", text);
        let _ = h.pipeline.extract(&document, &v1, "theme").await.unwrap();
        let calls_after_v1 = h.local.requests().len();
        let _ = h.pipeline.extract(&document, &v2, "theme").await.unwrap();
        // Version 2 re-ran the stages instead of hitting the cache.
        assert!(h.local.requests().len() > calls_after_v1);
    }

    #[tokio::test]
    async fn test_regex_prefill_reaches_result_as_tier0() {
        let h = harness();
        h.local.push_ok(classify_all_relevant(1));
        h.local.push_ok(json!({
            "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
        }));
        h.local.push_ok(json!({"audits": []}));

        let document = Document::from_text("a.pdf", "We enrolled 50 patients.");
        let result = h.pipeline.extract(&document, &schema(), "theme").await.unwrap();
        assert_eq!(result.data["sample_size"], json!("50"));
        assert_eq!(result.tier_used["sample_size"], crate::core::Tier::Regex);
        assert_eq!(result.iteration_count, 1);
    }

    #[tokio::test]
    async fn test_data_keys_exactly_schema_keys() {
        let h = harness();
        let schema = Schema::new(
            "demo",
            1,
            vec![
                FieldSpec::scalar("sample_size", ""),
                FieldSpec::scalar("never_extracted", "")
                    .with_policy(crate::core::ExtractionPolicy::Derived),
            ],
        )
        .unwrap();

        h.local.push_ok(classify_all_relevant(1));
        h.local.push_ok(json!({
            "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
        }));
        h.local.push_ok(json!({"audits": []}));

        let document = Document::from_text("a.pdf", "We enrolled 50 patients.");
        let result = h.pipeline.extract(&document, &schema, "theme").await.unwrap();
        let keys: Vec<_> = result.data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["never_extracted", "sample_size"]);
        assert!(result.data["never_extracted"].is_null());
    }

    #[test]
    fn test_blocking_entry_point() {
        let h = harness();
        h.local.push_ok(classify_all_relevant(1));
        h.local.push_ok(json!({
            "accuracy_score": 1.0, "consistency_score": 1.0, "issues": [], "suggestions": []
        }));
        h.local.push_ok(json!({"audits": []}));

        let document = Document::from_text("a.pdf", "We enrolled 50 patients.");
        let result = h
            .pipeline
            .extract_blocking(&document, &schema(), "theme")
            .unwrap();
        assert!(result.passed());
    }
}
