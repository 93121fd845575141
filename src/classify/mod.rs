//! Relevance classification of filtered chunks.
//!
//! One batched prompt covers every surviving chunk with a bounded preview
//! each; the response is coerced into structured verdicts before typed
//! parsing. The pipeline treats classifier failure as "all relevant" with
//! a warning, so this stage can only ever shrink the context, never sink
//! the document.

pub mod models;

pub use models::{ChunkRelevance, RelevanceResponse, coerce_relevance_list};

use crate::core::{DocumentChunk, RelevanceStats};
use crate::error::TransportError;
use crate::llm::{ChatMessage, ChatRequest, LlmClient, chat_with_retry};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Characters of each chunk shown to the classifier.
pub const PREVIEW_CHARS: usize = 600;

/// System prompt for the relevance classifier.
const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are a relevance classifier in a document extraction pipeline. You receive numbered text chunks from a scientific paper, the extraction theme, and the list of fields to be extracted.

For each chunk, decide whether it could contain information relevant to extracting any of the listed fields.

Return a JSON object:

{
  "classifications": [
    {"index": <chunk index>, "relevant": 1, "reason": "short reason", "confidence": 0.9}
  ]
}

Rules:
- One entry per input chunk, in order.
- "relevant" is 1 or 0. When unsure, prefer 1: a wrongly kept chunk costs tokens, a wrongly dropped chunk loses data.
- "confidence" is between 0 and 1.
- Output JSON only."#;

/// Classifier verdicts plus summary statistics.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    /// Relevance flag per input chunk, aligned by position.
    pub relevant: Vec<bool>,
    /// Summary statistics.
    pub stats: RelevanceStats,
    /// Transport-reported usage, when available.
    pub usage: Option<crate::core::TokenUsage>,
}

/// Classifies chunks for relevance to the extraction theme.
pub struct RelevanceClassifier {
    client: Arc<dyn LlmClient>,
    model: String,
    deadline: Duration,
    max_retries: u32,
    backoff_ms: u64,
}

impl RelevanceClassifier {
    /// Creates a classifier using the given transport and model.
    #[must_use]
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: &str,
        deadline: Duration,
        max_retries: u32,
        backoff_ms: u64,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            deadline,
            max_retries,
            backoff_ms,
        }
    }

    /// Classifies every chunk in one batched call.
    ///
    /// Chunks the model did not cover default to relevant.
    ///
    /// # Errors
    ///
    /// Returns a transport error after retries are exhausted; the caller
    /// decides the fallback (the pipeline keeps all chunks and warns).
    pub async fn classify(
        &self,
        chunks: &[DocumentChunk],
        theme: &str,
        field_names: &[&str],
    ) -> Result<ClassificationOutcome, TransportError> {
        if chunks.is_empty() {
            return Ok(ClassificationOutcome {
                relevant: Vec::new(),
                stats: RelevanceStats::default(),
                usage: None,
            });
        }

        let prompt = build_classification_prompt(chunks, theme, field_names);
        let request = ChatRequest::json(
            &self.model,
            vec![
                ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            self.deadline,
        );

        let outcome =
            chat_with_retry(&*self.client, request, self.max_retries, self.backoff_ms).await?;
        let response: RelevanceResponse = serde_json::from_value(outcome.value)
            .map_err(|e| TransportError::SchemaParse(e.to_string()))?;

        // Undecided chunks stay relevant.
        let mut relevant = vec![true; chunks.len()];
        let mut decided = vec![false; chunks.len()];
        let mut confidence_sum = 0.0;
        for verdict in &response.classifications {
            if let Some(slot) = relevant.get_mut(verdict.index) {
                *slot = verdict.is_relevant();
                decided[verdict.index] = true;
            }
            confidence_sum += verdict.confidence;
        }

        let undecided = decided.iter().filter(|d| !**d).count();
        if undecided > 0 {
            tracing::warn!(
                undecided,
                total = chunks.len(),
                "classifier left chunks undecided; keeping them"
            );
        }

        let relevant_chunks_count = relevant.iter().filter(|r| **r).count();
        #[allow(clippy::cast_precision_loss)]
        let avg_confidence = if response.classifications.is_empty() {
            0.0
        } else {
            confidence_sum / response.classifications.len() as f64
        };

        tracing::debug!(
            relevant = relevant_chunks_count,
            total = chunks.len(),
            avg_confidence,
            "relevance classification complete"
        );

        Ok(ClassificationOutcome {
            relevant,
            stats: RelevanceStats {
                relevant_chunks_count,
                avg_confidence,
            },
            usage: outcome.usage,
        })
    }
}

/// Formats the batched classification prompt.
#[must_use]
pub fn build_classification_prompt(
    chunks: &[DocumentChunk],
    theme: &str,
    field_names: &[&str],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Theme\n{theme}\n");
    let _ = writeln!(prompt, "## Fields\n{}\n", field_names.join(", "));
    let _ = writeln!(prompt, "## Chunks");
    for chunk in chunks {
        let section = chunk.section.as_deref().unwrap_or("unknown");
        let _ = writeln!(
            prompt,
            "\n### Chunk {} (section: {section})\n{}",
            chunk.chunk_index,
            chunk.preview(PREVIEW_CHARS)
        );
    }
    prompt
}
