//! Extraction prompt builders.
//!
//! The system prompt defines the extractor's contract; builders format
//! the per-call user message from the schema, the context window, carried
//! pre-filled values, and any revision feedback.

use crate::core::{ExtractionPolicy, FieldSpec, Schema};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// System prompt for the structured extractor.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a structured extraction agent for systematic-review screening. You receive text from a scientific paper, a list of fields with extraction rules, and sometimes values already confirmed by earlier stages.

Extract a value for every listed field. Cite exact quotes from the text as evidence.

## Output Schema

Return a single JSON object:

{
  "data": {"<field>": <value or null>},
  "evidence": [
    {"field_name": "<field>", "extracted_value": <value>, "exact_quote": "<verbatim text>", "confidence": 0.9}
  ],
  "field_confidence": {"<field>": 0.9}
}

## Rules

- Every listed field must appear in "data". Use null when the text does not support a value.
- "exact_quote" must be copied verbatim from the provided text. Never paraphrase inside a quote.
- Respect each field's extraction rule. A field marked "explicit only" must never be inferred.
- Keep any pre-confirmed value exactly as given; do not overwrite it and do not set it to null.
- "confidence" and "field_confidence" entries are between 0 and 1 and reflect how directly the text supports the value.
- Output JSON only."#;

fn policy_instruction(policy: ExtractionPolicy) -> &'static str {
    match policy {
        ExtractionPolicy::MustBeExplicit => {
            "explicit only: extract solely when clearly stated in the text; never infer"
        }
        ExtractionPolicy::CanBeInferred => "may be inferred from context when not explicitly stated",
        ExtractionPolicy::Metadata => "extract from document metadata or header material",
        ExtractionPolicy::Derived => "derived downstream; do not extract",
        ExtractionPolicy::HumanReview => "extract with an evidence quote; flagged for human review",
    }
}

fn describe_field(out: &mut String, spec: &FieldSpec) {
    let _ = write!(out, "- {}", spec.key);
    if !spec.description.is_empty() {
        let _ = write!(out, ": {}", spec.description);
    }
    let _ = write!(out, " [{}]", policy_instruction(spec.policy));
    if !spec.keywords.is_empty() {
        let _ = write!(out, " (look for: {})", spec.keywords.join(", "));
    }
    if spec.requires_evidence_quote {
        let _ = write!(out, " (evidence quote required)");
    }
    if let Some(narrative) = &spec.source_narrative {
        let _ = write!(out, " (usually found in: {narrative})");
    }
    let _ = writeln!(out);
}

/// Builds the extraction user message.
///
/// `fields` are the specs still to extract; `pre_filled` values are shown
/// as confirmed so the model carries them forward instead of re-deriving
/// or nulling them; `revision_prompts` come from the validator between
/// iterations.
#[must_use]
pub fn build_extraction_prompt(
    context: &str,
    schema: &Schema,
    fields: &[&FieldSpec],
    theme: &str,
    pre_filled: &BTreeMap<String, serde_json::Value>,
    revision_prompts: &[String],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Theme\n{theme}\n");
    let _ = writeln!(prompt, "## Dataset\n{} (schema v{})\n", schema.name, schema.version);

    let _ = writeln!(prompt, "## Fields to extract");
    for spec in fields {
        describe_field(&mut prompt, spec);
    }

    if !pre_filled.is_empty() {
        let _ = writeln!(prompt, "\n## Confirmed values (keep exactly as given)");
        for (key, value) in pre_filled {
            let _ = writeln!(prompt, "- {key} = {value}");
        }
    }

    if !revision_prompts.is_empty() {
        let _ = writeln!(prompt, "\n## Revision feedback");
        for revision in revision_prompts {
            let _ = writeln!(prompt, "{revision}");
        }
    }

    let _ = writeln!(prompt, "\n## Text\n{context}");
    prompt
}

/// Builds the recall-boost instruction naming fields that must not stay
/// null without an explicit search.
#[must_use]
pub fn build_recall_boost(missing_fields: &[String]) -> String {
    let mut prompt = String::from(
        "The following required fields are still missing. Search the text again specifically for each one; \
         extract a value with an exact quote, or state null only if the text truly never mentions it:\n",
    );
    for field in missing_fields {
        let _ = writeln!(prompt, "- {field}");
    }
    prompt
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
                FieldSpec::scalar("doi", "Digital object identifier"),
                FieldSpec::scalar("primary_outcome", "Main outcome")
                    .with_policy(ExtractionPolicy::MustBeExplicit)
                    .with_evidence_quote(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_prompt_lists_fields_with_policies() {
        let schema = schema();
        let fields: Vec<&FieldSpec> = schema.fields.iter().collect();
        let prompt = build_extraction_prompt(
            "the text",
            &schema,
            &fields,
            "oncology outcomes",
            &BTreeMap::new(),
            &[],
        );
        assert!(prompt.contains("- doi: Digital object identifier"));
        assert!(prompt.contains("explicit only"));
        assert!(prompt.contains("evidence quote required"));
        assert!(prompt.contains("oncology outcomes"));
        assert!(prompt.contains("## Text\nthe text"));
    }

    #[test]
    fn test_prompt_shows_pre_filled() {
        let schema = schema();
        let fields: Vec<&FieldSpec> = schema.fields.iter().collect();
        let mut pre_filled = BTreeMap::new();
        pre_filled.insert("doi".to_string(), json!("10.1/x"));
        let prompt =
            build_extraction_prompt("t", &schema, &fields, "theme", &pre_filled, &[]);
        assert!(prompt.contains("Confirmed values"));
        assert!(prompt.contains("doi = \"10.1/x\""));
    }

    #[test]
    fn test_prompt_appends_revisions() {
        let schema = schema();
        let fields: Vec<&FieldSpec> = schema.fields.iter().collect();
        let prompt = build_extraction_prompt(
            "t",
            &schema,
            &fields,
            "theme",
            &BTreeMap::new(),
            &["Fix the year format.".to_string()],
        );
        assert!(prompt.contains("Revision feedback"));
        assert!(prompt.contains("Fix the year format."));
    }

    #[test]
    fn test_recall_boost_names_fields() {
        let boost = build_recall_boost(&["primary_outcome".to_string(), "dose".to_string()]);
        assert!(boost.contains("- primary_outcome"));
        assert!(boost.contains("- dose"));
    }

    #[test]
    fn test_system_prompt_contract_lines() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("\"data\""));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("exact_quote"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("null"));
    }
}
