//! Declarative extraction schemas.
//!
//! A schema is an ordered set of field specifications plus a version
//! number. Cached results are keyed jointly by document fingerprint and
//! schema version, so editing a schema and bumping the version invalidates
//! prior extractions without touching the cache.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Semantic datatype of a schema field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free-form scalar (string or number).
    #[default]
    Scalar,
    /// Tri-state finding with optional n/N frequencies.
    Finding,
    /// Continuous measurement with unit and range.
    Measurement,
    /// Structured count with unit.
    Count,
}

/// How a field may be extracted.
///
/// A closed enum: routing is a total match, no open-ended subclassing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    /// Always extracted from document metadata (title, authors, DOI).
    Metadata,
    /// The model may infer the value from context.
    #[default]
    CanBeInferred,
    /// Requires an explicit statement in the text; never inferred.
    MustBeExplicit,
    /// Computed from other fields by rule; never asked of the model.
    Derived,
    /// Always flagged for human review.
    HumanReview,
}

impl ExtractionPolicy {
    /// Whether the LLM cascade should attempt this field at all.
    ///
    /// Derived fields are computed downstream; human-review fields are
    /// extracted but always land in the review queue.
    #[must_use]
    pub const fn is_llm_extractable(self) -> bool {
        !matches!(self, Self::Derived)
    }

    /// Whether a null value for this field should trigger the recall boost.
    #[must_use]
    pub const fn is_recall_critical(self) -> bool {
        matches!(self, Self::MustBeExplicit)
    }
}

/// Inclusive numeric bounds for validation of extracted values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericBounds {
    /// Minimum accepted value.
    pub min: f64,
    /// Maximum accepted value.
    pub max: f64,
}

impl NumericBounds {
    /// Creates bounds, normalizing a reversed pair.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Checks whether a value falls inside the bounds.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Specification of a single extractable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field key; unique within the schema.
    pub key: String,

    /// Semantic datatype.
    #[serde(default)]
    pub kind: FieldKind,

    /// Human-readable description used in extraction prompts.
    #[serde(default)]
    pub description: String,

    /// Extraction policy.
    #[serde(default)]
    pub policy: ExtractionPolicy,

    /// Field accuracy tier (1 = easiest, 5 = hardest); selects the
    /// confidence threshold applied when accepting values.
    #[serde(default = "default_field_tier")]
    pub tier: u8,

    /// Narrative section hint for the extractor.
    #[serde(default)]
    pub source_narrative: Option<String>,

    /// Keywords whose presence raises extraction confidence.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Whether an exact evidence quote is required alongside the value.
    #[serde(default)]
    pub requires_evidence_quote: bool,

    /// Numeric bounds for validation, if the field is numeric.
    #[serde(default)]
    pub bounds: Option<NumericBounds>,
}

const fn default_field_tier() -> u8 {
    3
}

impl FieldSpec {
    /// Creates a minimal scalar spec with default policy and tier.
    #[must_use]
    pub fn scalar(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            kind: FieldKind::Scalar,
            description: description.to_string(),
            policy: ExtractionPolicy::default(),
            tier: default_field_tier(),
            source_narrative: None,
            keywords: Vec::new(),
            requires_evidence_quote: false,
            bounds: None,
        }
    }

    /// Sets the extraction policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the field tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: u8) -> Self {
        self.tier = tier;
        self
    }

    /// Sets numeric bounds.
    #[must_use]
    pub const fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some(NumericBounds { min, max });
        self
    }

    /// Requires an evidence quote for this field.
    #[must_use]
    pub const fn with_evidence_quote(mut self) -> Self {
        self.requires_evidence_quote = true;
        self
    }
}

/// An ordered, versioned set of field specifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name (dataset identifier).
    pub name: String,

    /// Schema version; part of every cache key derived from this schema.
    pub version: u32,

    /// Ordered field specifications.
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    /// Creates a schema from parts.
    ///
    /// # Errors
    ///
    /// Returns an error if two fields share a key or the field list is
    /// empty.
    pub fn new(name: &str, version: u32, fields: Vec<FieldSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(
                PipelineError::InvalidInput("schema has no fields".to_string()).into(),
            );
        }
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.key.as_str()) {
                return Err(PipelineError::InvalidInput(format!(
                    "duplicate field key: {}",
                    field.key
                ))
                .into());
            }
        }
        Ok(Self {
            name: name.to_string(),
            version,
            fields,
        })
    }

    /// Parses a schema from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the schema invalid.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(raw)
            .map_err(|e| PipelineError::InvalidInput(format!("schema parse: {e}")))?;
        Self::new(&schema.name, schema.version, schema.fields)
    }

    /// Parses a schema from TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the schema invalid.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let schema: Self = toml::from_str(raw)
            .map_err(|e| PipelineError::InvalidInput(format!("schema parse: {e}")))?;
        Self::new(&schema.name, schema.version, schema.fields)
    }

    /// Iterates field keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    /// Looks up a field spec by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Checks whether the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
