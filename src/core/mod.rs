//! Core domain types for the extraction pipeline.
//!
//! Documents and chunks (the parser contract), declarative schemas,
//! tri-state findings, evidence items, and pipeline results.

pub mod document;
pub mod evidence;
pub mod finding;
pub mod result;
pub mod schema;

pub use document::{Document, DocumentChunk};
pub use evidence::{EvidenceItem, Extraction, ExtractionMetadata, Tier};
pub use finding::{AggregationUnit, CountValue, FindingReport, FindingStatus, Measurement};
pub use result::{
    CheckerResult, ConfidenceBreakdown, FailureRecord, FilterStats, Issue, IterationAudit,
    PipelineResult, RelevanceStats, RouteDecision, Severity, TokenUsage,
};
pub use schema::{ExtractionPolicy, FieldKind, FieldSpec, NumericBounds, Schema};
