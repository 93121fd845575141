//! Result cache capability.
//!
//! Three namespaces share one store: parsed document text keyed by content
//! hash and parser version, per-field results keyed by (fingerprint, field,
//! schema version), and whole pipeline results keyed by (fingerprint,
//! schema version). A schema-version mismatch is a hard miss in every
//! namespace, never a stale hit.

use crate::core::{PipelineResult, Tier};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A cached parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    /// Parsed text.
    pub parsed_text: String,
    /// Parser metadata (free-form).
    pub metadata: serde_json::Value,
    /// Version of the parser that produced the text.
    pub parser_version: String,
    /// Unix timestamp of the cache write.
    pub created_at: i64,
}

/// A cached per-field result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedField {
    /// The cached value.
    pub payload: serde_json::Value,
    /// Tier that produced the value.
    pub tier: Option<Tier>,
    /// Confidence it was accepted with.
    pub confidence: Option<f64>,
    /// Unix timestamp of the cache write.
    pub created_at: i64,
}

/// Cache observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing (or a version mismatch).
    pub misses: u64,
    /// Writes.
    pub sets: u64,
    /// Documents currently cached.
    pub cached_documents: u64,
    /// Field entries currently cached.
    pub cached_fields: u64,
    /// Pipeline results currently cached.
    pub cached_pipelines: u64,
}

/// Capability trait for the persistent result cache.
///
/// Implementations are internally synchronized: all methods take `&self`
/// and are safe to call from concurrent workers.
pub trait ResultCache: Send + Sync {
    /// Looks up a parsed document by content hash and parser version.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get_document(&self, doc_hash: &str, parser_version: &str) -> Result<Option<CachedDocument>>;

    /// Stores a parsed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn set_document(
        &self,
        doc_hash: &str,
        parsed_text: &str,
        metadata: &serde_json::Value,
        parser_version: &str,
    ) -> Result<()>;

    /// Looks up a field result; a schema-version mismatch is a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get_field(
        &self,
        fingerprint: &str,
        field: &str,
        schema_version: u32,
    ) -> Result<Option<CachedField>>;

    /// Stores a field result.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn set_field(
        &self,
        fingerprint: &str,
        field: &str,
        schema_version: u32,
        entry: &CachedField,
    ) -> Result<()>;

    /// Looks up a pipeline result; a schema-version mismatch is a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get_pipeline(&self, fingerprint: &str, schema_version: u32)
    -> Result<Option<PipelineResult>>;

    /// Stores a pipeline result.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn set_pipeline(
        &self,
        fingerprint: &str,
        schema_version: u32,
        result: &PipelineResult,
    ) -> Result<()>;

    /// Purges every entry for a document fingerprint, across all
    /// namespaces and schema versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn invalidate_document(&self, fingerprint: &str) -> Result<()>;

    /// Returns cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if counts cannot be gathered.
    fn stats(&self) -> Result<CacheStats>;
}
