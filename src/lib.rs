//! # sr-extract
//!
//! Structured extraction engine for systematic-review corpora.
//!
//! sr-extract drives parsed scientific documents through a staged
//! pipeline: content filtering, relevance classification, tiered
//! extraction (regex, local model, cloud model), then validation and
//! adversarial audit with a bounded revision loop. Batches run with
//! resource-aware throttling, a circuit breaker, and crash-safe
//! checkpointing.
//!
//! ## Features
//!
//! - **Tiered extraction**: cheap tiers first, per-field escalation on
//!   low confidence
//! - **Auditable results**: evidence quotes with source spans and
//!   per-field confidences
//! - **`SQLite` caching**: content-fingerprint keyed, schema-version aware
//! - **Resumable batches**: atomic checkpoints, manual-review queue for
//!   persistent failures

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod extract;
pub mod filter;
pub mod fingerprint;
pub mod llm;
pub mod pipeline;
pub mod resource;
pub mod review;
pub mod validate;

// Re-export commonly used types at crate root
pub use error::{Error, FailureKind, Result};

// Re-export core domain types
pub use core::{Document, DocumentChunk, EvidenceItem, Extraction, PipelineResult, Schema, Tier};

// Re-export the pipeline and batch entry points
pub use batch::{BatchExecutor, Checkpoint, CircuitBreaker, StateManager};
pub use pipeline::ExtractionPipeline;

// Re-export configuration
pub use config::PipelineConfig;

// Re-export storage backends
pub use cache::{ResultCache, SqliteCache};
pub use review::{ReviewQueue, SqliteReviewQueue};

// Re-export transport capability
pub use llm::{LlmClient, MockClient, OpenAiCompatClient};

// Re-export the resource monitor
pub use resource::{ResourceMonitor, ResourceStatus};
