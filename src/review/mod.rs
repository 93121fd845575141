//! Manual review queue.
//!
//! Durable, append-mostly table of extraction failures awaiting a human.
//! Enqueueing is idempotent by (paper path, field name): retried batches
//! never duplicate queue items.

pub mod sqlite;

pub use sqlite::SqliteReviewQueue;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Status of a review item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Awaiting review.
    Pending,
    /// Resolved with an outcome.
    Resolved,
    /// Skipped by the reviewer.
    Skipped,
}

impl ReviewStatus {
    /// Canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a stored status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "resolved" => Self::Resolved,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// A single item in the manual review queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Queue item ID.
    pub id: i64,
    /// Path of the paper that failed.
    pub paper_path: String,
    /// Why extraction failed.
    pub failure_reason: String,
    /// Specific field that failed, if the failure was per-field.
    pub field_name: Option<String>,
    /// Current status.
    pub status: ReviewStatus,
    /// Unix timestamp of enqueue.
    pub created_at: i64,
    /// Unix timestamp of resolution.
    pub resolved_at: Option<i64>,
    /// How it was resolved.
    pub resolution: Option<String>,
    /// Manually extracted value, if one was provided.
    pub resolved_value: Option<String>,
    /// Additional context.
    pub metadata: Option<serde_json::Value>,
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCounts {
    /// Items awaiting review.
    pub pending: u64,
    /// Resolved items.
    pub resolved: u64,
    /// Skipped items.
    pub skipped: u64,
}

/// Capability trait for the manual review queue.
pub trait ReviewQueue: Send + Sync {
    /// Enqueues a failure; idempotent by (paper_path, field_name).
    ///
    /// Returns the item ID (existing on repeat enqueue).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn add(
        &self,
        paper_path: &str,
        failure_reason: &str,
        field_name: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64>;

    /// Retrieves a single item by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn get(&self, id: i64) -> Result<Option<ReviewItem>>;

    /// Lists items, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn list(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>>;

    /// Marks an item resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist or the store fails.
    fn resolve(&self, id: i64, resolution: &str, resolved_value: Option<&str>) -> Result<()>;

    /// Marks an item skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist or the store fails.
    fn skip(&self, id: i64, reason: &str) -> Result<()>;

    /// Returns per-status counts.
    ///
    /// # Errors
    ///
    /// Returns an error if counts cannot be gathered.
    fn counts(&self) -> Result<ReviewCounts>;
}
