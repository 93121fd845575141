//! Error types for extraction pipeline operations.
//!
//! Provides a layered error hierarchy using `thiserror` covering storage,
//! LLM transport, and pipeline failures, plus the failure-kind taxonomy
//! recorded in checkpoints and batch summaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (cache, review queue, checkpoint).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// LLM transport errors (network, deadline, malformed output).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pipeline stage errors.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O errors (file operations).
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Storage-specific errors for the cache, review queue, and state store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Review item not found by ID.
    #[error("review item not found: {id}")]
    ItemNotFound {
        /// Queue item ID that was not found.
        id: i64,
    },

    /// Checkpoint write failed.
    #[error("checkpoint write failed: {path}: {reason}")]
    CheckpointWrite {
        /// Path of the checkpoint file.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Transport-specific errors for LLM calls.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Deadline exceeded before the model responded.
    #[error("deadline exceeded after {seconds}s")]
    Timeout {
        /// Configured deadline in seconds.
        seconds: u64,
    },

    /// HTTP or connection-level failure.
    #[error("http error: {message}")]
    Http {
        /// Status code if one was received.
        status: Option<u16>,
        /// Error detail.
        message: String,
    },

    /// Provider rejected the request (auth, rate limit, bad model).
    #[error("api error: {0}")]
    Api(String),

    /// Model output could not be parsed as the expected structure,
    /// even after coercion.
    #[error("unparseable model output: {0}")]
    SchemaParse(String),

    /// All retry attempts failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message observed.
        last: String,
    },

    /// No transport registered for the requested provider name.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Provider name that failed to resolve.
        name: String,
    },
}

/// Pipeline-stage errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No relevant text remained after filtering and classification.
    #[error("empty context for {filename}: no relevant chunks survived filtering")]
    EmptyContext {
        /// Document that produced no context.
        filename: String,
    },

    /// The structured validator failed; the current iteration scores zero.
    #[error("validator failed: {detail}")]
    ValidatorFailed {
        /// Underlying failure detail.
        detail: String,
    },

    /// Every tier failed to produce an acceptable value for a field.
    #[error("extraction cascade exhausted for field: {field}")]
    CascadeExhausted {
        /// Field that no tier could extract.
        field: String,
    },

    /// The batch circuit breaker is open; no new documents are dispatched.
    #[error("circuit breaker open: consecutive failure threshold reached")]
    CircuitOpen,

    /// A document or schema definition failed to load.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse failure taxonomy recorded per document.
///
/// Kinds, not types: classification is by observable cause so batch
/// summaries can aggregate per-kind counts across heterogeneous errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No relevant chunks after filter + classify.
    EmptyContext,
    /// LLM/network error after retries.
    Transport,
    /// Deadline exceeded.
    Timeout,
    /// Model returned unparseable structured output.
    Schema,
    /// Validator raised; iteration scored zero.
    ValidatorError,
    /// Memory pressure killed the worker.
    Oom,
    /// All tiers failed for a field.
    CascadeExhausted,
    /// Skipped because the batch circuit breaker was open.
    BatchCircuitOpen,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// Classifies an error into a failure kind.
    #[must_use]
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Transport(t) => match t {
                TransportError::Timeout { .. } => Self::Timeout,
                TransportError::SchemaParse(_) => Self::Schema,
                _ => Self::Transport,
            },
            Error::Pipeline(p) => match p {
                PipelineError::EmptyContext { .. } => Self::EmptyContext,
                PipelineError::ValidatorFailed { .. } => Self::ValidatorError,
                PipelineError::CascadeExhausted { .. } => Self::CascadeExhausted,
                PipelineError::CircuitOpen => Self::BatchCircuitOpen,
                PipelineError::InvalidInput(_) => Self::Schema,
            },
            Error::Io(message) if message.to_lowercase().contains("memory") => Self::Oom,
            _ => Self::Unknown,
        }
    }

    /// Returns the canonical snake_case name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyContext => "empty_context",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Schema => "schema",
            Self::ValidatorError => "validator_error",
            Self::Oom => "oom",
            Self::CascadeExhausted => "cascade_exhausted",
            Self::BatchCircuitOpen => "batch_circuit_open",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SchemaParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidState {
            message: "test error".to_string(),
        };
        assert_eq!(err.to_string(), "invalid state: test error");

        let err = Error::Config {
            message: "bad threshold".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad threshold");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Timeout { seconds: 120 };
        assert_eq!(err.to_string(), "deadline exceeded after 120s");

        let err = TransportError::RetriesExhausted {
            attempts: 3,
            last: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::EmptyContext {
            filename: "paper.pdf".to_string(),
        };
        assert!(err.to_string().contains("paper.pdf"));

        let err = PipelineError::CascadeExhausted {
            field: "sample_size".to_string(),
        };
        assert!(err.to_string().contains("sample_size"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::Storage(StorageError::Database(_))));
    }

    #[test]
    fn test_classify_transport_kinds() {
        let timeout: Error = TransportError::Timeout { seconds: 30 }.into();
        assert_eq!(FailureKind::classify(&timeout), FailureKind::Timeout);

        let parse: Error = TransportError::SchemaParse("junk".to_string()).into();
        assert_eq!(FailureKind::classify(&parse), FailureKind::Schema);

        let http: Error = TransportError::Http {
            status: Some(500),
            message: "server error".to_string(),
        }
        .into();
        assert_eq!(FailureKind::classify(&http), FailureKind::Transport);
    }

    #[test]
    fn test_classify_pipeline_kinds() {
        let empty: Error = PipelineError::EmptyContext {
            filename: "x.pdf".to_string(),
        }
        .into();
        assert_eq!(FailureKind::classify(&empty), FailureKind::EmptyContext);

        let open: Error = PipelineError::CircuitOpen.into();
        assert_eq!(FailureKind::classify(&open), FailureKind::BatchCircuitOpen);
    }

    #[test]
    fn test_classify_oom_from_io() {
        let err = Error::Io("cannot allocate memory".to_string());
        assert_eq!(FailureKind::classify(&err), FailureKind::Oom);
    }

    #[test]
    fn test_failure_kind_round_trip() {
        let kind = FailureKind::BatchCircuitOpen;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"batch_circuit_open\"");
        let back: FailureKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_failure_kind_as_str() {
        assert_eq!(FailureKind::EmptyContext.as_str(), "empty_context");
        assert_eq!(FailureKind::Unknown.as_str(), "unknown");
        assert_eq!(FailureKind::Oom.to_string(), "oom");
    }
}
