//! Error taxonomy for Groundwork.
//!
//! Every failure that can reach a caller carries a stable [`ErrorKind`].
//! Transient backend failures are retried by the component that owns the
//! call; only validation, configuration, cancellation, and deadline errors
//! are expected to surface as request failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by Groundwork components and backends.
#[derive(Debug, Error)]
pub enum Error {
    /// A keyword, vector, catalog, or cache backend failed in a way that
    /// may succeed on retry.
    #[error("transient backend error ({backend}): {message}")]
    TransientBackend {
        /// Backend that produced the error.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// The embedding model could not be reached or is over quota.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The embedding model refused the input.
    #[error("embedding rejected: {0}")]
    EmbeddingRejected(String),

    /// Malformed query, collection name, or request parameters.
    #[error("validation error: {0}")]
    Validation(String),

    /// One index accepted a write that the other refused.
    #[error("consistency violation for {chunk_id}: {message}")]
    ConsistencyViolation {
        /// Chunk whose index entries disagree.
        chunk_id: String,
        /// Description of the disagreement.
        message: String,
    },

    /// Required backend configuration is missing or invalid.
    #[error("configuration error: {0}")]
    FatalConfig(String),

    /// A stage or the whole request exceeded its deadline.
    #[error("{stage} timed out after {elapsed_ms} ms")]
    Timeout {
        /// Pipeline stage that timed out.
        stage: String,
        /// Budget that was exceeded.
        elapsed_ms: u64,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

/// Stable, serializable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientBackend,
    PartialPipelineDegradation,
    Validation,
    ConsistencyViolation,
    FatalConfig,
    EmbeddingUnavailable,
    EmbeddingRejected,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientBackend => "transient_backend",
            ErrorKind::PartialPipelineDegradation => "partial_pipeline_degradation",
            ErrorKind::Validation => "validation",
            ErrorKind::ConsistencyViolation => "consistency_violation",
            ErrorKind::FatalConfig => "fatal_config",
            ErrorKind::EmbeddingUnavailable => "embedding_unavailable",
            ErrorKind::EmbeddingRejected => "embedding_rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Shorthand for a [`Error::TransientBackend`].
    pub fn backend(backend: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::TransientBackend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TransientBackend { .. } => ErrorKind::TransientBackend,
            Error::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            Error::EmbeddingRejected(_) => ErrorKind::EmbeddingRejected,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
            Error::FatalConfig(_) => ErrorKind::FatalConfig,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientBackend { .. } | Error::EmbeddingUnavailable(_) | Error::Timeout { .. }
        )
    }

    /// Structured form returned to callers.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::backend("memory", "lock poisoned")
    }
}

/// Structured error body with a stable kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

/// Convenience result type for Groundwork operations.
pub type Result<T> = std::result::Result<T, Error>;
