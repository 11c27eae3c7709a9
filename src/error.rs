//! Error types for the matching engine.
//!
//! This module provides structured error types using thiserror, split per
//! concern the way the rest of the crate is: storage backends, embedding
//! providers, and the engine itself. Client-fault conditions (validation,
//! not-found) are distinguished from retryable server-fault conditions
//! (upstream unavailable) via `status_code()` and `is_retryable()`.

use crate::types::EntityType;
use thiserror::Error;

/// Errors raised by vector store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Vector store backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Vector store request failed during {operation}: {cause}")]
    Backend { operation: String, cause: String },

    #[error("Stored record '{id}' is malformed: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error(
        "Vector dimension mismatch in store: expected {expected}, got {actual}\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

impl StoreError {
    /// Convenience constructor for backend call failures.
    pub fn backend(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::unavailable(e),
            other => StoreError::backend("query", other),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            StoreError::unavailable(e)
        } else {
            StoreError::backend("request", e)
        }
    }
}

/// Errors raised by embedding providers.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(
        "Failed to initialize embedding model: {0}\nSuggestion: Ensure you have internet connection for first-time model download"
    )]
    ModelInit(String),

    #[error("Embedding generation failed: {0}")]
    Generation(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Main error type for engine and service operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request input (weights, ranges, text length).
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid weights: {reason}")]
    InvalidWeights { reason: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The entity has no stored vectors at all.
    #[error("{entity_type} '{entity_id}' not found: no vectors stored")]
    ProfileNotFound {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("Engine initialization failed: {reason}")]
    InitFailed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl EngineError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that transport layers can map onto their
    /// own fault vocabulary (HTTP status, gRPC code) without string-matching
    /// display messages.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "VALIDATION_ERROR",
            Self::InvalidWeights { .. } => "VALIDATION_ERROR",
            Self::DimensionMismatch { .. } => "VALIDATION_ERROR",
            Self::ProfileNotFound { .. } => "NOT_FOUND",
            Self::InitFailed { .. } => "UPSTREAM_UNAVAILABLE",
            Self::Store(StoreError::Unavailable { .. }) => "UPSTREAM_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
            Self::Embedding(EmbeddingError::ProviderUnavailable(_)) => "UPSTREAM_UNAVAILABLE",
            Self::Embedding(_) => "EMBEDDING_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InitFailed { .. }
                | Self::Store(StoreError::Unavailable { .. })
                | Self::Embedding(EmbeddingError::ProviderUnavailable(_))
        )
    }

    /// Whether the fault lies with the caller's input.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidWeights { .. }
                | Self::DimensionMismatch { .. }
                | Self::ProfileNotFound { .. }
        )
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Result type alias for engine and service operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        let err = EngineError::invalid_request("top_k out of range");
        assert_eq!(err.status_code(), "VALIDATION_ERROR");
        assert!(err.is_client_fault());
        assert!(!err.is_retryable());

        let err = EngineError::ProfileNotFound {
            entity_type: EntityType::Candidate,
            entity_id: "c-1".into(),
        };
        assert_eq!(err.status_code(), "NOT_FOUND");
        assert!(err.is_client_fault());

        let err = EngineError::Store(StoreError::unavailable("connection refused"));
        assert_eq!(err.status_code(), "UPSTREAM_UNAVAILABLE");
        assert!(err.is_retryable());
        assert!(!err.is_client_fault());
    }
}
