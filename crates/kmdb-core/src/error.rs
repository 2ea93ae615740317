use thiserror::Error;

use crate::article::Stage;

/// Application-wide error types for the KMDB pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching an article page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A model-serving collaborator (NER, classifier, lemmatizer) failed.
    #[error("Model error (HTTP {status_code}): {message}")]
    ModelError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Article body/description extraction from HTML failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// A collaborator returned output that does not match its contract.
    #[error("Invalid collaborator output: {0}")]
    InvalidCollaboratorOutput(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The compare-and-swap on (stage, owner) matched no row: the claim
    /// expired and another worker took the article.
    #[error("Claim lost for article {article_id} (expected stage {stage})")]
    ClaimLost { article_id: i64, stage: Stage },

    /// A stage transition that would move an article backwards or out of a
    /// terminal state.
    #[error("Invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    /// A resolver invariant was broken. Fatal for the article being processed.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and the article should go back
    /// to the queue with backoff instead of being skipped.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::DatabaseError(_) => true,
            AppError::ModelError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::ConfigError(format!("CSV error: {e}"))
    }
}
