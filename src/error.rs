use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Sheaf engine
#[derive(Error, Debug)]
pub enum SheafError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Bad input that will never succeed (bad source, unsupported MIME,
    /// impossible options). Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Artifact cache errors
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),

    /// Index adapter errors
    #[error(transparent)]
    Index(#[from] crate::index::IndexError),

    /// Content extraction errors
    #[error(transparent)]
    Extract(#[from] crate::extract::ExtractError),

    /// Embedding errors
    #[error(transparent)]
    Embed(#[from] crate::embed::EmbedError),

    /// Job queue errors
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),

    /// Search errors
    #[error(transparent)]
    Search(#[from] crate::search::SearchError),

    /// Intent log errors
    #[error(transparent)]
    Intent(#[from] crate::intent::IntentError),

    /// Cross-adapter state disagreement detected by a consistency check
    /// or a step precondition
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// A data-model invariant was violated at runtime. Never auto-repaired.
    #[error("Invariant breach for document {doc_id}: {detail}")]
    InvariantBreach { doc_id: String, detail: String },

    /// Operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error taxonomy used by the worker to decide job-state transitions.
/// Retry/bypass policy lives in the worker; the rest of the engine only
/// classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surface immediately, never retried
    Validation,
    /// Retried with backoff
    Transient,
    /// Record goes `Failed`; job retries up to the ceiling
    Extraction,
    /// Triggers the repair path, surfaced as a report
    Consistency,
    /// Leaves durable state recoverable
    Cancelled,
    /// Abort, latch the record `Failed`, never auto-repair
    Invariant,
}

impl SheafError {
    /// Classify this error into the retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SheafError::Validation(_)
            | SheafError::Config(_)
            | SheafError::ConfigValidation { .. }
            | SheafError::ConfigNotFound { .. } => ErrorKind::Validation,
            SheafError::Extract(e) => match e {
                crate::extract::ExtractError::Unsupported(_) => ErrorKind::Validation,
                _ => ErrorKind::Extraction,
            },
            SheafError::Consistency(_) => ErrorKind::Consistency,
            SheafError::InvariantBreach { .. } => ErrorKind::Invariant,
            SheafError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Transient,
        }
    }

    /// Whether a job carrying this error should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Extraction)
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Sheaf operations
pub type Result<T> = std::result::Result<T, SheafError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_never_retryable() {
        let err = SheafError::Validation("bad source".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_extraction_timeout_retryable() {
        let err = SheafError::Extract(crate::extract::ExtractError::Timeout { secs: 30 });
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsupported_mime_is_validation() {
        let err = SheafError::Extract(crate::extract::ExtractError::Unsupported(
            "image/tiff".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled_not_retryable() {
        assert!(!SheafError::Cancelled.is_retryable());
    }
}
