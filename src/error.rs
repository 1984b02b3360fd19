use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the grounded crate
#[derive(Error, Debug)]
pub enum GroundedError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

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

    /// Corpus ingestion errors
    #[error("Ingestion error: {0}")]
    Ingest(#[from] crate::corpus::IngestError),

    /// A query failed at one of its stages
    #[error(transparent)]
    Answer(#[from] crate::orchestrator::AnswerError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
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

/// Failure taxonomy shared by every stage of a query.
///
/// Per-signal and per-provider kinds are normally absorbed by the stage that
/// sees them; only the query-fatal kinds reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AdapterUnavailable,
    RetrievalExhausted,
    RerankUnavailable,
    AllProvidersUnavailable,
    Overloaded,
    Timeout,
    InvalidQuery,
}

impl ErrorKind {
    /// Whether the failure only degrades the query instead of ending it
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::AdapterUnavailable | Self::RerankUnavailable)
    }
}

/// Result type for grounded operations
pub type Result<T> = std::result::Result<T, GroundedError>;
