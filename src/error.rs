//! Error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReidError>;

#[derive(Debug, Error)]
pub enum ReidError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Detection source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid configuration value.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector has zero norm")]
    ZeroNorm,

    #[error("vector contains non-finite values")]
    NonFinite,

    #[error("index is full ({capacity} entries, none inactive)")]
    CapacityExhausted { capacity: usize },

    #[error("index unavailable: {0}")]
    Unavailable(String),
}

/// The embedding extractor could not produce a vector for a crop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("crop is empty")]
    EmptyCrop,

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

impl PersistenceError {
    /// Rejected writes will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}
