//! Error types for the datacube indexing tools.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using DcError.
pub type DcResult<T> = Result<T, DcError>;

/// Primary error type for indexing operations.
#[derive(Debug, Error)]
pub enum DcError {
    // === Document Errors ===
    #[error("No usable URI found in metadata document")]
    MissingUri,

    #[error("Invalid dataset document: {0}")]
    InvalidDocument(String),

    #[error("STAC transform failed: {0}")]
    TransformError(String),

    // === Catalog Errors ===
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(Uuid),

    #[error("Dataset already indexed: {0}")]
    DuplicateDataset(Uuid),

    #[error("Missing lineage dataset: {0}")]
    MissingLineage(Uuid),

    #[error("Unsafe change to dataset at '{0}'")]
    UnsafeChange(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // === Infrastructure Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

// Conversion from common error types
impl From<std::io::Error> for DcError {
    fn from(err: std::io::Error) -> Self {
        DcError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for DcError {
    fn from(err: serde_json::Error) -> Self {
        DcError::InvalidDocument(format!("JSON error: {}", err))
    }
}
