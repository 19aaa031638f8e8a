//! Storage error types.

use datamold_core::ObjectDescriptor;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bucket conflict: {0}")]
    BucketConflict(String),

    #[error("listing interrupted after {} objects: {source}", .objects.len())]
    IncompleteListing {
        /// Objects listed before the failing page.
        objects: Vec<ObjectDescriptor>,
        #[source]
        source: Box<StorageError>,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer task failed: {0}")]
    TaskFailed(String),
}

impl From<datamold_core::Error> for StorageError {
    fn from(err: datamold_core::Error) -> Self {
        StorageError::Config(err.to_string())
    }
}

impl StorageError {
    /// Convert into an `std::io::Error` so it can cross an `AsyncRead`/`AsyncWrite` boundary.
    pub fn into_io(self) -> std::io::Error {
        match self {
            StorageError::Io(err) => err,
            StorageError::NotFound(key) => {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("object not found: {key}"))
            }
            other => std::io::Error::other(other),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
