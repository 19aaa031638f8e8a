//! Engine error types.

use datamold_storage::StorageError;
use thiserror::Error;

/// Failure while producing artifact bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoder task failed: {0}")]
    Task(String),
}

/// A job that panicked inside the worker pool.
///
/// Converted into the pool's error type so the panic is reported as that
/// unit's failed outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic {
    pub index: u64,
    pub message: String,
}

/// Dataset generation errors.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Invalid request or destination, reported before any worker starts.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("unit {index} failed: {source}")]
    UnitFailed {
        index: u64,
        #[source]
        source: Box<GenerateError>,
    },

    #[error("unit {index} panicked: {message}")]
    Panicked { index: u64, message: String },
}

impl From<datamold_core::Error> for GenerateError {
    fn from(err: datamold_core::Error) -> Self {
        GenerateError::Setup(err.to_string())
    }
}

impl From<JobPanic> for GenerateError {
    fn from(panic: JobPanic) -> Self {
        GenerateError::Panicked {
            index: panic.index,
            message: panic.message,
        }
    }
}

impl GenerateError {
    /// Attach the failing unit index.
    pub fn in_unit(self, index: u64) -> Self {
        match self {
            err @ (GenerateError::UnitFailed { .. } | GenerateError::Panicked { .. }) => err,
            other => GenerateError::UnitFailed {
                index,
                source: Box::new(other),
            },
        }
    }
}

/// Migration errors raised by the transfer controller.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer of {key} failed: {source}")]
    ObjectFailed {
        key: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error("transfer unit {index} panicked: {message}")]
    Panicked { index: u64, message: String },
}

impl From<JobPanic> for TransferError {
    fn from(panic: JobPanic) -> Self {
        TransferError::Panicked {
            index: panic.index,
            message: panic.message,
        }
    }
}

impl TransferError {
    /// Attach the key being transferred.
    pub fn for_key(self, key: impl Into<String>) -> Self {
        TransferError::ObjectFailed {
            key: key.into(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_unit_wraps_once() {
        let err = GenerateError::Setup("boom".to_string()).in_unit(3);
        assert!(matches!(err, GenerateError::UnitFailed { index: 3, .. }));

        let again = err.in_unit(4);
        assert!(matches!(again, GenerateError::UnitFailed { index: 3, .. }));
        assert_eq!(again.to_string(), "unit 3 failed: setup failed: boom");
    }

    #[test]
    fn panic_converts_to_unit_outcome() {
        let err: GenerateError = JobPanic {
            index: 9,
            message: "index out of bounds".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "unit 9 panicked: index out of bounds");
    }
}
