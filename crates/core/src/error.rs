//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid capacity: {0} (must be a positive number of GiB)")]
    InvalidCapacity(u32),

    #[error("unknown format: {0}")]
    UnknownFormat(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
