//! Object storage abstraction and backends for datamold.
//!
//! This crate provides:
//! - A streaming pipe adapter turning background transfers into `AsyncRead`/`AsyncWrite` handles
//! - The `ObjectStorage` capability trait with shared listing and bucket-teardown semantics
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod pipe;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use pipe::{PIPE_CAPACITY, ReadHandle, WriteHandle};
pub use traits::{DEFAULT_PAGE_SIZE, ListingPage, MAX_DELETE_BATCH, ObjectStorage};

use datamold_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStorage>> {
    config.validate()?;

    match config {
        StorageConfig::Filesystem { path } => Ok(Arc::new(FilesystemBackend::new(path))),
        StorageConfig::S3 {
            provider,
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
            part_size,
        } => {
            let backend = S3Backend::new(
                *provider,
                bucket,
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
                *part_size,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
