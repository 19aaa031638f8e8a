//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use crate::pipe::{ReadHandle, WriteHandle};
use async_trait::async_trait;
use datamold_core::ObjectDescriptor;
use tracing::debug;

/// Objects requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Maximum keys per batched delete call (the S3 `DeleteObjects` limit).
pub const MAX_DELETE_BATCH: usize = 1000;

/// A single page of listing results.
#[derive(Clone, Debug, Default)]
pub struct ListingPage {
    /// Objects in this page, in backend order.
    pub objects: Vec<ObjectDescriptor>,

    /// Cursor for the next page. `None` marks the last page.
    pub next_token: Option<String>,
}

/// Capability interface implemented once per storage provider.
///
/// Providers implement the single-call primitives; `object_list` and
/// `delete_bucket` build the multi-call semantics on top of them so every
/// backend paginates and empties buckets the same way.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Create the bucket. Succeeds if it already exists and belongs to the caller.
    async fn create_bucket(&self) -> StorageResult<()>;

    /// Fetch one listing page starting at `token` (`None` for the first page).
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage>;

    /// Delete the given keys in one batched call.
    ///
    /// Callers pass at most [`MAX_DELETE_BATCH`] keys.
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()>;

    /// Delete the bucket itself. The bucket must already be empty.
    async fn remove_bucket(&self) -> StorageResult<()>;

    /// Open an object for streaming reads.
    async fn open(&self, key: &str) -> StorageResult<ReadHandle>;

    /// Create (or overwrite) an object through a streaming write handle.
    ///
    /// The object is published only when the handle is closed successfully.
    async fn create(&self, key: &str) -> StorageResult<WriteHandle>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// List every object in the bucket, following continuation tokens to the end.
    ///
    /// Objects are returned in the order the backend supplies them, page by
    /// page. If a page fails, the error is [`StorageError::IncompleteListing`]
    /// carrying everything listed before the failure.
    async fn object_list(&self) -> StorageResult<Vec<ObjectDescriptor>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = match self.list_page(token.take()).await {
                Ok(page) => page,
                Err(err) => {
                    return Err(StorageError::IncompleteListing {
                        objects,
                        source: Box::new(err),
                    });
                }
            };
            objects.extend(page.objects);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(
            backend = self.backend_name(),
            count = objects.len(),
            "Listed bucket"
        );
        Ok(objects)
    }

    /// Empty the bucket in batches of [`MAX_DELETE_BATCH`] keys, then delete it.
    ///
    /// Not retried: if a batch fails the bucket may be left partially emptied.
    async fn delete_bucket(&self) -> StorageResult<()> {
        let objects = self.object_list().await?;
        let keys: Vec<String> = objects.into_iter().map(|object| object.key).collect();

        for batch in keys.chunks(MAX_DELETE_BATCH) {
            self.delete_objects(batch).await?;
            debug!(
                backend = self.backend_name(),
                deleted = batch.len(),
                "Deleted object batch"
            );
        }

        self.remove_bucket().await
    }
}
