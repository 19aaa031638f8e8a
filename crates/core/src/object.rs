//! Object descriptors returned by storage listings.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Read-only description of one stored object.
///
/// Only storage backends construct these, from their listing responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Content fingerprint (S3 ETag, or a weak size/mtime tag for local storage).
    pub etag: String,
    /// Object key relative to the bucket root.
    pub key: String,
    /// Last modification time.
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    /// Object size in bytes.
    pub size: i64,
    /// Storage tier reported by the backend.
    pub storage_class: String,
}
