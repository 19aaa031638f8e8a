//! Local filesystem storage backend.
//!
//! A root directory plays the role of the bucket and keys are `/`-separated
//! paths below it.

use crate::error::{StorageError, StorageResult};
use crate::pipe::{self, ReadHandle, WriteHandle};
use crate::traits::{DEFAULT_PAGE_SIZE, ListingPage, ObjectStorage};
use async_trait::async_trait;
use datamold_core::ObjectDescriptor;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Marker embedded in in-progress upload file names; such files are never listed.
const TEMP_MARKER: &str = ".datamold-tmp.";

/// Storage class reported for local objects.
const LOCAL_STORAGE_CLASS: &str = "LOCAL";

/// Local filesystem object store.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
    page_size: usize,
}

impl FilesystemBackend {
    /// Create a backend rooted at `root`. Nothing is created on disk until
    /// [`ObjectStorage::create_bucket`] or the first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the number of objects per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a key, with path traversal protection.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    async fn ensure_root(&self) -> StorageResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::BucketConflict(format!(
                "{} exists and is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(
                format!("bucket {}", self.root.display()),
            )),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Key and path of every stored object, sorted by key. No per-file stat.
    async fn walk_keys(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        self.ensure_root().await?;

        let mut results = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                // file_type() does not follow symlinks; links are skipped so
                // listings never leave the root.
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && !entry.file_name().to_string_lossy().contains(TEMP_MARKER)
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    results.push((relative_key(rel), path));
                }
            }
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    /// Descriptors for `entries`, skipping files removed since the walk.
    async fn describe_all(entries: &[(String, PathBuf)]) -> StorageResult<Vec<ObjectDescriptor>> {
        let mut objects = Vec::with_capacity(entries.len());
        for (key, path) in entries {
            match fs::symlink_metadata(path).await {
                Ok(metadata) => objects.push(describe(key.clone(), &metadata)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(objects)
    }
}

fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn describe(key: String, metadata: &std::fs::Metadata) -> ObjectDescriptor {
    let last_modified = metadata
        .modified()
        .map(OffsetDateTime::from)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let size = metadata.len();
    let mtime_nanos = last_modified.unix_timestamp_nanos();

    ObjectDescriptor {
        etag: format!("W/\"{size:x}-{mtime_nanos:x}\""),
        key,
        last_modified,
        size: i64::try_from(size).unwrap_or(i64::MAX),
        storage_class: LOCAL_STORAGE_CLASS.to_string(),
    }
}

/// Synchronous key validation.
///
/// Rejects keys that are absolute, contain `..`, or resolve through a
/// symlink to a location outside the root.
fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!("invalid key: {key:?}")));
    }
    if key.contains(TEMP_MARKER) {
        return Err(StorageError::InvalidKey(format!(
            "key uses reserved marker: {key}"
        )));
    }
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }
    }

    let path = root.join(key);
    let Ok(root_canonical) = root.canonicalize() else {
        // Root not created yet: nothing below it can be a symlink.
        return Ok(path);
    };

    // Nearest existing ancestor (or the path itself) must resolve inside the root.
    let mut probe = Some(path.as_path());
    while let Some(candidate) = probe {
        match std::fs::symlink_metadata(candidate) {
            Ok(_) => {
                let canonical = candidate.canonicalize().map_err(|_| {
                    StorageError::InvalidKey(format!("symlink target missing or invalid: {key}"))
                })?;
                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                probe = candidate.parent();
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
    }

    Ok(path)
}

/// Removes an in-progress upload file unless the upload is published.
struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[async_trait]
impl ObjectStorage for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem", root = %self.root.display()))]
    async fn create_bucket(&self) -> StorageResult<()> {
        match self.ensure_root().await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => {
                fs::create_dir_all(&self.root).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        let all = self.walk_keys().await?;
        let start = match &token {
            Some(after) => all.partition_point(|(key, _)| key.as_str() <= after.as_str()),
            None => 0,
        };
        let end = (start + self.page_size).min(all.len());
        let next_token = if end < all.len() {
            Some(all[end - 1].0.clone())
        } else {
            None
        };
        // Only the page itself is stat'ed.
        let objects = Self::describe_all(&all[start..end]).await?;

        Ok(ListingPage {
            objects,
            next_token,
        })
    }

    #[instrument(skip(self, keys), fields(backend = "filesystem", count = keys.len()))]
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            let path = self.key_path(key).await?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                // Deleting a missing key is not an error, as with S3.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem", root = %self.root.display()))]
    async fn remove_bucket(&self) -> StorageResult<()> {
        let remaining = self.walk_keys().await?;
        if !remaining.is_empty() {
            return Err(StorageError::BucketConflict(format!(
                "bucket {} still holds {} objects",
                self.root.display(),
                remaining.len()
            )));
        }
        fs::remove_dir_all(&self.root).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn open(&self, key: &str) -> StorageResult<ReadHandle> {
        let path = self.key_path(key).await?;
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(pipe::spawn_reader(key, |mut pipe| async move {
            tokio::io::copy(&mut file, &mut pipe).await?;
            pipe.shutdown().await?;
            Ok(())
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create(&self, key: &str) -> StorageResult<WriteHandle> {
        let path = self.key_path(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers of one key never share a file.
        let temp_path = path.with_file_name(format!(
            "{}{}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TEMP_MARKER,
            Uuid::new_v4()
        ));
        let mut file = fs::File::create(&temp_path).await?;
        let mut guard = TempFileGuard::new(temp_path.clone());

        Ok(pipe::spawn_writer(key, |mut pipe| async move {
            tokio::io::copy(&mut pipe, &mut file).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await?;
            guard.disarm();
            Ok(())
        }))
    }

    /// Single walk for the whole bucket instead of one per page.
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn object_list(&self) -> StorageResult<Vec<ObjectDescriptor>> {
        let listed = match self.walk_keys().await {
            Ok(entries) => Self::describe_all(&entries).await,
            Err(err) => Err(err),
        };
        listed.map_err(|err| StorageError::IncompleteListing {
            objects: Vec::new(),
            source: Box::new(err),
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
