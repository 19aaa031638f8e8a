//! Transfer controller: bucket operations and bulk migrations over one backend.

use crate::aggregate::{AggregateReport, drain};
use crate::error::TransferError;
use crate::pool::{Outcome, run_units};
use datamold_core::{DEFAULT_THREADS, ObjectDescriptor};
use datamold_storage::{ObjectStorage, ReadHandle, StorageResult, WriteHandle};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{Instrument, Span};

/// Emit an event inside the controller's span, or nothing when logging is off.
macro_rules! emit {
    ($logger:expr, $level:ident, $($arg:tt)+) => {
        if let Some(span) = $logger.as_ref() {
            let _entered = span.enter();
            tracing::$level!($($arg)+);
        }
    };
}

/// Orchestrates transfers against one storage backend.
///
/// Bucket operations are forwarded to the backend. Migrations fan out over a
/// worker pool and are fail-complete: every object is attempted and the
/// first failure is returned.
pub struct TransferController {
    store: Arc<dyn ObjectStorage>,
    threads: usize,
    logger: Option<Span>,
}

impl std::fmt::Debug for TransferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferController")
            .field("backend", &self.store.backend_name())
            .field("threads", &self.threads)
            .field("logging", &self.logger.is_some())
            .finish()
    }
}

impl TransferController {
    /// Controller over `store` with the default worker count and no logging.
    pub fn new(store: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            threads: DEFAULT_THREADS,
            logger: None,
        }
    }

    /// `info`-level span named after the backend, for [`with_logger`](Self::with_logger).
    pub fn backend_span(&self) -> Span {
        tracing::info_span!("transfer", backend = self.store.backend_name())
    }

    /// Number of concurrent transfer workers. Values below one are ignored.
    pub fn with_threads(mut self, threads: usize) -> Self {
        if threads >= 1 {
            self.threads = threads;
        }
        self
    }

    /// Span that controller events are emitted in. `None`, the default,
    /// disables logging.
    pub fn with_logger(mut self, logger: Option<Span>) -> Self {
        self.logger = logger;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn store(&self) -> &Arc<dyn ObjectStorage> {
        &self.store
    }

    fn report<T>(&self, operation: &'static str, result: StorageResult<T>) -> StorageResult<T> {
        match &result {
            Ok(_) => emit!(self.logger, info, operation, "Operation succeeded"),
            Err(err) => emit!(self.logger, error, operation, error = %err, "Operation failed"),
        }
        result
    }

    pub async fn create_bucket(&self) -> StorageResult<()> {
        self.report("create_bucket", self.store.create_bucket().await)
    }

    pub async fn delete_bucket(&self) -> StorageResult<()> {
        self.report("delete_bucket", self.store.delete_bucket().await)
    }

    pub async fn object_list(&self) -> StorageResult<Vec<ObjectDescriptor>> {
        self.report("object_list", self.store.object_list().await)
    }

    pub async fn open(&self, key: &str) -> StorageResult<ReadHandle> {
        self.report("open", self.store.open(key).await)
    }

    pub async fn create(&self, key: &str) -> StorageResult<WriteHandle> {
        self.report("create", self.store.create(key).await)
    }

    async fn collect(
        &self,
        operation: &'static str,
        outcomes: mpsc::Receiver<Outcome<TransferError>>,
    ) -> Result<AggregateReport, TransferError> {
        let result = match &self.logger {
            Some(span) => drain(outcomes, true).instrument(span.clone()).await,
            None => drain(outcomes, false).await,
        };
        match &result {
            Ok(report) => emit!(
                self.logger,
                info,
                operation,
                objects = report.total,
                "Migration complete"
            ),
            Err(err) => emit!(self.logger, error, operation, error = %err, "Migration failed"),
        }
        result
    }

    /// Upload every regular file below `local_dir`, keyed by relative path.
    pub async fn put_dir(&self, local_dir: &Path) -> Result<AggregateReport, TransferError> {
        let files = Arc::new(walk_local(local_dir).await?);
        emit!(self.logger, info, files = files.len(), dir = %local_dir.display(), "Uploading directory");

        let store = self.store.clone();
        let outcomes = run_units(files.len() as u64, self.threads, move |index| {
            let store = store.clone();
            let files = files.clone();
            async move {
                let (key, path) = &files[index as usize];
                upload_file(store.as_ref(), path, key)
                    .await
                    .map_err(|e| e.for_key(key.clone()))
            }
        });

        self.collect("put_dir", outcomes).await
    }

    /// Download every object into `local_dir/<key>`.
    pub async fn get_dir(&self, local_dir: &Path) -> Result<AggregateReport, TransferError> {
        tokio::fs::create_dir_all(local_dir).await.map_err(|e| {
            TransferError::Setup(format!("cannot create {}: {e}", local_dir.display()))
        })?;
        let keys = Arc::new(self.listed_keys().await?);
        emit!(self.logger, info, objects = keys.len(), dir = %local_dir.display(), "Downloading bucket");

        let store = self.store.clone();
        let root = Arc::new(local_dir.to_path_buf());
        let outcomes = run_units(keys.len() as u64, self.threads, move |index| {
            let store = store.clone();
            let keys = keys.clone();
            let root = root.clone();
            async move {
                let key = &keys[index as usize];
                download_object(store.as_ref(), key, &root)
                    .await
                    .map_err(|e| e.for_key(key.clone()))
            }
        });

        self.collect("get_dir", outcomes).await
    }

    /// Stream every object into `other`'s backend under the same key.
    pub async fn copy_to(
        &self,
        other: &TransferController,
    ) -> Result<AggregateReport, TransferError> {
        other.store.create_bucket().await?;
        let keys = Arc::new(self.listed_keys().await?);
        emit!(
            self.logger,
            info,
            objects = keys.len(),
            target = other.store.backend_name(),
            "Copying bucket"
        );

        let source = self.store.clone();
        let target = other.store.clone();
        let outcomes = run_units(keys.len() as u64, self.threads, move |index| {
            let source = source.clone();
            let target = target.clone();
            let keys = keys.clone();
            async move {
                let key = &keys[index as usize];
                copy_object(source.as_ref(), target.as_ref(), key)
                    .await
                    .map_err(|e| e.for_key(key.clone()))
            }
        });

        self.collect("copy_to", outcomes).await
    }

    async fn listed_keys(&self) -> Result<Vec<String>, TransferError> {
        let objects = self.object_list().await?;
        Ok(objects.into_iter().map(|object| object.key).collect())
    }
}

/// Every regular file below `root` as `(key, path)`, sorted by key.
async fn walk_local(root: &Path) -> Result<Vec<(String, PathBuf)>, TransferError> {
    let metadata = tokio::fs::metadata(root)
        .await
        .map_err(|e| TransferError::Setup(format!("cannot read {}: {e}", root.display())))?;
    if !metadata.is_dir() {
        return Err(TransferError::Setup(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file()
                && let Ok(rel) = path.strip_prefix(root)
            {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((key, path));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Local destination for `key`, refusing keys that would leave `root`.
fn local_path(root: &Path, key: &str) -> Result<PathBuf, TransferError> {
    let rel = Path::new(key);
    if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(TransferError::Setup(format!(
            "object key {key:?} cannot be stored locally"
        )));
    }
    Ok(root.join(rel))
}

/// Finish a write after `copy_result`: close on success, abort on failure.
///
/// On failure the upload's own error wins, since it usually caused the copy
/// to fail.
async fn settle(
    mut writer: WriteHandle,
    copy_result: std::io::Result<u64>,
) -> Result<u64, TransferError> {
    match copy_result {
        Ok(bytes) => {
            writer.close().await?;
            Ok(bytes)
        }
        Err(copy_err) => match writer.abort().await {
            Err(storage_err) => Err(storage_err.into()),
            Ok(()) => Err(copy_err.into()),
        },
    }
}

async fn upload_file(
    store: &dyn ObjectStorage,
    path: &Path,
    key: &str,
) -> Result<(), TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut writer = store.create(key).await?;
    let copied = tokio::io::copy(&mut file, &mut writer).await;
    let bytes = settle(writer, copied).await?;
    tracing::debug!(key, bytes, "Uploaded object");
    Ok(())
}

async fn download_object(
    store: &dyn ObjectStorage,
    key: &str,
    root: &Path,
) -> Result<(), TransferError> {
    let path = local_path(root, key)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut reader = store.open(key).await?;
    let mut file = tokio::fs::File::create(&path).await?;
    let copied = tokio::io::copy(&mut reader, &mut file).await;
    reader.close().await?;
    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(err) => {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err.into());
        }
    };
    file.flush().await?;
    tracing::debug!(key, bytes, "Downloaded object");
    Ok(())
}

async fn copy_object(
    source: &dyn ObjectStorage,
    target: &dyn ObjectStorage,
    key: &str,
) -> Result<(), TransferError> {
    let mut reader = source.open(key).await?;
    let mut writer = target.create(key).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await;
    reader.close().await?;
    let bytes = settle(writer, copied).await?;
    tracing::debug!(key, bytes, "Copied object");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamold_storage::FilesystemBackend;
    use tempfile::tempdir;

    #[test]
    fn local_path_rejects_escaping_keys() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            local_path(root, "a/b.txt").unwrap(),
            PathBuf::from("/tmp/out/a/b.txt")
        );
        for key in ["../x", "/etc/passwd", "a/../../b", ""] {
            assert!(local_path(root, key).is_err(), "{key:?}");
        }
    }

    #[test]
    fn with_threads_ignores_zero() {
        let dir = tempdir().unwrap();
        let controller = TransferController::new(Arc::new(FilesystemBackend::new(dir.path())));
        assert_eq!(controller.threads(), DEFAULT_THREADS);
        assert_eq!(controller.with_threads(0).threads(), DEFAULT_THREADS);
    }

    #[test]
    fn logging_is_off_until_a_span_is_attached() {
        let dir = tempdir().unwrap();
        let controller = TransferController::new(Arc::new(FilesystemBackend::new(dir.path())));
        assert!(controller.logger.is_none());

        let span = controller.backend_span();
        let controller = controller.with_logger(Some(span));
        assert!(controller.logger.is_some());
        assert!(controller.with_logger(None).logger.is_none());
    }

    #[tokio::test]
    async fn walk_local_lists_nested_files_sorted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/c")).unwrap();
        std::fs::write(dir.path().join("z.txt"), b"z").unwrap();
        std::fs::write(dir.path().join("b/c/d.txt"), b"d").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let keys: Vec<String> = walk_local(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["a.txt", "b/c/d.txt", "z.txt"]);
    }

    #[tokio::test]
    async fn put_dir_requires_directory() {
        let dir = tempdir().unwrap();
        let controller = TransferController::new(Arc::new(FilesystemBackend::new(dir.path())));
        let result = controller.put_dir(&dir.path().join("missing")).await;
        assert!(matches!(result, Err(TransferError::Setup(_))));
    }
}
