use async_trait::async_trait;
use datamold_core::ObjectDescriptor;
use datamold_storage::error::{StorageError, StorageResult};
use datamold_storage::pipe::{self, ReadHandle, WriteHandle};
use datamold_storage::traits::{ListingPage, ObjectStorage};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

type Objects = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

/// Tracks concurrent uploads and remembers the highest count seen.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeGuard(Arc<Gauge>);

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory backend with injectable failures and instrumentation.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryBackend {
    objects: Objects,
    fail_writes: HashSet<String>,
    fail_opens: HashSet<String>,
    write_delay: Duration,
    uploads: Arc<Gauge>,
    pub creates: AtomicUsize,
    pub buckets_created: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads of `key` fail inside the transfer task.
    pub fn failing_write(mut self, key: &str) -> Self {
        self.fail_writes.insert(key.to_string());
        self
    }

    /// `open(key)` fails immediately.
    pub fn failing_open(mut self, key: &str) -> Self {
        self.fail_opens.insert(key.to_string());
        self
    }

    /// Hold every upload open for `delay` before it completes.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn peak_uploads(&self) -> usize {
        self.uploads.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    async fn create_bucket(&self) -> StorageResult<()> {
        self.buckets_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_page(&self, _token: Option<String>) -> StorageResult<ListingPage> {
        let objects = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, data)| ObjectDescriptor {
                etag: format!("\"{}\"", data.len()),
                key: key.clone(),
                last_modified: OffsetDateTime::UNIX_EPOCH,
                size: data.len() as i64,
                storage_class: "MEMORY".to_string(),
            })
            .collect();
        Ok(ListingPage {
            objects,
            next_token: None,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn remove_bucket(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<ReadHandle> {
        if self.fail_opens.contains(key) {
            return Err(StorageError::S3(format!("injected open failure: {key}").into()));
        }
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(pipe::spawn_reader(key, |mut pipe| async move {
            pipe.write_all(&data).await?;
            pipe.shutdown().await?;
            Ok(())
        }))
    }

    async fn create(&self, key: &str) -> StorageResult<WriteHandle> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let guard = self.uploads.enter();
        let objects = self.objects.clone();
        let fail = self.fail_writes.contains(key);
        let delay = self.write_delay;
        let key_owned = key.to_string();

        Ok(pipe::spawn_writer(key, |mut pipe| async move {
            let _guard = guard;
            let mut data = Vec::new();
            pipe.read_to_end(&mut data).await?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(StorageError::S3(
                    format!("injected write failure: {key_owned}").into(),
                ));
            }
            objects.lock().unwrap().insert(key_owned, data);
            Ok(())
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
