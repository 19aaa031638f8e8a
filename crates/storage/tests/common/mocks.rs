use async_trait::async_trait;
use datamold_core::ObjectDescriptor;
use datamold_storage::error::{StorageError, StorageResult};
use datamold_storage::pipe::{ReadHandle, WriteHandle};
use datamold_storage::traits::{ListingPage, ObjectStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Deterministic key for the object at `index`.
#[allow(dead_code)]
pub fn synthetic_key(index: usize) -> String {
    format!("objects/{index:06}")
}

/// Instrumented in-memory backend that serves synthetic listings and counts calls.
///
/// Objects exist only as keys; streaming handles are not supported.
#[allow(dead_code)]
pub struct InstrumentedBackend {
    pub page_size: usize,
    objects: Mutex<Vec<String>>,
    /// Fail the listing call with this zero-based page index.
    fail_page: Option<usize>,
    /// Fail the delete call with this zero-based batch index.
    fail_delete_batch: Option<usize>,
    pub pages_fetched: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
    /// Operation names in call order.
    pub calls: Mutex<Vec<&'static str>>,
}

#[allow(dead_code)]
impl InstrumentedBackend {
    pub fn new(total_objects: usize, page_size: usize) -> Arc<Self> {
        Arc::new(Self::build(total_objects, page_size, None, None))
    }

    pub fn failing_page(total_objects: usize, page_size: usize, page: usize) -> Arc<Self> {
        Arc::new(Self::build(total_objects, page_size, Some(page), None))
    }

    pub fn failing_delete(total_objects: usize, page_size: usize, batch: usize) -> Arc<Self> {
        Arc::new(Self::build(total_objects, page_size, None, Some(batch)))
    }

    fn build(
        total_objects: usize,
        page_size: usize,
        fail_page: Option<usize>,
        fail_delete_batch: Option<usize>,
    ) -> Self {
        Self {
            page_size,
            objects: Mutex::new((0..total_objects).map(synthetic_key).collect()),
            fail_page,
            fail_delete_batch,
            pages_fetched: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn descriptor(key: &str) -> ObjectDescriptor {
        ObjectDescriptor {
            etag: format!("\"{key}\""),
            key: key.to_string(),
            last_modified: OffsetDateTime::UNIX_EPOCH,
            size: 1,
            storage_class: "MOCK".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for InstrumentedBackend {
    async fn create_bucket(&self) -> StorageResult<()> {
        self.record("create_bucket");
        Ok(())
    }

    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        self.record("list_page");
        let page_index = self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        if self.fail_page == Some(page_index) {
            return Err(StorageError::S3("injected listing failure".into()));
        }

        let start = token.map(|t| t.parse::<usize>().unwrap()).unwrap_or(0);
        let objects = self.objects.lock().unwrap();
        let end = (start + self.page_size).min(objects.len());
        let page = objects[start..end]
            .iter()
            .map(|key| Self::descriptor(key))
            .collect();
        let next_token = (end < objects.len()).then(|| end.to_string());

        Ok(ListingPage {
            objects: page,
            next_token,
        })
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        self.record("delete_objects");
        let batch_index = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_batch == Some(batch_index) {
            return Err(StorageError::S3("injected delete failure".into()));
        }
        self.batch_sizes.lock().unwrap().push(keys.len());
        self.objects
            .lock()
            .unwrap()
            .retain(|key| !keys.contains(key));
        Ok(())
    }

    async fn remove_bucket(&self) -> StorageResult<()> {
        self.record("remove_bucket");
        if self.remaining() > 0 {
            return Err(StorageError::BucketConflict("bucket not empty".to_string()));
        }
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<ReadHandle> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn create(&self, key: &str) -> StorageResult<WriteHandle> {
        Err(StorageError::InvalidKey(format!(
            "instrumented backend is read-only: {key}"
        )))
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}
