//! S3-compatible backend: one bucket per instance, uploads via multipart.

use crate::error::{StorageError, StorageResult};
use crate::pipe::{self, ReadHandle, WriteHandle};
use crate::traits::{DEFAULT_PAGE_SIZE, ListingPage, MAX_DELETE_BATCH, ObjectStorage};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use datamold_core::ObjectDescriptor;
use datamold_core::config::Provider;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Region that rejects an explicit location constraint on bucket creation.
const DEFAULT_REGION: &str = "us-east-1";

/// Tags credential-chain failures so they surface as `StorageError::Config`.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "datamold-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "datamold-s3-lazy-credentials-resolve";

/// Default AWS credential chain, built on the first signed request.
///
/// Building it eagerly touches TLS roots, which breaks construction on hosts
/// without them.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

/// Location constraint to send with `CreateBucket`, if any.
///
/// Only AWS takes one, and AWS rejects it for its default region.
fn location_constraint(provider: Provider, region: &str) -> Option<BucketLocationConstraint> {
    match provider {
        Provider::Aws if region != DEFAULT_REGION => Some(BucketLocationConstraint::from(region)),
        _ => None,
    }
}

fn describe(object: &aws_sdk_s3::types::Object) -> ObjectDescriptor {
    let last_modified = object
        .last_modified()
        .and_then(|dt| OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

    ObjectDescriptor {
        etag: object.e_tag().unwrap_or_default().to_string(),
        key: object.key().unwrap_or_default().to_string(),
        last_modified,
        size: object.size().unwrap_or(0),
        storage_class: object
            .storage_class()
            .map(|class| class.as_str().to_string())
            .unwrap_or_default(),
    }
}

/// Bucket on an S3-compatible service.
pub struct S3Backend {
    client: Client,
    provider: Provider,
    bucket: String,
    endpoint: String,
    region: String,
    part_size: usize,
    page_size: usize,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("provider", &self.provider)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services.
    /// * `part_size` - Bytes buffered per multipart part.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        provider: Provider,
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
        part_size: u64,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }
        if part_size < datamold_core::config::MIN_PART_SIZE {
            return Err(StorageError::Config(format!(
                "s3 part_size {part_size} is below the minimum of {} bytes",
                datamold_core::config::MIN_PART_SIZE
            )));
        }
        let part_size = usize::try_from(part_size)
            .map_err(|_| StorageError::Config(format!("s3 part_size {part_size} is too large")))?;

        let resolved_region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "datamold-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = endpoint.as_ref().map(|endpoint_url| {
            // Bare host:port endpoints (e.g. "minio:9000") default to http.
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url.clone()
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // Plain-HTTP endpoints get an HTTP-only client so SDK setup does not
            // depend on native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        Ok(Self {
            client,
            provider,
            bucket: bucket.to_string(),
            endpoint: stored_endpoint,
            region: resolved_region,
            part_size,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the number of keys requested per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ObjectStorage for S3Backend {
    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn create_bucket(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(map_s3_operation_error(err)),
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if let Some(constraint) = location_constraint(self.provider, &self.region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                debug!(bucket = %self.bucket, region = %self.region, "Created bucket");
                Ok(())
            }
            Err(err) => match err.as_service_error() {
                Some(service_err) if service_err.is_bucket_already_owned_by_you() => Ok(()),
                Some(service_err) if service_err.is_bucket_already_exists() => Err(
                    StorageError::BucketConflict(format!(
                        "bucket {} is owned by another account",
                        self.bucket
                    )),
                ),
                _ => Err(map_s3_operation_error(err)),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(i32::try_from(self.page_size).unwrap_or(i32::MAX));
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(map_s3_operation_error)?;

        let objects = output.contents().iter().map(describe).collect();
        let next_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListingPage {
            objects,
            next_token,
        })
    }

    #[instrument(skip(self, keys), fields(backend = "s3", count = keys.len()))]
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::Config(format!(
                "delete batch of {} keys exceeds the limit of {MAX_DELETE_BATCH}",
                keys.len()
            )));
        }

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        if let Some(first) = output.errors().first() {
            return Err(StorageError::S3(
                format!(
                    "{} of {} deletes failed, first {}: {}",
                    output.errors().len(),
                    keys.len(),
                    first.key().unwrap_or_default(),
                    first.message().unwrap_or_default()
                )
                .into(),
            ));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn remove_bucket(&self) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    StorageError::NotFound(format!("bucket {}", self.bucket))
                } else {
                    map_s3_operation_error(err)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open(&self, key: &str) -> StorageResult<ReadHandle> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    StorageError::NotFound(key.to_string())
                } else {
                    map_s3_operation_error(err)
                }
            })?;

        let mut body = output.body.into_async_read();
        Ok(pipe::spawn_reader(key, |mut pipe| async move {
            tokio::io::copy(&mut body, &mut pipe).await?;
            pipe.shutdown().await?;
            Ok(())
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create(&self, key: &str) -> StorageResult<WriteHandle> {
        let upload = S3Upload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            part_size: self.part_size,
        };
        Ok(pipe::spawn_writer(key, |pipe| upload.run(pipe)))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn read_part<R>(source: &mut R, buf: &mut Vec<u8>, part_size: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    let mut limited = source.take(part_size as u64);
    limited.read_to_end(buf).await?;
    Ok(())
}

/// Aborts an unfinished multipart upload when dropped.
///
/// Covers both error returns and cancellation of the upload task.
struct MultipartGuard {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl MultipartGuard {
    async fn abort(mut self) {
        self.armed = false;
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
        {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for MultipartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %self.upload_id, "No runtime to abort multipart upload");
            return;
        };
        let guard = MultipartGuard {
            client: self.client.clone(),
            bucket: std::mem::take(&mut self.bucket),
            key: std::mem::take(&mut self.key),
            upload_id: std::mem::take(&mut self.upload_id),
            armed: false,
        };
        runtime.spawn(guard.abort());
    }
}

/// One streaming upload, buffering a single part at a time.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    part_size: usize,
}

/// Whether a payload whose first part is `first_len` bytes ends within that part.
///
/// Such payloads (including empty ones) go out as one `PutObject`.
fn fits_single_request(first_len: usize, part_size: usize) -> bool {
    first_len < part_size
}

impl S3Upload {
    async fn run<R>(self, mut source: R) -> StorageResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buffer = Vec::with_capacity(self.part_size);
        read_part(&mut source, &mut buffer, self.part_size).await?;

        if fits_single_request(buffer.len(), self.part_size) {
            let bytes = buffer.len();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            debug!(key = %self.key, bytes, "Uploaded object");
            return Ok(());
        }

        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let mut guard = MultipartGuard {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: upload_id.clone(),
            armed: true,
        };

        let mut parts = Vec::new();
        let mut total: u64 = 0;

        // `buffer` already holds a full first part.
        loop {
            let part_number = i32::try_from(parts.len() + 1)
                .map_err(|_| StorageError::Config("too many multipart parts".to_string()))?;
            let part_len = buffer.len();
            total += part_len as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&self.key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(std::mem::take(&mut buffer)))
                .send()
                .await
                .map_err(map_s3_operation_error)?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            if part_len < self.part_size {
                break;
            }
            buffer.reserve(self.part_size);
            read_part(&mut source, &mut buffer, self.part_size).await?;
            if buffer.is_empty() {
                break;
            }
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        guard.disarm();

        debug!(key = %self.key, bytes = total, "Completed multipart upload");
        Ok(())
    }
}
