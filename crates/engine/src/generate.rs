//! Dataset generation.

use crate::aggregate::{AggregateReport, aggregate};
use crate::encoders::{Encoder, encoder_for};
use crate::error::GenerateError;
use crate::pool::run_units;
use datamold_core::config::GenerateConfig;
use datamold_core::{DEFAULT_THREADS, DEFAULT_UNIT_SIZE, Format, artifact_name, total_units};
use datamold_storage::{FilesystemBackend, ObjectStorage};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Generates `capacity × UNIT_DENSITY` artifacts of one format.
#[derive(Clone, Debug)]
pub struct Generator {
    format: Format,
    threads: usize,
    unit_size_bytes: u64,
}

impl Generator {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            threads: DEFAULT_THREADS,
            unit_size_bytes: DEFAULT_UNIT_SIZE,
        }
    }

    pub fn from_config(format: Format, config: &GenerateConfig) -> Self {
        Self::new(format)
            .with_threads(config.threads)
            .with_unit_size(config.unit_size_bytes)
    }

    /// Number of concurrent workers. Values below one are ignored.
    pub fn with_threads(mut self, threads: usize) -> Self {
        if threads >= 1 {
            self.threads = threads;
        }
        self
    }

    /// Target bytes per artifact.
    ///
    /// Zero is accepted: text artifacts come out empty, while formats with
    /// fixed framing (headers, image and archive containers) still write it.
    pub fn with_unit_size(mut self, unit_size_bytes: u64) -> Self {
        self.unit_size_bytes = unit_size_bytes;
        self
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Generate into a local directory, creating it if needed.
    ///
    /// Setup problems (zero capacity, a destination that is not a usable
    /// directory) are reported before any artifact is written.
    pub async fn generate(
        &self,
        destination: &Path,
        capacity: u32,
    ) -> Result<AggregateReport, GenerateError> {
        let total = total_units(capacity)?;
        prepare_destination(destination).await?;

        let store: Arc<dyn ObjectStorage> = Arc::new(FilesystemBackend::new(destination));
        self.run(store, total).await
    }

    /// Generate into any storage backend, creating the bucket if needed.
    pub async fn generate_into(
        &self,
        store: Arc<dyn ObjectStorage>,
        capacity: u32,
    ) -> Result<AggregateReport, GenerateError> {
        let total = total_units(capacity)?;
        store.create_bucket().await?;
        self.run(store, total).await
    }

    #[instrument(skip(self, store), fields(format = %self.format, backend = store.backend_name()))]
    async fn run(
        &self,
        store: Arc<dyn ObjectStorage>,
        total: u64,
    ) -> Result<AggregateReport, GenerateError> {
        let encoder = encoder_for(self.format);
        let unit_size = self.unit_size_bytes;

        info!(
            units = total,
            threads = self.threads,
            unit_size,
            "Starting generation"
        );

        let outcomes = run_units(total, self.threads, move |index| {
            let store = store.clone();
            let encoder = encoder.clone();
            async move {
                write_unit(store.as_ref(), encoder.as_ref(), index, unit_size)
                    .await
                    .map_err(|e| e.in_unit(index))
            }
        });

        let report = aggregate(outcomes).await?;
        info!(units = report.total, "Generation complete");
        Ok(report)
    }
}

async fn prepare_destination(destination: &Path) -> Result<(), GenerateError> {
    tokio::fs::create_dir_all(destination).await.map_err(|e| {
        GenerateError::Setup(format!(
            "cannot create destination {}: {e}",
            destination.display()
        ))
    })?;

    let metadata = tokio::fs::metadata(destination).await.map_err(|e| {
        GenerateError::Setup(format!(
            "cannot inspect destination {}: {e}",
            destination.display()
        ))
    })?;
    if !metadata.is_dir() {
        return Err(GenerateError::Setup(format!(
            "destination {} is not a directory",
            destination.display()
        )));
    }
    Ok(())
}

/// Encode one artifact straight into a storage write handle.
async fn write_unit(
    store: &dyn ObjectStorage,
    encoder: &dyn Encoder,
    index: u64,
    target_bytes: u64,
) -> Result<(), GenerateError> {
    let name = artifact_name(index, encoder.format());
    debug!(index, artifact = %name, "Generating artifact");

    let mut handle = store.create(&name).await?;
    match encoder.encode(index, target_bytes, &mut handle).await {
        Ok(bytes) => {
            handle.close().await?;
            info!(artifact = %name, bytes, "Wrote artifact");
            Ok(())
        }
        Err(encode_err) => {
            // A failed upload breaks the pipe; its own error is the real cause.
            match handle.abort().await {
                Err(storage_err) => Err(storage_err.into()),
                Ok(()) => Err(encode_err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builder_ignores_zero_threads() {
        let generator = Generator::new(Format::Txt).with_threads(0);
        assert_eq!(generator.threads(), DEFAULT_THREADS);
        assert_eq!(generator.unit_size_bytes, DEFAULT_UNIT_SIZE);
        assert_eq!(generator.clone().with_unit_size(0).unit_size_bytes, 0);

        let generator = generator.with_threads(3).with_unit_size(512);
        assert_eq!(generator.threads(), 3);
        assert_eq!(generator.unit_size_bytes, 512);
    }

    #[tokio::test]
    async fn zero_capacity_is_setup_error() {
        let dir = tempdir().unwrap();
        let result = Generator::new(Format::Txt)
            .generate(&dir.path().join("out"), 0)
            .await;

        assert!(matches!(result, Err(GenerateError::Setup(_))));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn file_destination_is_setup_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let result = Generator::new(Format::Csv).generate(&file, 1).await;
        assert!(matches!(result, Err(GenerateError::Setup(_))));
    }

    #[tokio::test]
    async fn zero_unit_size_writes_empty_artifacts() {
        let dir = tempdir().unwrap();
        let report = Generator::new(Format::Txt)
            .with_unit_size(0)
            .generate(dir.path(), 1)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 10);
        for index in 0..10 {
            let path = dir.path().join(artifact_name(index, Format::Txt));
            assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        }
    }

    #[tokio::test]
    async fn generates_ten_artifacts_per_capacity_unit() {
        let dir = tempdir().unwrap();
        let report = Generator::new(Format::Json)
            .with_threads(4)
            .with_unit_size(2048)
            .generate(dir.path(), 1)
            .await
            .unwrap();

        assert_eq!(report.total, 10);
        assert_eq!(report.succeeded, 10);
        for index in 0..10 {
            let path = dir.path().join(format!("artifact_{index}.json"));
            let text = std::fs::read_to_string(&path).unwrap();
            assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());
        }
    }
}
