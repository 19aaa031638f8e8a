//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest multipart part size S3 accepts for non-final parts (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Generation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Number of concurrent generation workers.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Target bytes per generation unit. Zero yields empty text artifacts.
    #[serde(default = "default_unit_size_bytes")]
    pub unit_size_bytes: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            unit_size_bytes: default_unit_size_bytes(),
        }
    }
}

/// Transfer (migration) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of concurrent transfer workers.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

/// Object-storage provider flavour.
///
/// Only affects bucket-creation conventions; all providers speak the S3 API.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Amazon S3. Bucket creation carries a location constraint.
    #[default]
    Aws,
    /// Naver Cloud Platform object storage.
    Ncp,
    /// Generic S3-compatible service (MinIO, Ceph RGW, ...).
    Compatible,
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory acting as the bucket.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Provider flavour.
        #[serde(default)]
        provider: Provider,
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// Region.
        region: Option<String>,
        /// Access key ID. Falls back to the ambient AWS credential chain if unset.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the ambient AWS credential chain if unset.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Multipart part size in bytes.
        #[serde(default = "default_part_size")]
        part_size: u64,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/bucket"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                part_size,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err(Error::Config("s3 bucket name must not be empty".to_string()));
                }
                if access_key_id.is_some() != secret_access_key.is_some() {
                    return Err(Error::Config(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ));
                }
                if *part_size < MIN_PART_SIZE {
                    return Err(Error::Config(format!(
                        "s3 part_size {part_size} is below the minimum of {MIN_PART_SIZE} bytes"
                    )));
                }
                Ok(())
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "filesystem storage path must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation settings.
    #[serde(default)]
    pub generate: GenerateConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Storage backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()
    }
}

fn default_threads() -> usize {
    crate::DEFAULT_THREADS
}

fn default_unit_size_bytes() -> u64 {
    crate::DEFAULT_UNIT_SIZE
}

fn default_part_size() -> u64 {
    16 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::{Format, Toml};

    #[test]
    fn defaults_use_ten_workers() {
        let config = AppConfig::default();
        assert_eq!(config.generate.threads, 10);
        assert_eq!(config.transfer.threads, 10);
        assert_eq!(config.generate.unit_size_bytes, crate::DEFAULT_UNIT_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn s3_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            provider: Provider::Aws,
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
            part_size: default_part_size(),
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn s3_config_rejects_small_parts() {
        let config = StorageConfig::S3 {
            provider: Provider::Compatible,
            bucket: "bucket".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
            part_size: 1024,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("part_size"));
    }

    #[test]
    fn loads_tagged_storage_from_toml() {
        let toml = r#"
            [generate]
            threads = 4
            unit_size_bytes = 2048

            [storage]
            type = "s3"
            provider = "compatible"
            bucket = "datasets"
            endpoint = "minio:9000"
            force_path_style = true
        "#;

        let config: AppConfig = Figment::new().merge(Toml::string(toml)).extract().unwrap();
        assert_eq!(config.generate.threads, 4);
        assert_eq!(config.generate.unit_size_bytes, 2048);
        assert_eq!(config.transfer.threads, 10);
        match config.storage {
            StorageConfig::S3 {
                provider,
                bucket,
                force_path_style,
                part_size,
                ..
            } => {
                assert_eq!(provider, Provider::Compatible);
                assert_eq!(bucket, "datasets");
                assert!(force_path_style);
                assert_eq!(part_size, default_part_size());
            }
            other => panic!("unexpected storage config: {other:?}"),
        }
    }
}
