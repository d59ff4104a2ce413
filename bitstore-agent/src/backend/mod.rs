pub mod cloud;
pub mod directory;
pub mod s3;
pub mod transient;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use bitstore_common::backend::{BitStoreService, ObjectStoreClient};
use bitstore_common::bitstream::{AttributeKey, AttributeValue, Attributes, CHECKSUM_ALGORITHM};
use bitstore_common::error::{BitStoreError, ObjectStoreError, Operation};

use self::cloud::CloudBitStore;
use self::directory::DirectoryBitStore;
use self::s3::{S3Client, S3Config};
use self::transient::TransientClient;
use crate::config::BitStoreConfig;

/// Construct a bitstream service from configuration. The service still
/// needs `init` before use.
pub fn from_config(config: BitStoreConfig) -> anyhow::Result<Box<dyn BitStoreService>> {
    match config.backend.as_str() {
        "directory" => {
            let path = config
                .directory
                .clone()
                .ok_or_else(|| anyhow::anyhow!("directory backend requires a `directory` path"))?;
            Ok(Box::new(DirectoryBitStore::new(path)))
        }
        _ => Ok(Box::new(CloudBitStore::new(config))),
    }
}

/// Build the object-store client named by `config.backend`.
pub fn connect(config: &BitStoreConfig) -> Result<Arc<dyn ObjectStoreClient>, ObjectStoreError> {
    match config.backend.as_str() {
        "s3" | "aws-s3" | "b2" | "minio" => Ok(Arc::new(S3Client::new(S3Config {
            endpoint: config.endpoint.clone(),
            region: config.region().to_string(),
            access_key_id: config.access_key.clone(),
            secret_access_key: config.secret_key.clone(),
        })?)),
        "transient" => Ok(Arc::new(TransientClient::new())),
        other => Err(ObjectStoreError::UnsupportedBackend(other.to_string())),
    }
}

/// Wrap a failure into the uniform service error and log it once.
pub(crate) fn fail(
    operation: Operation,
    key: &str,
    source: impl Into<ObjectStoreError>,
) -> BitStoreError {
    let err = BitStoreError::io(operation, key, source);
    let BitStoreError::Io { source, .. } = &err;
    error!(operation = %operation, key = %key, error = %source, "Bitstore operation failed");
    err
}

/// Fill in only the attributes the caller asked for. A checksum is always
/// reported together with its algorithm.
pub(crate) fn select_attributes(
    requested: &[AttributeKey],
    size: u64,
    checksum: Option<&str>,
    modified: DateTime<Utc>,
) -> Attributes {
    let mut attrs = Attributes::new();
    for key in requested {
        match key {
            AttributeKey::SizeBytes => {
                attrs.insert(AttributeKey::SizeBytes, AttributeValue::Size(size));
            }
            AttributeKey::Checksum => {
                if let Some(checksum) = checksum {
                    attrs.insert(AttributeKey::Checksum, AttributeValue::Text(checksum.to_string()));
                    attrs.insert(
                        AttributeKey::ChecksumAlgorithm,
                        AttributeValue::Text(CHECKSUM_ALGORITHM.to_string()),
                    );
                }
            }
            AttributeKey::ChecksumAlgorithm => {
                attrs.insert(
                    AttributeKey::ChecksumAlgorithm,
                    AttributeValue::Text(CHECKSUM_ALGORITHM.to_string()),
                );
            }
            AttributeKey::Modified => {
                attrs.insert(
                    AttributeKey::Modified,
                    AttributeValue::Text(modified.timestamp_millis().to_string()),
                );
            }
        }
    }
    attrs
}
