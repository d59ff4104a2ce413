//! In-memory object-store client.
//!
//! Behaves like a single-node object store: containers must be created
//! before use, etags are hex MD5 of the content, and each put or delete is
//! atomic per key. Nothing survives the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tracing::debug;

use bitstore_common::backend::{BlobMetadata, BlobReader, ObjectStoreClient};
use bitstore_common::error::ObjectStoreError;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

type Container = HashMap<String, StoredBlob>;

/// Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct TransientClient {
    containers: Arc<RwLock<HashMap<String, Container>>>,
}

impl TransientClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs in a container, or `None` if it does not exist.
    pub fn blob_count(&self, container: &str) -> Option<usize> {
        self.containers.read().get(container).map(|c| c.len())
    }
}

pub(crate) fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[async_trait]
impl ObjectStoreClient for TransientClient {
    async fn container_exists(&self, container: &str) -> Result<bool, ObjectStoreError> {
        Ok(self.containers.read().contains_key(container))
    }

    async fn create_container(&self, container: &str) -> Result<(), ObjectStoreError> {
        self.containers
            .write()
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn get_blob(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<BlobReader>, ObjectStoreError> {
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        Ok(blobs.get(key).map(|blob| {
            let reader: BlobReader = Box::pin(std::io::Cursor::new(blob.data.clone()));
            reader
        }))
    }

    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        mut payload: BlobReader,
        length: u64,
    ) -> Result<String, ObjectStoreError> {
        if !self.container_exists(container).await? {
            return Err(ObjectStoreError::ContainerNotFound(container.to_string()));
        }

        let mut data = Vec::with_capacity(length as usize);
        payload.read_to_end(&mut data).await?;
        if data.len() as u64 != length {
            return Err(ObjectStoreError::Malformed(format!(
                "declared length {} but payload held {} bytes",
                length,
                data.len()
            )));
        }

        let etag = md5_hex(&data);
        let blob = StoredBlob {
            data: Bytes::from(data),
            etag: etag.clone(),
            last_modified: Utc::now(),
        };

        // No await while the lock is held.
        let mut containers = self.containers.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        blobs.insert(key.to_string(), blob);

        debug!(container = %container, key = %key, bytes = length, "Transient upload complete");
        Ok(etag)
    }

    async fn blob_metadata(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<BlobMetadata>, ObjectStoreError> {
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| ObjectStoreError::ContainerNotFound(container.to_string()))?;
        Ok(blobs.get(key).map(|blob| BlobMetadata {
            size: blob.data.len() as u64,
            etag: blob.etag.clone(),
            last_modified: blob.last_modified,
        }))
    }

    async fn remove_blob(&self, container: &str, key: &str) -> Result<(), ObjectStoreError> {
        if let Some(blobs) = self.containers.write().get_mut(container) {
            blobs.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_transient_roundtrip() {
        let client = TransientClient::new();
        assert!(!client.container_exists("c").await.unwrap());
        client.create_container("c").await.unwrap();
        client.create_container("c").await.unwrap();
        assert!(client.container_exists("c").await.unwrap());

        let payload: BlobReader = Box::pin(std::io::Cursor::new(b"hello world".to_vec()));
        let etag = client.put_blob("c", "k", payload, 11).await.unwrap();
        assert_eq!(etag, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let meta = client.blob_metadata("c", "k").await.unwrap().unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.etag, etag);

        let data = read_all(client.get_blob("c", "k").await.unwrap().unwrap()).await;
        assert_eq!(data, b"hello world");

        client.remove_blob("c", "k").await.unwrap();
        client.remove_blob("c", "k").await.unwrap();
        assert!(client.get_blob("c", "k").await.unwrap().is_none());
        assert_eq!(client.blob_count("c"), Some(0));
    }

    #[tokio::test]
    async fn test_missing_container() {
        let client = TransientClient::new();
        assert!(matches!(
            client.blob_metadata("nope", "k").await,
            Err(ObjectStoreError::ContainerNotFound(_))
        ));
        let payload: BlobReader = Box::pin(std::io::Cursor::new(Vec::new()));
        assert!(client.put_blob("nope", "k", payload, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let client = TransientClient::new();
        client.create_container("c").await.unwrap();
        let payload: BlobReader = Box::pin(std::io::Cursor::new(b"abc".to_vec()));
        assert!(matches!(
            client.put_blob("c", "k", payload, 5).await,
            Err(ObjectStoreError::Malformed(_))
        ));
        assert_eq!(client.blob_count("c"), Some(0));
    }
}
