//! Object-store-backed bitstream service.
//!
//! One `CloudBitStore` is bound to one container for its lifetime. `init`
//! connects the client and provisions the container; after that the service
//! is read-only state and can be shared across tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use bitstore_common::backend::{full_key, BitStoreService, BlobReader, ObjectStoreClient};
use bitstore_common::bitstream::{AttributeKey, Attributes, Bitstream};
use bitstore_common::error::{BitStoreError, ObjectStoreError, Operation};

use super::{connect, fail, select_attributes};
use crate::config::BitStoreConfig;
use crate::staging::StagingArea;

pub struct CloudBitStore {
    config: BitStoreConfig,
    staging: StagingArea,
    client: Option<Arc<dyn ObjectStoreClient>>,
    container: Option<String>,
}

impl CloudBitStore {
    /// The client is built from `config.backend` during `init`.
    pub fn new(config: BitStoreConfig) -> Self {
        let staging = config
            .staging_dir
            .clone()
            .map(StagingArea::new)
            .unwrap_or_else(StagingArea::system);
        Self {
            config,
            staging,
            client: None,
            container: None,
        }
    }

    /// Use an already-constructed client instead of connecting from config.
    pub fn with_client(config: BitStoreConfig, client: Arc<dyn ObjectStoreClient>) -> Self {
        let mut store = Self::new(config);
        store.client = Some(client);
        store
    }

    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = staging;
        self
    }

    /// The container in use. `None` until `init` has succeeded.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn full_key(&self, internal_id: &str) -> String {
        full_key(self.config.subfolder.as_deref(), internal_id)
    }

    fn connected(
        &self,
        operation: Operation,
        key: &str,
    ) -> Result<(&dyn ObjectStoreClient, &str), BitStoreError> {
        match (&self.client, &self.container) {
            (Some(client), Some(container)) => Ok((client.as_ref(), container.as_str())),
            _ => Err(fail(operation, key, ObjectStoreError::NotInitialized)),
        }
    }
}

#[async_trait]
impl BitStoreService for CloudBitStore {
    async fn init(&mut self) -> Result<(), BitStoreError> {
        if !self.config.has_credentials() {
            warn!("Empty access or secret key");
        }
        if self.config.backend.trim().is_empty() {
            warn!("Backend identifier is not configured");
        }

        let container = self.config.resolve_container();
        let client = match &self.client {
            Some(client) => client.clone(),
            None => connect(&self.config).map_err(|e| fail(Operation::Init, &container, e))?,
        };

        let exists = client
            .container_exists(&container)
            .await
            .map_err(|e| fail(Operation::Init, &container, e))?;
        if !exists {
            client
                .create_container(&container)
                .await
                .map_err(|e| fail(Operation::Init, &container, e))?;
            info!(container = %container, "Creating new container");
        }

        info!(
            container = %container,
            backend = %self.config.backend,
            subfolder = self.config.subfolder.as_deref().unwrap_or(""),
            "Object store bitstore ready"
        );
        self.client = Some(client);
        self.container = Some(container);
        Ok(())
    }

    async fn get(&self, bitstream: &Bitstream) -> Result<Option<BlobReader>, BitStoreError> {
        let key = self.full_key(&bitstream.internal_id);
        let (client, container) = self.connected(Operation::Get, &key)?;
        client
            .get_blob(container, &key)
            .await
            .map_err(|e| fail(Operation::Get, &key, e))
    }

    async fn put(
        &self,
        bitstream: &mut Bitstream,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), BitStoreError> {
        let key = self.full_key(&bitstream.internal_id);
        let (client, container) = self.connected(Operation::Put, &key)?;

        // Dropping `staged` on any early return removes the staging file.
        let staged = self
            .staging
            .stage(&bitstream.internal_id, input)
            .await
            .map_err(|e| fail(Operation::Put, &key, e))?;
        let length = staged.len();
        let payload: BlobReader = Box::pin(
            staged
                .open()
                .await
                .map_err(|e| fail(Operation::Put, &key, e))?,
        );

        let etag = client
            .put_blob(container, &key, payload, length)
            .await
            .map_err(|e| fail(Operation::Put, &key, e))?;
        // The object is stored; `close` already warns if the staging file lingers.
        if staged.close().is_err() {
            debug!(key = %key, "Staging file left behind after upload");
        }

        bitstream.record_stored(length, etag);
        debug!(
            key = %key,
            bytes = length,
            checksum = bitstream.checksum.as_deref().unwrap_or(""),
            "Stored bitstream"
        );
        Ok(())
    }

    async fn about(
        &self,
        bitstream: &Bitstream,
        requested: &[AttributeKey],
    ) -> Result<Option<Attributes>, BitStoreError> {
        let key = self.full_key(&bitstream.internal_id);
        let (client, container) = self.connected(Operation::About, &key)?;

        let meta = match client.blob_metadata(container, &key).await {
            Ok(Some(meta)) => meta,
            Ok(None) | Err(ObjectStoreError::ContainerNotFound(_)) => return Ok(None),
            Err(e) => return Err(fail(Operation::About, &key, e)),
        };
        Ok(Some(select_attributes(
            requested,
            meta.size,
            Some(&meta.etag),
            meta.last_modified,
        )))
    }

    async fn remove(&self, bitstream: &Bitstream) -> Result<(), BitStoreError> {
        let key = self.full_key(&bitstream.internal_id);
        let (client, container) = self.connected(Operation::Remove, &key)?;
        client
            .remove_blob(container, &key)
            .await
            .map_err(|e| fail(Operation::Remove, &key, e))?;
        debug!(key = %key, "Removed bitstream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transient::TransientClient;
    use bitstore_common::bitstream::AttributeValue;
    use tokio::io::AsyncReadExt;

    fn config(subfolder: Option<&str>) -> BitStoreConfig {
        BitStoreConfig {
            backend: "transient".to_string(),
            container: Some("test-assets".to_string()),
            subfolder: subfolder.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    async fn ready_store(
        subfolder: Option<&str>,
    ) -> (CloudBitStore, TransientClient, tempfile::TempDir) {
        let staging = tempfile::tempdir().unwrap();
        let client = TransientClient::new();
        let mut store = CloudBitStore::with_client(config(subfolder), Arc::new(client.clone()))
            .with_staging(StagingArea::new(staging.path()));
        store.init().await.unwrap();
        (store, client, staging)
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_init_creates_container() {
        let (store, client, _staging) = ready_store(None).await;
        assert_eq!(store.container(), Some("test-assets"));
        assert_eq!(client.blob_count("test-assets"), Some(0));
    }

    #[tokio::test]
    async fn test_init_connects_from_config() {
        let mut store = CloudBitStore::new(config(None));
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert_eq!(store.container(), Some("test-assets"));
    }

    #[tokio::test]
    async fn test_unknown_backend_fails_init() {
        let mut cfg = config(None);
        cfg.backend = "carrier-pigeon".to_string();
        let mut store = CloudBitStore::new(cfg);
        let err = store.init().await.unwrap_err();
        assert_eq!(err.operation(), Operation::Init);
        assert!(store.container().is_none());
    }

    #[tokio::test]
    async fn test_operations_before_init_fail() {
        let store = CloudBitStore::with_client(config(None), Arc::new(TransientClient::new()));
        let b = Bitstream::new("abc");
        let err = store.get(&b).await.err().unwrap();
        assert_eq!(err.operation(), Operation::Get);
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn test_subfolder_prefixes_stored_key() {
        let (store, client, _staging) = ready_store(Some("assets")).await;
        assert_eq!(store.full_key("abc123"), "assets/abc123");

        let mut b = Bitstream::new("abc123");
        let mut input: &[u8] = b"namespaced";
        store.put(&mut b, &mut input).await.unwrap();

        let meta = client
            .blob_metadata("test-assets", "assets/abc123")
            .await
            .unwrap();
        assert!(meta.is_some());
        let data = read_all(store.get(&b).await.unwrap().unwrap()).await;
        assert_eq!(data, b"namespaced");
    }

    #[tokio::test]
    async fn test_about_checksum_carries_algorithm() {
        let (store, _client, _staging) = ready_store(None).await;
        let mut b = Bitstream::new("abc");
        let mut input: &[u8] = b"hello world";
        store.put(&mut b, &mut input).await.unwrap();

        let attrs = store
            .about(&b, &[AttributeKey::Checksum])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            attrs.get(&AttributeKey::Checksum),
            Some(&AttributeValue::Text("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string()))
        );
        assert_eq!(
            attrs.get(&AttributeKey::ChecksumAlgorithm),
            Some(&AttributeValue::Text("MD5".to_string()))
        );
        assert!(!attrs.contains_key(&AttributeKey::SizeBytes));
    }
}
