use std::pin::Pin;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::bitstream::{AttributeKey, Attributes, Bitstream};
use crate::error::{BitStoreError, ObjectStoreError};

/// Caller-owned byte stream. For remote stores it is backed by the live
/// response body, so it should be consumed and dropped promptly.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata the object store reports for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// Raw object-store capability (S3, in-memory, ...).
///
/// Clients only move bytes and report metadata. Key layout, checksum
/// bookkeeping and error wrapping belong to the service on top.
#[async_trait::async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn container_exists(&self, container: &str) -> Result<bool, ObjectStoreError>;

    /// Create a container. Succeeds if it already exists.
    async fn create_container(&self, container: &str) -> Result<(), ObjectStoreError>;

    /// Open a blob for reading. `Ok(None)` if no such blob.
    async fn get_blob(&self, container: &str, key: &str)
        -> Result<Option<BlobReader>, ObjectStoreError>;

    /// Upload exactly `length` bytes from `payload`, returning the etag the
    /// store computed for the new object.
    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        payload: BlobReader,
        length: u64,
    ) -> Result<String, ObjectStoreError>;

    /// `Ok(None)` if no such blob. A missing container is reported as
    /// `ObjectStoreError::ContainerNotFound`.
    async fn blob_metadata(&self, container: &str, key: &str)
        -> Result<Option<BlobMetadata>, ObjectStoreError>;

    /// Delete a blob. Deleting an absent blob succeeds.
    async fn remove_blob(&self, container: &str, key: &str) -> Result<(), ObjectStoreError>;
}

/// Storage contract the content layer programs against.
///
/// `init` runs once before the service is shared; every other method takes
/// `&self` and may be called concurrently.
#[async_trait::async_trait]
pub trait BitStoreService: Send + Sync {
    async fn init(&mut self) -> Result<(), BitStoreError>;

    /// A fresh identifier suitable as a new bitstream's `internal_id`.
    fn generate_id(&self) -> String {
        generate_id()
    }

    /// Open the stored bits, or `Ok(None)` if nothing was ever stored.
    async fn get(&self, bitstream: &Bitstream) -> Result<Option<BlobReader>, BitStoreError>;

    /// Store the bits read from `input`, then record size and checksum on
    /// `bitstream`. On failure `bitstream` is left unmodified.
    async fn put(
        &self,
        bitstream: &mut Bitstream,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), BitStoreError>;

    /// Report the requested attributes, or `Ok(None)` if the object is absent.
    async fn about(
        &self,
        bitstream: &Bitstream,
        requested: &[AttributeKey],
    ) -> Result<Option<Attributes>, BitStoreError>;

    /// Delete the stored bits. Removing something absent is not an error.
    async fn remove(&self, bitstream: &Bitstream) -> Result<(), BitStoreError>;
}

/// Generate a globally unique id: UUID v4, 32 lowercase hex chars.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Compute the storage key for a bitstream given the optional subfolder.
/// Scheme: `{subfolder}/{internal_id}`, or just `{internal_id}`.
pub fn full_key(subfolder: Option<&str>, internal_id: &str) -> String {
    let subfolder = subfolder.unwrap_or("").trim().trim_end_matches('/');
    if subfolder.is_empty() {
        internal_id.to_string()
    } else {
        format!("{}/{}", subfolder, internal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key() {
        assert_eq!(full_key(Some("assets"), "abc123"), "assets/abc123");
        assert_eq!(full_key(None, "abc123"), "abc123");
        assert_eq!(full_key(Some(""), "abc123"), "abc123");
        assert_eq!(full_key(Some("   "), "abc123"), "abc123");
        assert_eq!(full_key(Some("assets/"), "abc123"), "assets/abc123");
        assert_eq!(full_key(Some("site/assets"), "abc123"), "site/assets/abc123");
    }

    #[test]
    fn test_full_key_injective() {
        let a = full_key(Some("assets"), "one");
        let b = full_key(Some("assets"), "two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_id() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }
}
