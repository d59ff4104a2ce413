//! Local directory bitstream service.
//!
//! Stores bitstreams under a base directory, sharded by the first six
//! characters of the id: `{base}/ab/cd/ef/{id}`. Each put writes a uniquely
//! named temp file in the target directory, fsyncs it and renames it over the
//! target, so readers and concurrent writers never see a partial object. The
//! MD5 checksum is computed while copying.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use bitstore_common::backend::{BitStoreService, BlobReader};
use bitstore_common::bitstream::{AttributeKey, Attributes, Bitstream};
use bitstore_common::error::{BitStoreError, ObjectStoreError, Operation};

use super::{fail, select_attributes};

const SHARD_DEPTH: usize = 3;
const SHARD_WIDTH: usize = 2;
const COPY_BUFFER: usize = 64 * 1024;
const TMP_PREFIX: &str = ".put-";
const TMP_SUFFIX: &str = ".part";

pub struct DirectoryBitStore {
    base_path: PathBuf,
}

impl DirectoryBitStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve the file for an id, refusing ids that could escape the base
    /// directory.
    fn full_path(&self, internal_id: &str) -> Result<PathBuf, ObjectStoreError> {
        if internal_id.is_empty()
            || internal_id.contains(|c: char| c == '/' || c == '\\')
            || internal_id.contains("..")
        {
            return Err(ObjectStoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid internal id: {:?}", internal_id),
            )));
        }

        let mut path = self.base_path.clone();
        let chars: Vec<char> = internal_id.chars().collect();
        for shard in chars.chunks(SHARD_WIDTH).take(SHARD_DEPTH) {
            if shard.len() < SHARD_WIDTH || chars.len() <= SHARD_WIDTH * SHARD_DEPTH {
                break;
            }
            path.push(shard.iter().collect::<String>());
        }
        path.push(internal_id);
        Ok(path)
    }
}

/// Copy `input` into `file`, hashing as we go. Returns (bytes, hex MD5).
async fn copy_hashed(
    input: &mut (dyn AsyncRead + Send + Unpin),
    file: &mut tokio::fs::File,
) -> io::Result<(u64, String)> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((total, hex::encode(hasher.finalize())))
}

async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_not_found(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
}

#[async_trait]
impl BitStoreService for DirectoryBitStore {
    async fn init(&mut self) -> Result<(), BitStoreError> {
        let base = self.base_path.display().to_string();
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| fail(Operation::Init, &base, e))?;
        info!(path = %base, "Directory bitstore ready");
        Ok(())
    }

    async fn get(&self, bitstream: &Bitstream) -> Result<Option<BlobReader>, BitStoreError> {
        let id = &bitstream.internal_id;
        let path = self.full_path(id).map_err(|e| fail(Operation::Get, id, e))?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let reader: BlobReader = Box::pin(file);
                Ok(Some(reader))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(fail(Operation::Get, id, e)),
        }
    }

    async fn put(
        &self,
        bitstream: &mut Bitstream,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), BitStoreError> {
        let id = bitstream.internal_id.clone();
        let dest = self.full_path(&id).map_err(|e| fail(Operation::Put, &id, e))?;

        // Ensure parent directory exists
        let parent = dest.parent().unwrap_or(self.base_path.as_path());
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(Operation::Put, &id, e))?;

        // Write to a uniquely named temp file beside the target, then rename
        // (atomic). Dropping `tmp` on any error path deletes it.
        let result = async {
            let tmp = tempfile::Builder::new()
                .prefix(TMP_PREFIX)
                .suffix(TMP_SUFFIX)
                .tempfile_in(parent)?;
            let mut file = tokio::fs::File::from_std(tmp.reopen()?);
            let (size, checksum) = copy_hashed(input, &mut file).await?;
            drop(file);
            tmp.persist(&dest)?;
            Ok::<_, io::Error>((size, checksum))
        }
        .await;

        let (size, checksum) = result.map_err(|e| fail(Operation::Put, &id, e))?;
        bitstream.record_stored(size, checksum);
        debug!(id = %id, bytes = size, "Directory put complete");
        Ok(())
    }

    async fn about(
        &self,
        bitstream: &Bitstream,
        requested: &[AttributeKey],
    ) -> Result<Option<Attributes>, BitStoreError> {
        let id = &bitstream.internal_id;
        let path = self.full_path(id).map_err(|e| fail(Operation::About, id, e))?;

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(fail(Operation::About, id, e)),
        };
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| fail(Operation::About, id, e))?;

        // Hashing reads the whole file; only do it when asked.
        let checksum = if requested.contains(&AttributeKey::Checksum) {
            Some(
                hash_file(&path)
                    .await
                    .map_err(|e| fail(Operation::About, id, e))?,
            )
        } else {
            None
        };

        Ok(Some(select_attributes(
            requested,
            meta.len(),
            checksum.as_deref(),
            modified,
        )))
    }

    async fn remove(&self, bitstream: &Bitstream) -> Result<(), BitStoreError> {
        let id = &bitstream.internal_id;
        let path = self.full_path(id).map_err(|e| fail(Operation::Remove, id, e))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(fail(Operation::Remove, id, e)),
        }
        debug!(id = %id, "Directory delete complete");
        Ok(())
    }
}
