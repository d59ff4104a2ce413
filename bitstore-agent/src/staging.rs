//! Staging: scoped local copies of uploads.
//!
//! Remote puts need the content length up front, but callers hand us a
//! stream of unknown length. The stream is copied into a temp file under the
//! staging directory, measured, and then re-read for the transfer.
//!
//! A `StagedUpload` owns its temp file. Dropping it deletes the file, so the
//! buffer is released on every exit path of `put`.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

const STAGING_SUFFIX: &str = ".bsstage";
const MAX_PREFIX_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stage under the system temp directory.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `input` to a fresh staging file and report how many bytes it held.
    ///
    /// On error the partially written file is removed before returning.
    pub async fn stage(
        &self,
        label: &str,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<StagedUpload> {
        let file = tempfile::Builder::new()
            .prefix(&staging_prefix(label))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)?;

        let mut out = tokio::fs::File::from_std(file.reopen()?);
        let len = tokio::io::copy(input, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        debug!(path = %file.path().display(), bytes = len, "Staged upload");
        Ok(StagedUpload { file, len })
    }
}

/// A measured local copy of an upload. The backing file lives exactly as
/// long as this value.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    len: u64,
}

impl StagedUpload {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open an independent reader positioned at the start of the staged bytes.
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.file.path()).await
    }

    /// Delete the staging file now, reporting failure instead of ignoring it.
    pub fn close(self) -> io::Result<()> {
        let path = self.file.path().to_path_buf();
        self.file.close().map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
            e
        })
    }
}

/// Temp file prefix derived from the bitstream id, restricted to characters
/// that are safe in a file name.
fn staging_prefix(label: &str) -> String {
    let mut prefix: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_PREFIX_LEN)
        .collect();
    prefix.push('.');
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, ReadBuf};

    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(io::Error::other("simulated read failure")))
            } else {
                self.sent = true;
                buf.put_slice(b"partial");
                Poll::Ready(Ok(()))
            }
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_stage_measures_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let mut input: &[u8] = b"hello staging";
        let staged = area.stage("abc123", &mut input).await.unwrap();
        assert_eq!(staged.len(), 13);
        assert!(staged.path().starts_with(dir.path()));

        let mut reader = staged.open().await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello staging");
        drop(reader);

        staged.close().unwrap();
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let mut input: &[u8] = b"";
        let staged = area.stage("empty", &mut input).await.unwrap();
        assert!(staged.is_empty());
        assert_eq!(entries(dir.path()), 1);
        drop(staged);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        let mut input = FailingReader { sent: false };
        let result = area.stage("broken", &mut input).await;
        assert!(result.is_err());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_staging_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("does-not-exist"));
        let mut input: &[u8] = b"data";
        assert!(area.stage("x", &mut input).await.is_err());
    }

    #[test]
    fn test_staging_prefix_sanitizes() {
        assert_eq!(staging_prefix("abc-123_x"), "abc-123_x.");
        assert_eq!(staging_prefix("../etc/passwd"), "etcpasswd.");
    }
}
