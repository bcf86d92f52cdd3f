//! Readable file sources for uploads.

use crate::error::Result;
use crate::fragmenter::num_segments;
use bytes::Bytes;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Sequentially readable input of known length.
///
/// The orchestrator only reads from the source; the caller keeps ownership
/// of whatever backs it for the duration of the upload.
pub trait FileSource: AsyncRead + Unpin + Send {
    /// Total length in bytes
    fn size(&self) -> u64;

    /// Number of [`SEGMENT_SIZE`](crate::SEGMENT_SIZE) segments covering the source
    fn num_segments(&self) -> u64 {
        num_segments(self.size())
    }
}

/// File on the local filesystem
pub struct LocalFile {
    file: tokio::fs::File,
    path: PathBuf,
    size: u64,
}

impl LocalFile {
    /// Open a file for reading
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();

        tracing::debug!("Opened {} ({} bytes)", path.display(), size);

        Ok(Self { file, path, size })
    }

    /// Path this source was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for LocalFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl FileSource for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }
}

/// In-memory source
pub struct MemorySource {
    cursor: Cursor<Bytes>,
    size: u64,
}

impl MemorySource {
    /// Wrap in-memory bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self {
            cursor: Cursor::new(data),
            size,
        }
    }
}

impl AsyncRead for MemorySource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.cursor).poll_read(cx, buf)
    }
}

impl FileSource for MemorySource {
    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SEGMENT_SIZE;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_local_file_size_and_read() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[7u8; 4096]).unwrap();
        temp_file.flush().unwrap();

        let mut source = LocalFile::open(temp_file.path()).await.unwrap();
        assert_eq!(source.size(), 4096);
        assert_eq!(source.num_segments(), 1);
        assert_eq!(source.path(), temp_file.path());

        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, vec![7u8; 4096]);
    }

    #[tokio::test]
    async fn test_local_file_missing() {
        assert!(LocalFile::open("/nonexistent/fragnet/input.bin").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_source() {
        let mut source = MemorySource::new(vec![1u8; SEGMENT_SIZE * 2 + 1]);
        assert_eq!(source.num_segments(), 3);

        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), SEGMENT_SIZE * 2 + 1);
    }

    #[test]
    fn test_empty_source_has_one_segment() {
        let source = MemorySource::new(Vec::new());
        assert_eq!(source.size(), 0);
        assert_eq!(source.num_segments(), 1);
    }
}
