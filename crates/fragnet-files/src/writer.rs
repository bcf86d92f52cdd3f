//! Ordered, all-or-nothing fragment reassembly.
//!
//! Fragments are appended to a sibling `<output>.part` file in index order.
//! The output path only appears once [`FragmentWriter::commit`] has flushed
//! and renamed the part file; an uncommitted writer removes it on drop, so a
//! failed download never leaves something that looks like a complete file.

use crate::error::{FilesError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Writes fragments in order and publishes the result atomically
pub struct FragmentWriter {
    final_path: PathBuf,
    part_path: PathBuf,
    file: Option<File>,
    next_index: usize,
    bytes_written: u64,
    committed: bool,
}

impl FragmentWriter {
    /// Create the part file next to `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the part file cannot be created.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let part_path = part_path_for(&final_path);
        let file = File::create(&part_path).await?;

        tracing::debug!("Writing fragments to {}", part_path.display());

        Ok(Self {
            final_path,
            part_path,
            file: Some(file),
            next_index: 0,
            bytes_written: 0,
            committed: false,
        })
    }

    /// Temporary path fragments are written to
    #[must_use]
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Index the writer expects next
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Bytes written so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append fragment `index`
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::OutOfOrder`] unless `index` is the next expected
    /// index, or an I/O error if the write fails.
    pub async fn write_fragment(&mut self, index: usize, data: &[u8]) -> Result<()> {
        if index != self.next_index {
            return Err(FilesError::OutOfOrder {
                expected: self.next_index,
                got: index,
            });
        }
        let file = self.file.as_mut().ok_or_else(closed)?;
        file.write_all(data).await?;

        self.next_index += 1;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush and atomically move the part file onto the output path
    ///
    /// # Errors
    ///
    /// Returns an error if flushing, syncing or renaming fails; the part
    /// file is removed in that case.
    pub async fn commit(mut self) -> Result<PathBuf> {
        let mut file = self.file.take().ok_or_else(closed)?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&self.part_path, &self.final_path).await?;
        self.committed = true;

        tracing::debug!(
            "Committed {} ({} bytes, {} fragments)",
            self.final_path.display(),
            self.bytes_written,
            self.next_index
        );

        Ok(self.final_path.clone())
    }

    /// Discard everything written so far
    ///
    /// # Errors
    ///
    /// Returns an error if the part file cannot be removed.
    pub async fn abort(mut self) -> Result<()> {
        self.file.take();
        self.committed = true;
        match fs::remove_file(&self.part_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FragmentWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".part");
    path.with_file_name(name)
}

fn closed() -> FilesError {
    FilesError::Io(std::io::Error::other("fragment writer already closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_commit() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.bin");

        let mut writer = FragmentWriter::create(&out).await.unwrap();
        assert_eq!(writer.part_path(), dir.path().join("out.bin.part"));
        assert!(!out.exists());

        writer.write_fragment(0, b"hello ").await.unwrap();
        writer.write_fragment(1, b"world").await.unwrap();
        assert_eq!(writer.bytes_written(), 11);

        let path = writer.commit().await.unwrap();
        assert_eq!(path, out);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
        assert!(!dir.path().join("out.bin.part").exists());
    }

    #[tokio::test]
    async fn test_out_of_order_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = FragmentWriter::create(dir.path().join("o.bin")).await.unwrap();

        let err = writer.write_fragment(1, b"x").await.unwrap_err();
        assert!(matches!(
            err,
            FilesError::OutOfOrder {
                expected: 0,
                got: 1
            }
        ));
        assert_eq!(writer.next_index(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_part_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dropped.bin");
        {
            let mut writer = FragmentWriter::create(&out).await.unwrap();
            writer.write_fragment(0, b"partial").await.unwrap();
            assert!(writer.part_path().exists());
        }
        assert!(!dir.path().join("dropped.bin.part").exists());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_abort_leaves_existing_output_untouched() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("keep.bin");
        std::fs::write(&out, b"previous").unwrap();

        let mut writer = FragmentWriter::create(&out).await.unwrap();
        writer.write_fragment(0, b"new").await.unwrap();
        writer.abort().await.unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"previous");
        assert!(!dir.path().join("keep.bin.part").exists());
    }
}
