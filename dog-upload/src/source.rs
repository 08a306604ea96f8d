use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{FileMeta, UploadError, UploadResult};

/// Random-access reader over the bytes being uploaded
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`
    async fn read_range(&self, offset: u64, len: u64) -> UploadResult<Bytes>;
}

/// In-memory source, mostly useful for small payloads and tests
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl PartSource for MemorySource {
    async fn read_range(&self, offset: u64, len: u64) -> UploadResult<Bytes> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                UploadError::invalid(format!(
                    "Range {}+{} is outside of a {} byte source",
                    offset,
                    len,
                    self.len()
                ))
            })?;
        Ok(self.data.slice(offset as usize..end as usize))
    }
}

/// File on disk; each read opens its own handle so parts can be read concurrently
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Describe the file using its name and on-disk size
    pub async fn describe(&self, content_type: &str) -> UploadResult<FileMeta> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| {
                UploadError::invalid(format!("Cannot stat {}: {}", self.path.display(), e))
            })?;
        if !metadata.is_file() {
            return Err(UploadError::invalid(format!("{} is not a file", self.path.display())));
        }

        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UploadError::invalid(format!("{} has no file name", self.path.display()))
            })?;

        Ok(FileMeta::new(name, metadata.len()).with_content_type(content_type))
    }
}

#[async_trait]
impl PartSource for FileSource {
    async fn read_range(&self, offset: u64, len: u64) -> UploadResult<Bytes> {
        let io_err = |e: std::io::Error| {
            UploadError::invalid(format!(
                "Failed to read {} bytes at {} from {}: {}",
                len,
                offset,
                self.path.display(),
                e
            ))
        };

        let mut file = tokio::fs::File::open(&self.path).await.map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await.map_err(io_err)?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn memory_source_slices_ranges() {
        let source = MemorySource::new(&b"hello world"[..]);
        assert_eq!(source.read_range(6, 5).await.unwrap(), Bytes::from_static(b"world"));
        assert!(source.read_range(6, 6).await.is_err());
    }

    #[tokio::test]
    async fn file_source_reads_requested_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.read_range(3, 4).await.unwrap(), Bytes::from_static(b"3456"));
        // short file
        assert!(source.read_range(8, 4).await.is_err());

        let meta = source.describe("text/plain").await.unwrap();
        assert_eq!(meta.size, 10);
        assert_eq!(meta.content_type, "text/plain");
    }
}
