//! Byte storage under the WARC containers.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Append-only named containers with ranged reads.
#[async_trait]
pub trait BlobBacking: Send + Sync {
    /// Append `bytes` to `container`, creating it if needed. Returns the
    /// offset the bytes were written at.
    async fn append(&self, container: &str, bytes: &[u8]) -> std::io::Result<u64>;

    /// Read exactly `length` bytes starting at `offset`.
    async fn read_range(&self, container: &str, offset: u64, length: u64) -> std::io::Result<Vec<u8>>;

    /// Current size of `container`, zero if it does not exist.
    async fn size(&self, container: &str) -> std::io::Result<u64>;
}

/// Containers as files in one local directory.
pub struct LocalDirBacking {
    dir: PathBuf,
}

impl LocalDirBacking {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, container: &str) -> PathBuf {
        self.dir.join(container)
    }
}

#[async_trait]
impl BlobBacking for LocalDirBacking {
    async fn append(&self, container: &str, bytes: &[u8]) -> std::io::Result<u64> {
        fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(container))
            .await?;
        let offset = file.metadata().await?.len();
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(offset)
    }

    async fn read_range(&self, container: &str, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
        let mut file = fs::File::open(self.path(container)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn size(&self, container: &str) -> std::io::Result<u64> {
        match fs::metadata(self.path(container)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_returns_offsets() {
        let dir = tempdir().unwrap();
        let backing = LocalDirBacking::new(dir.path());
        assert_eq!(backing.size("c").await.unwrap(), 0);
        assert_eq!(backing.append("c", b"hello").await.unwrap(), 0);
        assert_eq!(backing.append("c", b"world").await.unwrap(), 5);
        assert_eq!(backing.read_range("c", 5, 5).await.unwrap(), b"world");
        assert_eq!(backing.size("c").await.unwrap(), 10);
    }
}
