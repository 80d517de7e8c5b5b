use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use super::constants::DEFAULT_MIME_TYPE;
use super::errors::{Result, UploadError};
use super::types::FileDescriptor;

/// Random access to the bytes being uploaded.
///
/// A source lives only as long as the process; after a restart the caller
/// has to hand a new one to `resume_upload`.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read exactly `[start, end)`.
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes>;
}

/// 本地文件
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the descriptor snapshot for this file.
    pub async fn describe(&self) -> Result<FileDescriptor> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a file: {}", self.path.display()),
            )));
        }

        let name = self.path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::internal(format!("Can't read file name of {}", self.path.display())))?
            .to_string();

        let mime_type = mime_guess::from_path(&self.path)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();

        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        Ok(FileDescriptor {
            name,
            size_bytes: metadata.len(),
            mime_type,
            last_modified,
        })
    }
}

#[async_trait]
impl FileSource for LocalFile {
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let mut file = File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; buffer_len(start, end)?];
        file.read_exact(&mut buffer).await?;

        Ok(Bytes::from(buffer))
    }
}

/// Size of the buffer for `[start, end)`, which must fit in memory.
fn buffer_len(start: u64, end: u64) -> Result<usize> {
    usize::try_from(end.saturating_sub(start)).map_err(|_| {
        UploadError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Range {}..{} is too large to buffer", start, end),
        ))
    })
}

/// 内存中的数据，主要用于测试和小文件
#[async_trait]
impl FileSource for Bytes {
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        let len = self.len() as u64;
        if start > end || end > len {
            return Err(UploadError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("Range {}..{} outside of {} bytes", start, end, len),
            )));
        }

        Ok(self.slice(start as usize..end as usize))
    }
}
