use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::state::UploadStatus;
use super::types::{FileDescriptor, UploadId};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: UploadId,
    pub file: FileDescriptor,
    pub status: UploadStatus,
    pub uploaded_bytes: u64,
    pub chunk_size: u64,
    pub folder_id: Option<String>,
    pub session_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl UploadRecord {
    pub fn new(file: FileDescriptor, chunk_size: u64, folder_id: Option<String>) -> Self {
        Self {
            id: UploadId::new(),
            file,
            status: UploadStatus::Initializing,
            uploaded_bytes: 0,
            chunk_size,
            folder_id,
            session_uri: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.file.size_bytes
    }

    /// 进度百分比，每次都重新计算
    pub fn progress_percent(&self) -> f64 {
        if self.file.size_bytes == 0 {
            return if self.status == UploadStatus::Completed { 100.0 } else { 0.0 };
        }

        self.uploaded_bytes as f64 / self.file.size_bytes as f64 * 100.0
    }

    /// Apply an acknowledged offset. Offsets never move backwards and are
    /// clamped to the file size; returns whether anything changed.
    pub fn advance_to(&mut self, uploaded_bytes: u64) -> bool {
        let next = uploaded_bytes.min(self.file.size_bytes);
        if next <= self.uploaded_bytes {
            return false;
        }

        self.uploaded_bytes = next;
        true
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Error)
    }
}
