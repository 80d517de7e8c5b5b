//! Upload lifecycle.
//!
//! ```text
//! Initializing ──▶ Uploading ──▶ Completed
//!      │            │    ▲
//!      │            ▼    │
//!      │          Paused ┘
//!      ▼            │
//!    Error     Interrupted ──▶ Uploading
//! ```
//!
//! Every non-terminal status may also move to `Cancelled`, which removes the
//! record. `Completed` and `Cancelled` are terminal.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use super::errors::{Result, UploadError};
use super::record::UploadRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadStatus {
    /// 创建上传会话中
    Initializing,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 进程重启前未完成，需要重新提供文件
    Interrupted,
    /// 已完成
    Completed,
    /// 失败
    Error,
    /// 已取消（只作为转换目标，不会被保存）
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;

        match (self, next) {
            (Completed | Cancelled, _) => false,
            (_, Cancelled) => true,
            (Initializing, Uploading) => true,
            (Initializing | Uploading, Error) => true,
            (Uploading, Paused | Completed) => true,
            (Paused | Interrupted, Uploading) => true,
            (Initializing | Uploading | Paused, Interrupted) => true,
            _ => false,
        }
    }

    /// 重启后需要强制转为 Interrupted 的状态
    pub fn needs_recovery(self) -> bool {
        matches!(self, UploadStatus::Initializing | UploadStatus::Uploading | UploadStatus::Paused)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadStatus::Initializing => "initializing",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Paused => "paused",
            UploadStatus::Interrupted => "interrupted",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl UploadRecord {
    /// Move the record to `next`, applying the bookkeeping that belongs to the
    /// target status. Returns the previous status.
    pub fn transition(&mut self, next: UploadStatus) -> Result<UploadStatus> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(UploadError::InvalidTransition { from, to: next });
        }

        match next {
            UploadStatus::Uploading => {
                self.started_at.get_or_insert_with(Utc::now);
                self.last_error = None;
            }
            UploadStatus::Completed => {
                self.uploaded_bytes = self.file.size_bytes;
                self.completed_at = Some(Utc::now());
            }
            UploadStatus::Cancelled => {
                self.session_uri = None;
            }
            _ => {}
        }

        self.status = next;
        Ok(from)
    }

    pub fn fail(&mut self, error: &UploadError) -> Result<UploadStatus> {
        let from = self.transition(UploadStatus::Error)?;
        self.last_error = Some(error.to_string());
        if matches!(error, UploadError::SessionExpired(_)) {
            self.session_uri = None;
        }

        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::FileDescriptor;

    fn record(size: u64) -> UploadRecord {
        UploadRecord::new(FileDescriptor::new("video.mp4", size, "video/mp4"), 4, None)
    }

    #[test]
    fn test_upload_status_transition() {
        use UploadStatus::*;

        // valid
        assert!(Initializing.can_transition_to(Uploading));
        assert!(Initializing.can_transition_to(Error));
        assert!(Uploading.can_transition_to(Paused));
        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Error));
        assert!(Paused.can_transition_to(Uploading));
        assert!(Paused.can_transition_to(Interrupted));
        assert!(Interrupted.can_transition_to(Uploading));
        assert!(Error.can_transition_to(Cancelled));
        assert!(Interrupted.can_transition_to(Cancelled));

        // invalid
        assert!(!Completed.can_transition_to(Uploading));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Uploading));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Paused));
        assert!(!Interrupted.can_transition_to(Paused));
        assert!(!Error.can_transition_to(Uploading));
        assert!(!Initializing.can_transition_to(Paused));
    }

    #[test]
    fn test_invalid_transition_is_rejected_without_change() {
        let mut record = record(10);
        let err = record.transition(UploadStatus::Completed).unwrap_err();

        assert!(matches!(
            err,
            UploadError::InvalidTransition { from: UploadStatus::Initializing, to: UploadStatus::Completed }
        ));
        assert_eq!(record.status, UploadStatus::Initializing);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_completed_fills_bytes_and_timestamp() {
        let mut record = record(10);
        record.transition(UploadStatus::Uploading).unwrap();
        record.advance_to(4);

        let from = record.transition(UploadStatus::Completed).unwrap();

        assert_eq!(from, UploadStatus::Uploading);
        assert_eq!(record.uploaded_bytes, 10);
        assert!(record.completed_at.is_some());
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_started_at_is_stamped_once() {
        let mut record = record(10);
        record.transition(UploadStatus::Uploading).unwrap();
        let first = record.started_at;

        record.transition(UploadStatus::Paused).unwrap();
        record.transition(UploadStatus::Uploading).unwrap();

        assert_eq!(record.started_at, first);
    }

    #[test]
    fn test_fail_records_error_and_drops_expired_session() {
        let mut record = record(10);
        record.session_uri = Some("https://example.com/session/1".to_string());
        record.transition(UploadStatus::Uploading).unwrap();

        record.fail(&UploadError::SessionExpired("404".to_string())).unwrap();

        assert_eq!(record.status, UploadStatus::Error);
        assert_eq!(record.last_error.as_deref(), Some("Upload session expired: 404"));
        assert!(record.session_uri.is_none());
    }

    #[test]
    fn test_fail_from_paused_is_rejected() {
        let mut record = record(10);
        record.transition(UploadStatus::Uploading).unwrap();
        record.transition(UploadStatus::Paused).unwrap();

        assert!(record.fail(&UploadError::Auth("no token".to_string())).is_err());
        assert!(record.last_error.is_none());
    }
}
