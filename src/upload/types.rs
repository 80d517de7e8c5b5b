use std::str::FromStr;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::utils::RetryPolicy;
use super::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PERSIST_EVERY, EVENT_CAPACITY};
use super::errors::Result;
use super::record::UploadRecord;
use super::source::FileSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UploadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 创建时的文件快照，不包含文件句柄
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size_bytes: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            mime_type: mime_type.into(),
            last_modified: None,
        }
    }
}

/// Events published on the notification bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadEvent {
    /// 记录有变化（状态或进度）
    Updated {
        upload: UploadRecord,
    },

    /// 记录被取消或清理
    Removed {
        id: UploadId,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            UploadEvent::Updated { upload } => upload.id,
            UploadEvent::Removed { id } => *id,
        }
    }
}

/// 上传管理器命令
pub enum ManagerCommand {
    /// 添加上传任务
    StartUpload {
        file: FileDescriptor,
        source: Arc<dyn FileSource>,
        folder_id: Option<String>,
        reply: oneshot::Sender<Result<UploadId>>,
    },

    /// 暂停
    PauseUpload {
        upload_id: UploadId,
        reply: oneshot::Sender<bool>,
    },

    /// 恢复，需要调用方重新提供文件
    ResumeUpload {
        upload_id: UploadId,
        source: Arc<dyn FileSource>,
        reply: oneshot::Sender<bool>,
    },

    /// 取消
    CancelUpload {
        upload_id: UploadId,
        reply: oneshot::Sender<bool>,
    },

    /// 获取任务信息
    GetUpload {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadRecord>>,
    },

    /// 获取所有任务
    ListUploads {
        reply: oneshot::Sender<Vec<UploadRecord>>,
    },

    /// 清除所有 <Error/Completed> 状态的任务
    ClearFinished {
        reply: oneshot::Sender<usize>,
    },

    /// 停止所有上传并保存快照
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// 分块大小
    pub chunk_size: u64,

    /// 每上传 N 个分块保存一次快照
    pub persist_every: u32,

    /// 瞬时错误的重试策略
    pub retry: RetryPolicy,

    /// 事件通道容量
    pub event_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            persist_every: DEFAULT_PERSIST_EVERY,
            retry: RetryPolicy::default(),
            event_capacity: EVENT_CAPACITY,
        }
    }
}
