pub mod config;
pub mod upload;
pub mod utils;

// 重新导出核心类型
pub use upload::{
    Result,
    SessionClient,
    UploadError,
    UploadManager,
    UploadManagerHandle,
};

pub use upload::record::UploadRecord;
pub use upload::source::{FileSource, LocalFile};
pub use upload::state::UploadStatus;
pub use upload::store::{JsonFileStore, MemoryStore, SnapshotStore};
pub use upload::token::{StaticToken, TokenProvider};
pub use upload::types::{FileDescriptor, UploadConfig, UploadEvent, UploadId};
