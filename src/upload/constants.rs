pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 分块大小必须是 256KB 的整数倍（最后一块除外）
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

pub const DEFAULT_PERSIST_EVERY: u32 = 4;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const EVENT_CAPACITY: usize = 256;

pub const SNAPSHOT_VERSION: u32 = 1;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
