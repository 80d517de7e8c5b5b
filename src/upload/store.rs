use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use super::constants::SNAPSHOT_VERSION;
use super::errors::{Result, UploadError};
use super::record::UploadRecord;

/// 存储适配器 - 保存和恢复整个上传列表
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the stored snapshot with `records`.
    async fn save(&self, records: &[UploadRecord]) -> Result<()>;

    /// Read the last snapshot. A store with no snapshot yet returns an empty list.
    async fn load(&self) -> Result<Vec<UploadRecord>>;
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    uploads: &'a [UploadRecord],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    uploads: Vec<UploadRecord>,
}

pub fn encode_snapshot(records: &[UploadRecord]) -> Result<String> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        uploads: records,
    };
    Ok(serde_json::to_string_pretty(&snapshot)?)
}

pub fn decode_snapshot(data: &str) -> Result<Vec<UploadRecord>> {
    let snapshot: Snapshot = serde_json::from_str(data)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(UploadError::Persistence(format!(
            "Unsupported snapshot version {}",
            snapshot.version
        )));
    }

    Ok(snapshot.uploads)
}

/// Snapshot kept in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, records: &[UploadRecord]) -> Result<()> {
        let data = encode_snapshot(records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }

    async fn load(&self) -> Result<Vec<UploadRecord>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        decode_snapshot(&data)
    }
}

/// 内存存储，进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing serialized snapshot.
    pub fn with_snapshot(data: impl Into<String>) -> Self {
        Self {
            data: Mutex::new(Some(data.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.data.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save(&self, records: &[UploadRecord]) -> Result<()> {
        let data = encode_snapshot(records)?;
        let mut guard = self.data
            .lock()
            .map_err(|_| UploadError::Persistence("Snapshot lock poisoned".to_string()))?;
        *guard = Some(data);

        Ok(())
    }

    async fn load(&self) -> Result<Vec<UploadRecord>> {
        match self.contents() {
            Some(data) => decode_snapshot(&data),
            None => Ok(Vec::new()),
        }
    }
}

/// Best-effort access to a snapshot store: failures are logged and never
/// reach the caller.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn SnapshotStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, records: &[UploadRecord]) {
        match self.store.save(records).await {
            Ok(()) => debug!(count = records.len(), "saved upload snapshot"),
            Err(err) => warn!(error = %err, "failed to save upload snapshot"),
        }
    }

    /// A missing or unreadable snapshot counts as "no prior state".
    pub async fn load(&self) -> Vec<UploadRecord> {
        match self.store.load().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "discarding unreadable upload snapshot");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::state::UploadStatus;
    use crate::upload::types::FileDescriptor;

    fn record(name: &str) -> UploadRecord {
        UploadRecord::new(FileDescriptor::new(name, 42, "text/plain"), 16, Some("folder".to_string()))
    }

    #[tokio::test]
    async fn test_json_file_store_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("uploads.json"));

        let mut second = record("b.txt");
        second.transition(UploadStatus::Uploading).unwrap();
        second.advance_to(16);
        let records = vec![record("a.txt"), second];

        store.save(&records).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nothing.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_versioned() {
        let store = MemoryStore::new();
        store.save(&[record("a.txt")]).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(&store.contents().unwrap()).unwrap();
        assert_eq!(value["version"], SNAPSHOT_VERSION);
        assert_eq!(value["uploads"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let store = MemoryStore::with_snapshot(r#"{"version": 99, "uploads": []}"#);
        assert!(matches!(store.load().await, Err(UploadError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_gateway_treats_corrupt_snapshot_as_empty() {
        let gateway = PersistenceGateway::new(Arc::new(MemoryStore::with_snapshot("{not json")));
        assert!(gateway.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_swallows_save_failure() {
        let dir = tempfile::tempdir().unwrap();
        // 目标路径是一个目录，rename 会失败
        let target = dir.path().join("occupied");
        tokio::fs::create_dir_all(target.join("child")).await.unwrap();

        let gateway = PersistenceGateway::new(Arc::new(JsonFileStore::new(&target)));
        gateway.save(&[record("a.txt")]).await;
    }
}
