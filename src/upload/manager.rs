use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use super::client::SessionClient;
use super::command::{Request, Response};
use super::errors::{Result, UploadError};
use super::events::{EventBus, FilteredEventReceiver};
use super::manager_worker::ManagerWorker;
use super::record::UploadRecord;
use super::source::{FileSource, LocalFile};
use super::store::{PersistenceGateway, SnapshotStore};
use super::token::TokenProvider;
use super::types::{FileDescriptor, ManagerCommand, UploadConfig, UploadEvent, UploadId};

#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    events: EventBus,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Stop running uploads at the next chunk boundary, write the final
    /// snapshot and wait for the manager task to end.
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.manager.command_tx
            .send(ManagerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok();
        if sent {
            let _ = reply_rx.await;
        }

        drop(self.manager);
        self.worker_handle.await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    /// Start the manager task. The last snapshot in `store` is restored
    /// before the first command is handled.
    pub fn new(
        client: SessionClient,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<dyn SnapshotStore>,
        config: UploadConfig,
    ) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let events = EventBus::new(config.event_capacity);

        let worker = ManagerWorker::new(
            client,
            tokens,
            PersistenceGateway::new(store),
            events.clone(),
            config,
        );
        let worker_handle = tokio::spawn(worker.run(command_rx));

        let manager = Self {
            command_tx,
            events,
        };

        UploadManagerHandle {
            manager,
            worker_handle,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        // 等待响应
        reply_rx
            .await
            .map_err(|_| UploadError::ManagerShutdown)
    }

    /// Add upload task. Returns as soon as the record exists; the session is
    /// negotiated in the background.
    pub async fn start_upload(
        &self,
        file: FileDescriptor,
        source: Arc<dyn FileSource>,
        folder_id: Option<String>,
    ) -> Result<UploadId> {
        self.request(|reply| ManagerCommand::StartUpload { file, source, folder_id, reply })
            .await?
    }

    /// Add upload task for a local file.
    pub async fn start_upload_path(&self, path: impl AsRef<Path>, folder_id: Option<String>) -> Result<UploadId> {
        let source = LocalFile::new(path.as_ref());
        let file = source.describe().await?;

        self.start_upload(file, Arc::new(source), folder_id).await
    }

    /// Pause upload task. Only an uploading task can be paused; it stops
    /// after the chunk currently in flight.
    pub async fn pause_upload(&self, upload_id: UploadId) -> Result<bool> {
        self.request(|reply| ManagerCommand::PauseUpload { upload_id, reply }).await
    }

    /// Resume a paused or interrupted upload with a fresh file accessor.
    pub async fn resume_upload(&self, upload_id: UploadId, source: Arc<dyn FileSource>) -> Result<bool> {
        self.request(|reply| ManagerCommand::ResumeUpload { upload_id, source, reply }).await
    }

    /// Resume from a local file, which must still have the recorded size.
    pub async fn resume_upload_path(&self, upload_id: UploadId, path: impl AsRef<Path>) -> Result<bool> {
        let record = self.get_upload(upload_id).await?
            .ok_or(UploadError::NotFound(upload_id))?;

        let source = LocalFile::new(path.as_ref());
        let file = source.describe().await?;
        if file.size_bytes != record.file.size_bytes {
            return Err(UploadError::FileMismatch {
                expected: record.file.size_bytes,
                actual: file.size_bytes,
            });
        }

        self.resume_upload(upload_id, Arc::new(source)).await
    }

    /// Cancel upload
    pub async fn cancel_upload(&self, upload_id: UploadId) -> Result<bool> {
        self.request(|reply| ManagerCommand::CancelUpload { upload_id, reply }).await
    }

    /// Get task
    pub async fn get_upload(&self, upload_id: UploadId) -> Result<Option<UploadRecord>> {
        self.request(|reply| ManagerCommand::GetUpload { upload_id, reply }).await
    }

    /// Get all tasks, in the order they were added
    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>> {
        self.request(|reply| ManagerCommand::ListUploads { reply }).await
    }

    /// Remove completed and failed uploads, returns how many were removed
    pub async fn clear_finished(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearFinished { reply }).await
    }

    /// 订阅事件
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        self.events.subscribe_filtered(filter)
    }

    /// Execute one request of the command surface.
    pub async fn dispatch(&self, request: Request) -> Response {
        let result = match request {
            Request::GetUploads => self.list_uploads().await.map(|uploads| Response::Uploads { uploads }),
            Request::StartUpload { file, folder_id } => self
                .start_upload_path(file, folder_id)
                .await
                .map(|id| Response::Started { id }),
            Request::PauseUpload { id } => self.pause_upload(id).await.map(|ok| Response::Ack { ok }),
            Request::ResumeUpload { id, file } => self
                .resume_upload_path(id, file)
                .await
                .map(|ok| Response::Ack { ok }),
            Request::CancelUpload { id } => self.cancel_upload(id).await.map(|ok| Response::Ack { ok }),
        };

        result.unwrap_or_else(|err| Response::Error { error: err.to_string() })
    }
}
