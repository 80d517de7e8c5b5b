use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use super::client::SessionClient;
use super::control::TransferControl;
use super::engine::{ChunkEngine, TransferOutcome};
use super::errors::{Result, UploadError};
use super::events::EventBus;
use super::record::UploadRecord;
use super::source::FileSource;
use super::state::UploadStatus;
use super::store::PersistenceGateway;
use super::token::TokenProvider;
use super::types::{FileDescriptor, ManagerCommand, UploadConfig, UploadEvent, UploadId};
use super::worker::{UploadJob, UploadWorker, WorkerReport};

/// How long shutdown waits for running transfers to reach a chunk boundary.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct UploadHandle {
    record: UploadRecord,
    control: Option<TransferControl>,
    join_handle: Option<JoinHandle<()>>,
    chunks_since_save: u32,
}

impl UploadHandle {
    fn new(record: UploadRecord) -> Self {
        Self {
            record,
            control: None,
            join_handle: None,
            chunks_since_save: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.control.is_some()
    }
}

/// Owns every upload record. All mutation happens on this task; running
/// uploads talk back through `WorkerReport`s.
pub(crate) struct ManagerWorker {
    client: SessionClient,
    engine: ChunkEngine,
    tokens: Arc<dyn TokenProvider>,
    config: UploadConfig,
    uploads: Vec<UploadHandle>,
    gateway: PersistenceGateway,
    events: EventBus,
    background: Vec<JoinHandle<()>>,

    report_tx: mpsc::UnboundedSender<WorkerReport>,
    report_rx: mpsc::UnboundedReceiver<WorkerReport>,
}

impl ManagerWorker {
    pub(crate) fn new(
        client: SessionClient,
        tokens: Arc<dyn TokenProvider>,
        gateway: PersistenceGateway,
        events: EventBus,
        config: UploadConfig,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let engine = ChunkEngine::new(client.clone(), config.retry.clone());

        Self {
            client,
            engine,
            tokens,
            config,
            uploads: Vec::new(),
            gateway,
            events,
            background: Vec::new(),
            report_tx,
            report_rx,
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        // 恢复之前的状态
        self.recover().await;

        // 主事件循环, 循环等待命令
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(report) = self.report_rx.recv() => {
                    self.handle_report(report).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Reload the last snapshot. Uploads that were in flight lost their file
    /// handle with the old process and become `Interrupted`.
    async fn recover(&mut self) {
        let records = self.gateway.load().await;
        let mut changed = false;

        for mut record in records {
            if record.status == UploadStatus::Cancelled {
                changed = true;
                continue;
            }

            if record.status.needs_recovery() {
                match record.transition(UploadStatus::Interrupted) {
                    Ok(from) => {
                        info!(upload_id = %record.id, from = %from, "upload interrupted by restart");
                        changed = true;
                    }
                    Err(err) => warn!(upload_id = %record.id, error = %err, "failed to recover upload"),
                }
            }

            self.uploads.push(UploadHandle::new(record));
        }

        info!(count = self.uploads.len(), "restored uploads");
        if changed {
            self.persist().await;
        }
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::StartUpload { file, source, folder_id, reply } => {
                let result = self.start_upload(file, source, folder_id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::PauseUpload { upload_id, reply } => {
                let result = self.pause_upload(upload_id);
                let _ = reply.send(result);
            }
            ManagerCommand::ResumeUpload { upload_id, source, reply } => {
                let result = self.resume_upload(upload_id, source).await;
                let _ = reply.send(result);
            }
            ManagerCommand::CancelUpload { upload_id, reply } => {
                let result = self.cancel_upload(upload_id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::GetUpload { upload_id, reply } => {
                let record = self.find(upload_id).map(|handle| handle.record.clone());
                let _ = reply.send(record);
            }
            ManagerCommand::ListUploads { reply } => {
                let records = self.records();
                let _ = reply.send(records);
            }
            ManagerCommand::ClearFinished { reply } => {
                let removed = self.clear_finished().await;
                let _ = reply.send(removed);
            }
            ManagerCommand::Shutdown { reply } => {
                // run() 已经处理
                let _ = reply.send(());
            }
        }
    }

    async fn start_upload(
        &mut self,
        file: FileDescriptor,
        source: Arc<dyn FileSource>,
        folder_id: Option<String>,
    ) -> Result<UploadId> {
        if self.config.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk size must be positive".to_string()));
        }

        let record = UploadRecord::new(file, self.config.chunk_size, folder_id);
        let upload_id = record.id;
        info!(upload_id = %upload_id, name = %record.file.name, size = record.file.size_bytes, "upload added");

        self.uploads.push(UploadHandle::new(record));
        self.persist().await;
        self.publish_updated(upload_id);

        self.spawn_worker(upload_id, source);

        Ok(upload_id)
    }

    fn pause_upload(&mut self, upload_id: UploadId) -> bool {
        let Some(handle) = self.find(upload_id) else {
            debug!(upload_id = %upload_id, "pause of unknown upload");
            return false;
        };

        if handle.record.status != UploadStatus::Uploading {
            debug!(upload_id = %upload_id, status = %handle.record.status, "pause ignored");
            return false;
        }

        // 状态在分块边界处才变为 Paused
        match &handle.control {
            Some(control) => {
                control.stop();
                info!(upload_id = %upload_id, "pause requested");
                true
            }
            None => false,
        }
    }

    async fn resume_upload(&mut self, upload_id: UploadId, source: Arc<dyn FileSource>) -> bool {
        let Some(handle) = self.find_mut(upload_id) else {
            return false;
        };

        if handle.is_running() {
            debug!(upload_id = %upload_id, "resume ignored, upload still running");
            return false;
        }

        if !matches!(handle.record.status, UploadStatus::Paused | UploadStatus::Interrupted) {
            debug!(upload_id = %upload_id, status = %handle.record.status, "resume ignored");
            return false;
        }

        if let Err(err) = handle.record.transition(UploadStatus::Uploading) {
            warn!(upload_id = %upload_id, error = %err, "resume rejected");
            return false;
        }
        info!(upload_id = %upload_id, offset = handle.record.uploaded_bytes, "upload resumed");

        self.persist().await;
        self.publish_updated(upload_id);
        self.spawn_worker(upload_id, source);

        true
    }

    async fn cancel_upload(&mut self, upload_id: UploadId) -> bool {
        let Some(index) = self.uploads.iter().position(|h| h.record.id == upload_id) else {
            return false;
        };

        let mut handle = self.uploads.remove(index);
        if let Some(control) = handle.control.take() {
            control.stop();
        }

        let session_uri = handle.record.session_uri.clone();
        if !handle.record.status.is_terminal() {
            if let Err(err) = handle.record.transition(UploadStatus::Cancelled) {
                warn!(upload_id = %upload_id, error = %err, "unexpected cancel transition");
            }
        }
        info!(upload_id = %upload_id, "upload cancelled");

        if let Some(session_uri) = session_uri {
            self.close_session(session_uri);
        }

        self.persist().await;
        self.events.publish(UploadEvent::Removed { id: upload_id });

        true
    }

    async fn clear_finished(&mut self) -> usize {
        let (finished, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.uploads)
            .into_iter()
            .partition(|handle| handle.record.is_finished());
        self.uploads = kept;

        if finished.is_empty() {
            return 0;
        }

        self.persist().await;
        for handle in &finished {
            self.events.publish(UploadEvent::Removed { id: handle.record.id });
        }

        finished.len()
    }

    async fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::SessionOpened { upload_id, session_uri } => {
                self.handle_session_opened(upload_id, session_uri).await;
            }
            WorkerReport::Progress { upload_id, uploaded_bytes } => {
                self.handle_progress(upload_id, uploaded_bytes).await;
            }
            WorkerReport::Finished { upload_id, result } => {
                self.handle_finished(upload_id, result).await;
            }
        }
    }

    async fn handle_session_opened(&mut self, upload_id: UploadId, session_uri: String) {
        let Some(handle) = self.find_mut(upload_id) else {
            // 协商期间被取消了，会话不会再被使用
            debug!(upload_id = %upload_id, "closing session of cancelled upload");
            self.close_session(session_uri);
            return;
        };

        handle.record.session_uri = Some(session_uri);
        if handle.record.status == UploadStatus::Initializing {
            if let Err(err) = handle.record.transition(UploadStatus::Uploading) {
                warn!(upload_id = %upload_id, error = %err, "failed to start uploading");
            }
        }

        self.persist().await;
        self.publish_updated(upload_id);
    }

    async fn handle_progress(&mut self, upload_id: UploadId, uploaded_bytes: u64) {
        let persist_every = self.config.persist_every.max(1);
        let Some(handle) = self.find_mut(upload_id) else {
            return;
        };

        if !handle.record.advance_to(uploaded_bytes) {
            return;
        }

        handle.chunks_since_save += 1;
        let should_save = handle.chunks_since_save >= persist_every;
        if should_save {
            handle.chunks_since_save = 0;
        }

        debug!(upload_id = %upload_id, uploaded_bytes, "upload progress");
        if should_save {
            self.persist().await;
        }
        self.publish_updated(upload_id);
    }

    async fn handle_finished(&mut self, upload_id: UploadId, result: Result<TransferOutcome>) {
        let Some(handle) = self.find_mut(upload_id) else {
            return;
        };

        handle.control = None;
        handle.join_handle = None;
        handle.chunks_since_save = 0;

        let transition = match result {
            Ok(TransferOutcome::Completed) => handle.record.transition(UploadStatus::Completed),
            Ok(TransferOutcome::Paused) => handle.record.transition(UploadStatus::Paused),
            Err(err) => {
                warn!(upload_id = %upload_id, error = %err, "upload failed");
                handle.record.fail(&err)
            }
        };

        match transition {
            Ok(from) => info!(upload_id = %upload_id, from = %from, to = %handle.record.status, "upload status changed"),
            Err(err) => warn!(upload_id = %upload_id, error = %err, "ignored transition"),
        }

        self.persist().await;
        self.publish_updated(upload_id);
    }

    fn spawn_worker(&mut self, upload_id: UploadId, source: Arc<dyn FileSource>) {
        let worker = UploadWorker {
            client: self.client.clone(),
            engine: self.engine.clone(),
            tokens: self.tokens.clone(),
            control: TransferControl::new(),
            reports: self.report_tx.clone(),
        };
        let control = worker.control.clone();

        let Some(handle) = self.find_mut(upload_id) else {
            return;
        };

        let job = UploadJob {
            upload_id,
            file: handle.record.file.clone(),
            folder_id: handle.record.folder_id.clone(),
            session_uri: handle.record.session_uri.clone(),
            uploaded_bytes: handle.record.uploaded_bytes,
            chunk_size: handle.record.chunk_size,
            source,
        };

        handle.control = Some(control);
        handle.join_handle = Some(tokio::spawn(worker.run(job)));
    }

    fn close_session(&mut self, session_uri: String) {
        let client = self.client.clone();
        let tokens = self.tokens.clone();

        self.background.retain(|task| !task.is_finished());
        self.background.push(tokio::spawn(async move {
            match tokens.get_token(false).await {
                Some(token) => client.close_session(&session_uri, &token).await,
                None => warn!("no token available, leaving session to expire"),
            }
        }));
    }

    /// Stop every running upload, wait for them to reach a chunk boundary,
    /// apply what they reported and write a final snapshot.
    async fn shutdown(&mut self) {
        let mut running = Vec::new();
        for handle in &mut self.uploads {
            if let Some(control) = &handle.control {
                control.stop();
            }
            if let Some(join_handle) = handle.join_handle.take() {
                running.push(join_handle);
            }
        }

        info!(running = running.len(), "shutting down upload manager");
        let aborts: Vec<_> = running.iter().map(|task| task.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(running)).await.is_err() {
            warn!("uploads did not stop in time, aborting");
            aborts.iter().for_each(|abort| abort.abort());
        }

        while let Ok(report) = self.report_rx.try_recv() {
            self.handle_report(report).await;
        }

        let background = std::mem::take(&mut self.background);
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, join_all(background)).await;

        self.persist().await;
    }

    fn records(&self) -> Vec<UploadRecord> {
        self.uploads.iter().map(|handle| handle.record.clone()).collect()
    }

    fn find(&self, upload_id: UploadId) -> Option<&UploadHandle> {
        self.uploads.iter().find(|handle| handle.record.id == upload_id)
    }

    fn find_mut(&mut self, upload_id: UploadId) -> Option<&mut UploadHandle> {
        self.uploads.iter_mut().find(|handle| handle.record.id == upload_id)
    }

    async fn persist(&self) {
        self.gateway.save(&self.records()).await;
    }

    fn publish_updated(&self, upload_id: UploadId) {
        if let Some(handle) = self.find(upload_id) {
            self.events.publish(UploadEvent::Updated { upload: handle.record.clone() });
        }
    }
}
