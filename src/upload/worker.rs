use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use super::client::SessionClient;
use super::control::TransferControl;
use super::engine::{ChunkEngine, ChunkJob, TransferOutcome};
use super::errors::{Result, UploadError};
use super::source::FileSource;
use super::token::TokenProvider;
use super::types::{FileDescriptor, UploadId};

/// Messages a running upload sends back to the manager.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    SessionOpened {
        upload_id: UploadId,
        session_uri: String,
    },

    Progress {
        upload_id: UploadId,
        uploaded_bytes: u64,
    },

    Finished {
        upload_id: UploadId,
        result: Result<TransferOutcome>,
    },
}

/// Everything a worker needs from the record, copied at spawn time.
pub(crate) struct UploadJob {
    pub upload_id: UploadId,
    pub file: FileDescriptor,
    pub folder_id: Option<String>,
    pub session_uri: Option<String>,
    pub uploaded_bytes: u64,
    pub chunk_size: u64,
    pub source: Arc<dyn FileSource>,
}

pub(crate) struct UploadWorker {
    pub(crate) client: SessionClient,
    pub(crate) engine: ChunkEngine,
    pub(crate) tokens: Arc<dyn TokenProvider>,
    pub(crate) control: TransferControl,
    pub(crate) reports: mpsc::UnboundedSender<WorkerReport>,
}

impl UploadWorker {
    pub async fn run(self, job: UploadJob) {
        let upload_id = job.upload_id;
        let result = self.drive(job).await;

        match &result {
            Ok(outcome) => info!(upload_id = %upload_id, ?outcome, "upload run finished"),
            Err(err) => info!(upload_id = %upload_id, error = %err, "upload run failed"),
        }

        let _ = self.reports.send(WorkerReport::Finished { upload_id, result });
    }

    async fn drive(&self, job: UploadJob) -> Result<TransferOutcome> {
        let session_uri = match job.session_uri {
            Some(uri) => uri,
            None => {
                if self.control.is_stopped() {
                    return Ok(TransferOutcome::Paused);
                }

                let uri = self.open_session(&job.file, job.folder_id.as_deref()).await?;
                let _ = self.reports.send(WorkerReport::SessionOpened {
                    upload_id: job.upload_id,
                    session_uri: uri.clone(),
                });
                uri
            }
        };

        let chunk_job = ChunkJob {
            upload_id: job.upload_id,
            session_uri,
            uploaded_bytes: job.uploaded_bytes,
            size_bytes: job.file.size_bytes,
            chunk_size: job.chunk_size,
        };
        debug!(upload_id = %job.upload_id, offset = job.uploaded_bytes, "starting chunk transfer");

        let reports = self.reports.clone();
        let upload_id = job.upload_id;
        self.engine
            .run(
                &chunk_job,
                job.source.as_ref(),
                self.tokens.as_ref(),
                &self.control,
                move |uploaded_bytes| {
                    let _ = reports.send(WorkerReport::Progress { upload_id, uploaded_bytes });
                },
            )
            .await
    }

    async fn open_session(&self, file: &FileDescriptor, folder_id: Option<&str>) -> Result<String> {
        let token = self
            .tokens
            .get_token(false)
            .await
            .ok_or_else(|| UploadError::Auth("No access token available".to_string()))?;

        self.client.open_session(file, folder_id, &token).await
    }
}
