use bytes::Bytes;
use tracing::{debug, instrument};
use crate::utils::{retry_until_stopped, Retried, RetryPolicy};
use super::client::{ChunkAck, SessionClient};
use super::control::TransferControl;
use super::errors::{Result, UploadError};
use super::source::FileSource;
use super::token::TokenProvider;
use super::types::UploadId;

/// Where a transfer starts and what it sends to.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub upload_id: UploadId,
    pub session_uri: String,
    pub uploaded_bytes: u64,
    pub size_bytes: u64,
    pub chunk_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 服务器确认所有字节
    Completed,
    /// 在分块边界处被暂停或取消
    Paused,
}

/// Sends the byte ranges of one upload, strictly in order.
#[derive(Debug, Clone)]
pub struct ChunkEngine {
    client: SessionClient,
    retry: RetryPolicy,
}

impl ChunkEngine {
    pub fn new(client: SessionClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Drive `job` from its current offset to the end of the file.
    ///
    /// `on_progress` is called with the new offset after every chunk the
    /// server acknowledged. Transient failures are retried on the same
    /// range according to the retry policy; a stop request ends the loop
    /// before the next chunk is sent.
    #[instrument(skip_all, fields(upload_id = %job.upload_id))]
    pub async fn run<F>(
        &self,
        job: &ChunkJob,
        source: &dyn FileSource,
        tokens: &dyn TokenProvider,
        control: &TransferControl,
        mut on_progress: F,
    ) -> Result<TransferOutcome>
    where
        F: FnMut(u64) + Send,
    {
        let total = job.size_bytes;
        let chunk_size = job.chunk_size.max(1);
        let mut offset = job.uploaded_bytes.min(total);

        while offset < total {
            if control.is_stopped() {
                debug!(offset, "stopped before reading chunk");
                return Ok(TransferOutcome::Paused);
            }

            let end = offset.saturating_add(chunk_size).min(total);
            let body = source.read_range(offset, end).await?;
            if body.len() as u64 != end - offset {
                return Err(UploadError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("Expected {} bytes at offset {}, got {}", end - offset, offset, body.len()),
                )));
            }

            // 读完文件之后再检查一次，保证不会发出被暂停的分块
            if control.is_stopped() {
                debug!(offset, "stopped before sending chunk");
                return Ok(TransferOutcome::Paused);
            }

            let ack = match self.send_with_retry(job, offset, end, body, tokens, control).await? {
                Retried::Done(ack) => ack,
                Retried::Stopped => return Ok(TransferOutcome::Paused),
            };

            debug!(start = offset, end, total, ?ack, "chunk acknowledged");
            match ack {
                ChunkAck::Incomplete => {
                    offset = end;
                    on_progress(offset);
                }
                ChunkAck::Complete => {
                    on_progress(total);
                    return Ok(TransferOutcome::Completed);
                }
            }
        }

        // 空文件，或者所有字节都发完了但服务器还没确认完成
        let ack = match self.send_with_retry(job, total, total, Bytes::new(), tokens, control).await? {
            Retried::Done(ack) => ack,
            Retried::Stopped => return Ok(TransferOutcome::Paused),
        };

        match ack {
            ChunkAck::Complete => {
                on_progress(total);
                Ok(TransferOutcome::Completed)
            }
            ChunkAck::Incomplete => Err(UploadError::internal(format!(
                "Session still incomplete after all {} bytes were sent",
                total
            ))),
        }
    }

    async fn send_with_retry(
        &self,
        job: &ChunkJob,
        start: u64,
        end: u64,
        body: Bytes,
        tokens: &dyn TokenProvider,
        control: &TransferControl,
    ) -> Result<Retried<ChunkAck>> {
        retry_until_stopped(&self.retry, control.token(), move || {
            self.send_chunk(job, start, end, body.clone(), tokens)
        })
        .await
    }

    async fn send_chunk(
        &self,
        job: &ChunkJob,
        start: u64,
        end: u64,
        body: Bytes,
        tokens: &dyn TokenProvider,
    ) -> Result<ChunkAck> {
        let token = tokens
            .get_token(false)
            .await
            .ok_or_else(|| UploadError::Auth("No access token available".to_string()))?;

        self.client
            .put_chunk(&job.session_uri, start, end, job.size_bytes, body, &token)
            .await
    }
}
