use std::time::Duration;
use bytes::Bytes;
use uplift::upload::{ChunkEngine, ChunkJob, SessionClient, TransferControl, TransferOutcome};
use uplift::utils::RetryPolicy;
use uplift::{StaticToken, UploadError, UploadId};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MIB: u64 = 1024 * 1024;

fn engine(server: &MockServer, retry: RetryPolicy) -> ChunkEngine {
    let client = SessionClient::with_endpoint(&format!("{}/upload", server.uri())).unwrap();
    ChunkEngine::new(client, retry)
}

fn job(server: &MockServer, uploaded_bytes: u64, size_bytes: u64, chunk_size: u64) -> ChunkJob {
    ChunkJob {
        upload_id: UploadId::new(),
        session_uri: format!("{}/session/1", server.uri()),
        uploaded_bytes,
        size_bytes,
        chunk_size,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::unbounded(Duration::from_millis(10))
}

async fn content_ranges(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|request| request.headers.get("content-range"))
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

fn chunk(server_range: &str, status: u16) -> Mock {
    Mock::given(method("PUT"))
        .and(path("/session/1"))
        .and(header("content-range", server_range))
        .respond_with(ResponseTemplate::new(status))
}

#[tokio::test]
async fn test_chunks_are_sent_in_order() {
    let server = MockServer::start().await;
    chunk("bytes 0-5242879/12582912", 308).expect(1).mount(&server).await;
    chunk("bytes 5242880-10485759/12582912", 308).expect(1).mount(&server).await;
    chunk("bytes 10485760-12582911/12582912", 200).expect(1).mount(&server).await;

    let data = Bytes::from(vec![7u8; (12 * MIB) as usize]);
    let job = job(&server, 0, 12 * MIB, 5 * MIB);
    let tokens = StaticToken::new("token");
    let control = TransferControl::new();

    let mut progress = Vec::new();
    let outcome = engine(&server, fast_retry())
        .run(&job, &data, &tokens, &control, |offset| progress.push(offset))
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(progress, vec![5 * MIB, 10 * MIB, 12 * MIB]);
    assert_eq!(
        content_ranges(&server).await,
        vec![
            "bytes 0-5242879/12582912",
            "bytes 5242880-10485759/12582912",
            "bytes 10485760-12582911/12582912",
        ]
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].body.len() as u64, 5 * MIB);
    assert_eq!(requests[2].body.len() as u64, 2 * MIB);
    assert_eq!(requests[0].headers.get("authorization").unwrap(), "Bearer token");
}

#[tokio::test]
async fn test_transfer_continues_from_offset() {
    let server = MockServer::start().await;
    chunk("bytes 8-11/12", 200).expect(1).mount(&server).await;

    let data = Bytes::from_static(b"abcdefghijkl");
    let job = job(&server, 8, 12, 4);

    let outcome = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"ijkl");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    chunk("bytes 0-7/8", 503).up_to_n_times(2).mount(&server).await;
    chunk("bytes 0-7/8", 200).expect(1).mount(&server).await;

    let data = Bytes::from_static(b"01234567");
    let job = job(&server, 0, 8, 8);

    let outcome = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(content_ranges(&server).await, vec!["bytes 0-7/8"; 3]);
}

#[tokio::test]
async fn test_bounded_retry_gives_up() {
    let server = MockServer::start().await;
    chunk("bytes 0-7/8", 500).mount(&server).await;

    let data = Bytes::from_static(b"01234567");
    let job = job(&server, 0, 8, 8);
    let retry = RetryPolicy::unbounded(Duration::from_millis(1)).with_max_attempts(3);

    let result = engine(&server, retry)
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await;

    assert!(matches!(result, Err(UploadError::RetriesExhausted { attempts: 3, .. })));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_expired_session_is_not_retried() {
    let server = MockServer::start().await;
    chunk("bytes 0-3/8", 404).mount(&server).await;

    let data = Bytes::from_static(b"01234567");
    let job = job(&server, 0, 8, 4);

    let result = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await;

    assert!(matches!(result, Err(UploadError::SessionExpired(_))));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_file_probes_session() {
    let server = MockServer::start().await;
    chunk("bytes */0", 200).expect(1).mount(&server).await;

    let job = job(&server, 0, 0, 4);
    let mut progress = Vec::new();

    let outcome = engine(&server, fast_retry())
        .run(&job, &Bytes::new(), &StaticToken::new("token"), &TransferControl::new(), |offset| {
            progress.push(offset)
        })
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(progress, vec![0]);
}

#[tokio::test]
async fn test_unconfirmed_last_chunk_is_probed() {
    let server = MockServer::start().await;
    chunk("bytes 0-3/4", 308).expect(1).mount(&server).await;
    chunk("bytes */4", 201).expect(1).mount(&server).await;

    let data = Bytes::from_static(b"abcd");
    let job = job(&server, 0, 4, 4);

    let outcome = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(content_ranges(&server).await, vec!["bytes 0-3/4", "bytes */4"]);
}

#[tokio::test]
async fn test_stopped_control_sends_nothing() {
    let server = MockServer::start().await;

    let data = Bytes::from_static(b"01234567");
    let job = job(&server, 0, 8, 4);
    let control = TransferControl::new();
    control.stop();

    let outcome = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &control, |_| {})
        .await
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Paused);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_fails_without_request() {
    let server = MockServer::start().await;

    let data = Bytes::from_static(b"01234567");
    let job = job(&server, 0, 8, 4);

    let result = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::none(), &TransferControl::new(), |_| {})
        .await;

    assert!(matches!(result, Err(UploadError::Auth(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_short_source_is_an_error() {
    let server = MockServer::start().await;

    // 记录的大小比实际数据多
    let data = Bytes::from_static(b"0123");
    let job = job(&server, 0, 8, 8);

    let result = engine(&server, fast_retry())
        .run(&job, &data, &StaticToken::new("token"), &TransferControl::new(), |_| {})
        .await;

    assert!(matches!(result, Err(UploadError::Io(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}
