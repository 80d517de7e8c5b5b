use std::time::Duration;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;
use super::constants::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_SECS};
use super::errors::{Result, UploadError};
use super::types::FileDescriptor;

/// "Resume incomplete"
const RESUME_INCOMPLETE: StatusCode = StatusCode::PERMANENT_REDIRECT;

#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Server answer to one chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAck {
    /// 308, keep sending from the end of this chunk
    Incomplete,
    /// 200/201, the object exists now
    Complete,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionMetadata<'a> {
    name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<[&'a str; 1]>,
}

/// Client for the resumable-session API.
#[derive(Debug, Clone)]
pub struct SessionClient {
    client: Client,
    endpoint: String,
}

impl SessionClient {
    pub fn new(config: SessionClientConfig) -> Result<Self> {
        // 308 是协议的一部分，不能当成重定向
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::none())
            .build()?;
        Url::parse(&config.endpoint)?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
        })
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Self::new(SessionClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        })
    }

    fn bearer(token: &str) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub fn content_range(start: u64, end: u64, total: u64) -> String {
        if end <= start {
            return format!("bytes */{}", total);
        }
        format!("bytes {}-{}/{}", start, end - 1, total)
    }

    fn resolve_location(&self, location: &str) -> Result<String> {
        match Url::parse(location) {
            Ok(url) => Ok(url.to_string()),
            // 相对地址，基于 endpoint 解析
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse(&self.endpoint)?;
                Ok(base.join(location)?.to_string())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open a resumable session and return its locator.
    pub async fn open_session(
        &self,
        file: &FileDescriptor,
        folder_id: Option<&str>,
        token: &str,
    ) -> Result<String> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut().append_pair("uploadType", "resumable");

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, Self::bearer(token)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=UTF-8"));
        headers.insert("X-Upload-Content-Type", HeaderValue::from_str(&file.mime_type)?);
        headers.insert("X-Upload-Content-Length", HeaderValue::from(file.size_bytes));

        let metadata = SessionMetadata {
            name: &file.name,
            mime_type: &file.mime_type,
            parents: folder_id.map(|id| [id]),
        };

        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&metadata)
            .send()
            .await
            .map_err(|err| UploadError::negotiation(0, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::negotiation(
                status.as_u16(),
                format!("Failed to create upload session: {}", body.trim()),
            ));
        }

        let location = match response.headers().get(LOCATION) {
            Some(loc) => loc
                .to_str()
                .map_err(|err| UploadError::negotiation(status.as_u16(), err.to_string()))?,
            None => {
                return Err(UploadError::negotiation(
                    status.as_u16(),
                    "No 'location' header in response",
                ));
            }
        };

        let session_uri = self.resolve_location(location)?;
        debug!(name = %file.name, size = file.size_bytes, "opened upload session");

        Ok(session_uri)
    }

    /// Send the bytes for `[start, end)`. An empty range asks the server for
    /// the session status instead.
    pub async fn put_chunk(
        &self,
        session_uri: &str,
        start: u64,
        end: u64,
        total: u64,
        body: Bytes,
        token: &str,
    ) -> Result<ChunkAck> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, Self::bearer(token)?);
        headers.insert(CONTENT_RANGE, HeaderValue::from_str(&Self::content_range(start, end, total))?);

        let response = self
            .client
            .put(session_uri)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status {
            RESUME_INCOMPLETE => Ok(ChunkAck::Incomplete),
            StatusCode::OK | StatusCode::CREATED => Ok(ChunkAck::Complete),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(UploadError::SessionExpired(format!(
                "session answered {}",
                status
            ))),
            _ => Err(UploadError::transfer(
                status.as_u16(),
                format!("Failed to upload bytes {}-{}", start, end),
            )),
        }
    }

    /// Best-effort delete of a session, failures are only logged.
    pub async fn close_session(&self, session_uri: &str, token: &str) {
        let auth = match Self::bearer(token) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "skipping session delete");
                return;
            }
        };

        match self.client.delete(session_uri).header(AUTHORIZATION, auth).send().await {
            Ok(response) => debug!(status = %response.status(), "closed upload session"),
            Err(err) => warn!(error = %err, "failed to close upload session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_format() {
        assert_eq!(SessionClient::content_range(0, 5, 12), "bytes 0-4/12");
        assert_eq!(SessionClient::content_range(10, 12, 12), "bytes 10-11/12");
        assert_eq!(SessionClient::content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn test_relative_location_is_resolved() {
        let client = SessionClient::with_endpoint("https://storage.example.com/upload/files").unwrap();

        assert_eq!(
            client.resolve_location("/upload/files?upload_id=abc").unwrap(),
            "https://storage.example.com/upload/files?upload_id=abc"
        );
        assert_eq!(
            client.resolve_location("https://other.example.com/s/1").unwrap(),
            "https://other.example.com/s/1"
        );
        assert_eq!(
            client.resolve_location("httpbin/x").unwrap(),
            "https://storage.example.com/upload/httpbin/x"
        );
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(matches!(SessionClient::with_endpoint("not a url"), Err(UploadError::InvalidUrl(_))));
    }

    #[test]
    fn test_session_metadata_shape() {
        let metadata = SessionMetadata { name: "a.txt", mime_type: "text/plain", parents: Some(["folder-1"]) };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value, serde_json::json!({"name": "a.txt", "mimeType": "text/plain", "parents": ["folder-1"]}));

        let metadata = SessionMetadata { name: "a.txt", mime_type: "text/plain", parents: None };
        assert!(serde_json::to_value(&metadata).unwrap().get("parents").is_none());
    }
}
