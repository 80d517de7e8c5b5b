use thiserror::Error;
use super::types::UploadId;
use super::state::UploadStatus;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Session negotiation failed: status code {status}, message: {message}")]
    Negotiation {
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Chunk transfer failed: status code {status}, message: {message}")]
    Transfer {
        status: u16,
        message: String,
    },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },

    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Upload not found: {0}")]
    NotFound(UploadId),

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: UploadStatus,
        to: UploadStatus,
    },

    #[error("File does not match the upload: expected {expected} bytes, found {actual}")]
    FileMismatch {
        expected: u64,
        actual: u64,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn negotiation(status: u16, message: impl Into<String>) -> Self {
        Self::Negotiation {
            status,
            message: message.into(),
        }
    }

    pub fn transfer(status: u16, message: impl Into<String>) -> Self {
        Self::Transfer {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 可重试的错误：非 2xx/308 的分块响应或网络层失败
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::Http(_))
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
