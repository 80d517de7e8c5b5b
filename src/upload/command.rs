//! Message-style command surface used by UI front ends.
//!
//! Requests are tagged by `command`:
//!
//! ```json
//! {"command": "startUpload", "file": "/tmp/video.mp4", "folderId": "abc"}
//! {"command": "pauseUpload", "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427"}
//! ```
//!
//! Every request gets exactly one response, either a success payload or
//! `{"error": "..."}`.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use super::record::UploadRecord;
use super::types::UploadId;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Request {
    GetUploads,

    StartUpload {
        file: PathBuf,
        #[serde(rename = "folderId", default)]
        folder_id: Option<String>,
    },

    PauseUpload {
        id: UploadId,
    },

    ResumeUpload {
        id: UploadId,
        file: PathBuf,
    },

    CancelUpload {
        id: UploadId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Uploads {
        uploads: Vec<UploadRecord>,
    },

    Started {
        id: UploadId,
    },

    Ack {
        ok: bool,
    },

    Error {
        error: String,
    },
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}
