mod client;
mod constants;
mod control;
mod engine;
mod errors;
mod manager;
mod manager_worker;
mod worker;
pub mod command;
pub mod events;
pub mod record;
pub mod source;
pub mod state;
pub mod store;
pub mod token;
pub mod types;

pub use client::{ChunkAck, SessionClient, SessionClientConfig};
pub use constants::{
    CHUNK_GRANULARITY, DEFAULT_CHUNK_SIZE, DEFAULT_ENDPOINT, DEFAULT_PERSIST_EVERY, DEFAULT_TIMEOUT_SECS,
};
pub use control::TransferControl;
pub use engine::{ChunkEngine, ChunkJob, TransferOutcome};
pub use errors::{Result, UploadError};
pub use manager::{UploadManager, UploadManagerHandle};
