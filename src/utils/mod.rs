pub mod format;
pub mod retry;

pub use format::{format_bytes, format_duration, format_record};
pub use retry::{retry_until_stopped, Retried, RetryPolicy, RetryStrategy, DEFAULT_RETRY_DELAY};
