use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use crate::upload::{Result, UploadError};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 计算第 n 次重试的延迟（从 0 开始）
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powi(attempt.min(64) as i32);
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay)
            }
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数，None 表示无限重试
    pub max_attempts: Option<u32>,
    /// 重试策略
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Retry forever with the same delay between attempts.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.get_delay(attempt)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// 默认重试间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Transient failures are retried forever with a fixed delay; the transfer
/// only ends when it succeeds or is stopped.
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_RETRY_DELAY)
    }
}

/// Outcome of a retried operation that can be stopped from outside.
#[derive(Debug, PartialEq)]
pub enum Retried<T> {
    Done(T),
    Stopped,
}

/// Run `operation` until it succeeds, fails with a non-transient error, the
/// policy gives up, or `stop` fires. The backoff sleep races `stop`, an
/// attempt already in flight is allowed to finish.
pub async fn retry_until_stopped<F, Fut, T>(
    policy: &RetryPolicy,
    stop: &CancellationToken,
    mut operation: F,
) -> Result<Retried<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;

    loop {
        if stop.is_cancelled() {
            return Ok(Retried::Stopped);
        }

        let error = match operation().await {
            Ok(value) => return Ok(Retried::Done(value)),
            Err(error) if error.is_transient() => error,
            Err(error) => return Err(error),
        };

        failures += 1;
        if policy.exhausted(failures) {
            return Err(UploadError::RetriesExhausted {
                attempts: failures,
                last_error: error.to_string(),
            });
        }

        let delay = policy.delay_for(failures - 1);
        warn!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %error, "transient failure, retrying");

        tokio::select! {
            _ = sleep(delay) => {}
            _ = stop.cancelled() => return Ok(Retried::Stopped),
        }
    }
}
