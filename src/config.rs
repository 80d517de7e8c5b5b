//! `uplift.toml` loading.
//!
//! ```toml
//! endpoint = "https://www.googleapis.com/upload/drive/v3/files"
//! token = "ya29..."
//! state_file = "uploads.json"
//! chunk_size = 5242880
//!
//! [retry]
//! strategy = "exponential"
//! delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 10
//! ```
//!
//! Every key is optional. Without a `[retry]` section transient failures are
//! retried every second until the upload succeeds or is paused.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;
use crate::upload::types::UploadConfig;
use crate::upload::{
    SessionClientConfig, CHUNK_GRANULARITY, DEFAULT_CHUNK_SIZE, DEFAULT_ENDPOINT, DEFAULT_PERSIST_EVERY,
    DEFAULT_TIMEOUT_SECS,
};
use crate::utils::{RetryPolicy, RetryStrategy, DEFAULT_RETRY_DELAY};

/// Environment variable consulted when the config has no token.
pub const TOKEN_ENV: &str = "UPLIFT_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Fixed,
    Exponential,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub strategy: StrategyKind,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// 0 表示无限重试
    pub max_attempts: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Fixed,
            delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        let strategy = match self.strategy {
            StrategyKind::Fixed => RetryStrategy::Fixed(Duration::from_millis(self.delay_ms)),
            StrategyKind::Exponential => RetryStrategy::Exponential {
                initial: Duration::from_millis(self.delay_ms),
                multiplier: self.multiplier,
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
        };

        RetryPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            strategy,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    pub state_file: PathBuf,
    pub chunk_size: u64,
    pub persist_every: u32,
    pub chunk_timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: None,
            state_file: PathBuf::from("uploads.json"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            persist_every: DEFAULT_PERSIST_EVERY,
            chunk_timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: RetrySection::default(),
        }
    }
}

impl Config {
    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_GRANULARITY != 0 {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be a positive multiple of {} bytes, got {}",
                CHUNK_GRANULARITY, self.chunk_size
            )));
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be at least 1.0".to_string()));
        }

        if url::Url::parse(&self.endpoint).is_err() {
            return Err(ConfigError::Invalid(format!("endpoint is not a url: {}", self.endpoint)));
        }

        Ok(())
    }

    /// The configured token, falling back to `UPLIFT_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|token| !token.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok())
    }

    pub fn client_config(&self) -> SessionClientConfig {
        SessionClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.chunk_timeout_secs.max(1)),
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            persist_every: self.persist_every.max(1),
            retry: self.retry.policy(),
            ..UploadConfig::default()
        }
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.upload_config().retry, RetryPolicy::default());
        assert_eq!(config.persist_every, DEFAULT_PERSIST_EVERY);
        assert_eq!(config.client_config().timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_default_retry_is_unbounded_fixed() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.retry.strategy, StrategyKind::Fixed);
        assert_eq!(config.retry.max_attempts, 0);
        assert_eq!(config.retry.policy(), RetryPolicy::unbounded(Duration::from_secs(1)));
    }

    #[test]
    fn test_bounded_exponential_retry_is_opt_in() {
        let config: Config = "[retry]\nstrategy = \"exponential\"\nmax_attempts = 10".parse().unwrap();
        let policy = config.upload_config().retry;

        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(
            policy.strategy,
            RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = r#"
            endpoint = "http://localhost:9000/upload"
            token = "abc"
            state_file = "/var/lib/uplift/state.json"
            chunk_size = 262144
            persist_every = 2

            [retry]
            strategy = "fixed"
            delay_ms = 250
            max_attempts = 0
        "#
        .parse()
        .unwrap();

        assert_eq!(config.endpoint, "http://localhost:9000/upload");
        assert_eq!(config.resolve_token().as_deref(), Some("abc"));
        assert_eq!(config.state_file, PathBuf::from("/var/lib/uplift/state.json"));

        let upload = config.upload_config();
        assert_eq!(upload.chunk_size, 262144);
        assert_eq!(upload.persist_every, 2);
        assert_eq!(upload.retry, RetryPolicy::unbounded(Duration::from_millis(250)));
    }

    #[test]
    fn test_chunk_size_must_align() {
        let result = "chunk_size = 1000".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = "chunk_size = 0".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_strategy_fails_to_parse() {
        let result = "[retry]\nstrategy = \"linear\"".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("uplift.toml")).unwrap();
        assert_eq!(config.persist_every, 4);
    }
}
