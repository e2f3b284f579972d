//! Error types for the CloudWatch Logs poller

use thiserror::Error;

/// Configuration problems, reported synchronously when the operator is built.
/// Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("log_stream_names and log_stream_name_prefix are mutually exclusive stream selectors")]
    ConflictingStreamSelectors,

    #[error("poll_interval must be positive")]
    InvalidPollInterval,

    #[error("event_limit {0} out of range, must be between 1 and 10000")]
    EventLimitOutOfRange(u32),

    #[error("invalid start_at {0:?}, expected \"beginning\" or \"end\"")]
    InvalidStartAt(String),

    #[error("one of log_group_name, log_groups or log_group_prefix is required")]
    MissingGroupSelector,

    #[error("missing required region")]
    MissingRegion,

    #[error("max_concurrent_streams must be at least 1")]
    InvalidConcurrency,
}

/// Errors surfaced by a [`LogsClientTrait`](crate::client::LogsClientTrait) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogsClientError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl LogsClientError {
    /// Authentication and authorization failures stop the poller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LogsClientError::AccessDenied(_))
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Main error type for poller operations
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authorization failed for {context}: {message}")]
    Authorization { context: String, message: String },

    #[error("Shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PollerError {
    pub fn authorization(context: impl Into<String>, err: &LogsClientError) -> Self {
        PollerError::Authorization {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, PollerError::Shutdown)
    }
}

/// Result type for poller operations
pub type Result<T> = std::result::Result<T, PollerError>;
