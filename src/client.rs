use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::Client;
use std::fmt::Debug;
use tracing::{debug, trace};

use crate::config::{PollConfig, StreamFilter};
use crate::error::LogsClientError;

/// A log event as returned by the API, before it is attributed to a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Event time in milliseconds since the epoch
    pub timestamp: i64,
    /// Time CloudWatch received the event, milliseconds since the epoch
    pub ingestion_time: i64,
    pub message: String,
}

impl RawEvent {
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            ingestion_time: timestamp,
            message: message.into(),
        }
    }
}

/// The subset of the CloudWatch Logs API the poller needs
#[async_trait]
pub trait LogsClientTrait: Send + Sync {
    /// Names of log groups starting with `prefix`
    async fn list_groups(&self, prefix: &str) -> Result<Vec<String>, LogsClientError>;

    /// Names of the streams in `group` selected by `filter`
    async fn list_streams(
        &self,
        group: &str,
        filter: &StreamFilter,
    ) -> Result<Vec<String>, LogsClientError>;

    /// Up to `limit` events of one stream with timestamp >= `from_ms`,
    /// ordered by timestamp
    async fn get_events(
        &self,
        group: &str,
        stream: &str,
        from_ms: i64,
        limit: u32,
    ) -> Result<Vec<RawEvent>, LogsClientError>;
}

const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDeniedException",
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "ExpiredTokenException",
    "IncompleteSignature",
    "MissingAuthenticationToken",
];

/// Map an SDK failure onto the poller's retry taxonomy
fn classify<E, R>(err: SdkError<E, R>) -> LogsClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => return LogsClientError::Timeout(message),
        SdkError::DispatchFailure(_) => return LogsClientError::Connection(message),
        _ => {}
    }

    match err.code() {
        Some(code) if AUTH_ERROR_CODES.contains(&code) => LogsClientError::AccessDenied(message),
        Some("ResourceNotFoundException") => LogsClientError::ResourceNotFound(message),
        Some("ThrottlingException") | Some("LimitExceededException") => {
            LogsClientError::Throttled(message)
        }
        Some("ServiceUnavailableException") => LogsClientError::Connection(message),
        _ => LogsClientError::Other(message),
    }
}

#[async_trait]
impl LogsClientTrait for Client {
    async fn list_groups(&self, prefix: &str) -> Result<Vec<String>, LogsClientError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .describe_log_groups()
                .log_group_name_prefix(prefix)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(classify)?;

            groups.extend(
                response
                    .log_groups()
                    .iter()
                    .filter_map(|g| g.log_group_name().map(String::from)),
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = groups.len(), "Listed log groups");
        Ok(groups)
    }

    async fn list_streams(
        &self,
        group: &str,
        filter: &StreamFilter,
    ) -> Result<Vec<String>, LogsClientError> {
        if let StreamFilter::Names(names) = filter {
            return Ok(names.clone());
        }

        let prefix = match filter {
            StreamFilter::Prefix(prefix) => Some(prefix.clone()),
            _ => None,
        };

        let mut streams = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .describe_log_streams()
                .log_group_name(group)
                .set_log_stream_name_prefix(prefix.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(classify)?;

            streams.extend(
                response
                    .log_streams()
                    .iter()
                    .filter_map(|s| s.log_stream_name().map(String::from)),
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(group = %group, count = streams.len(), "Listed log streams");
        Ok(streams)
    }

    async fn get_events(
        &self,
        group: &str,
        stream: &str,
        from_ms: i64,
        limit: u32,
    ) -> Result<Vec<RawEvent>, LogsClientError> {
        let limit = limit as usize;
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        while events.len() < limit {
            let remaining = (limit - events.len()).min(i32::MAX as usize) as i32;
            let response = self
                .filter_log_events()
                .log_group_name(group)
                .log_stream_names(stream)
                .start_time(from_ms)
                .limit(remaining)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(classify)?;

            events.extend(response.events().iter().filter_map(|e| {
                let timestamp = e.timestamp()?;
                Some(RawEvent {
                    timestamp,
                    ingestion_time: e.ingestion_time().unwrap_or(timestamp),
                    message: e.message().unwrap_or_default().to_string(),
                })
            }));

            trace!(
                group = %group,
                stream = %stream,
                fetched = events.len(),
                "Fetched page of log events"
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        events.truncate(limit);
        Ok(events)
    }
}

/// Build an SDK client for the configured region and credential profile
pub async fn connect(config: &PollConfig) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));
    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }
    let shared = loader.load().await;
    Client::new(&shared)
}
