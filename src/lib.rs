//! CloudWatch Log Poller - incremental ingestion of CloudWatch Logs
//!
//! This crate polls CloudWatch log groups on an interval, remembers per
//! stream how far it has read, and hands every new event to a sink once.
//! Group and stream names may contain time directives (`%Y`, `%m`, `%d`, ...)
//! that are evaluated at the start of each cycle.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod layout;
pub mod monitoring;
pub mod poller;
pub mod retry;
pub mod sink;
pub mod store;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;

pub use config::{InputConfig, PollConfig, ResolvedPlan, SourceSelector, StartAt};
pub use error::{ConfigError, LogsClientError, PollerError, Result};
pub use poller::{CycleSummary, LogPoller, PollerOptions};
pub use retry::{Backoff, ExponentialBackoff};

// Re-export main traits
pub use crate::client::LogsClientTrait;
pub use crate::sink::{ChannelSink, EmittedEvent, EventSink};
pub use crate::store::{CheckpointStore, StreamKey};

// Re-export implementations
#[cfg(feature = "memory-store")]
pub use crate::store::memory::InMemoryCheckpointStore;

#[cfg(feature = "dynamodb-store")]
pub use crate::store::dynamodb::DynamoDbCheckpointStore;
