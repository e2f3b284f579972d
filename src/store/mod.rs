//! Checkpoint storage for the poller
//!
//! A checkpoint records, per (log group, log stream), the timestamp of the
//! last event handed to the sink. The next cycle reads from one millisecond
//! after it.

use async_trait::async_trait;
use std::fmt;

#[cfg(feature = "dynamodb-store")]
pub mod dynamodb;
pub mod memory;

/// Identifies one log stream within one log group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub group: String,
    pub stream: String,
}

impl StreamKey {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
        }
    }
}

// Stream names cannot contain ':' so the rendering is unambiguous.
impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.stream)
    }
}

/// Trait for checkpoint storage implementations
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Timestamp (ms) of the last emitted event for `key`, if any
    async fn get_checkpoint(&self, key: &StreamKey) -> anyhow::Result<Option<i64>>;

    /// Record that every event of `key` up to `timestamp_ms` was emitted
    async fn save_checkpoint(&self, key: &StreamKey, timestamp_ms: i64) -> anyhow::Result<()>;
}

#[cfg(feature = "dynamodb-store")]
pub use dynamodb::DynamoDbCheckpointStore;
pub use memory::InMemoryCheckpointStore;
