//! Hand-off of retrieved events to the downstream pipeline

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::RawEvent;
use crate::store::StreamKey;

/// A log event attributed to its source, ready for the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    pub log_group: String,
    pub log_stream: String,
    /// Event time in milliseconds since the epoch
    pub timestamp: i64,
    /// Ingestion time in milliseconds since the epoch
    pub ingestion_time: i64,
    pub message: String,
}

impl EmittedEvent {
    pub fn from_raw(key: &StreamKey, raw: RawEvent) -> Self {
        Self {
            log_group: key.group.clone(),
            log_stream: key.stream.clone(),
            timestamp: raw.timestamp,
            ingestion_time: raw.ingestion_time,
            message: raw.message,
        }
    }
}

/// Receives events from the poller, once per event, in increasing
/// timestamp order within each stream.
///
/// An error aborts the rest of that stream's batch; its checkpoint is not
/// advanced so the window is read again next cycle.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: EmittedEvent) -> anyhow::Result<()>;
}

/// [`EventSink`] forwarding into a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<EmittedEvent>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<EmittedEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: EmittedEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("Channel send error: {}", e))
    }
}
