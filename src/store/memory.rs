use crate::store::{CheckpointStore, StreamKey};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

/// In-memory implementation of checkpoint storage.
///
/// Checkpoints do not survive a restart; use a durable store in production.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<StreamKey, i64>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        debug!("Initializing in-memory checkpoint store");
        Self::default()
    }

    /// Snapshot of every stored checkpoint
    pub async fn all_checkpoints(&self) -> HashMap<StreamKey, i64> {
        self.checkpoints.read().await.clone()
    }

    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn get_checkpoint(&self, key: &StreamKey) -> anyhow::Result<Option<i64>> {
        let checkpoint = self.checkpoints.read().await.get(key).copied();
        trace!(checkpoint = ?checkpoint, "Retrieved checkpoint from memory");
        Ok(checkpoint)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn save_checkpoint(&self, key: &StreamKey, timestamp_ms: i64) -> anyhow::Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(key.clone(), timestamp_ms);
        trace!(timestamp_ms, "Checkpoint saved to memory");
        Ok(())
    }
}
