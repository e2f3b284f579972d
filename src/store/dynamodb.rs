use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{types::AttributeValue, Client as DynamoClient};
use tracing::{debug, instrument, trace};

use crate::retry::{ExponentialBackoff, RetryConfig, RetryHandle};
use crate::store::{CheckpointStore, StreamKey};

const KEY_ATTRIBUTE: &str = "checkpoint_key";
const TIMESTAMP_ATTRIBUTE: &str = "timestamp_ms";

/// Durable checkpoint storage in a DynamoDB table.
///
/// The table's partition key is a string attribute named `checkpoint_key`.
#[derive(Debug, Clone)]
pub struct DynamoDbCheckpointStore {
    client: DynamoClient,
    table_name: String,
    key_prefix: String,
    retry_config: RetryConfig,
    backoff: ExponentialBackoff,
}

impl DynamoDbCheckpointStore {
    pub fn builder() -> DynamoDbCheckpointStoreBuilder {
        DynamoDbCheckpointStoreBuilder::new()
    }

    fn item_key(&self, key: &StreamKey) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn retry_handle(&self) -> RetryHandle<ExponentialBackoff> {
        RetryHandle::new(self.retry_config.clone(), self.backoff.clone())
    }
}

#[async_trait]
impl CheckpointStore for DynamoDbCheckpointStore {
    #[instrument(skip(self, key), fields(key = %key, table = %self.table_name))]
    async fn get_checkpoint(&self, key: &StreamKey) -> anyhow::Result<Option<i64>> {
        let item_key = self.item_key(key);

        let checkpoint = self
            .retry_handle()
            .retry(|| {
                let item_key = item_key.clone();
                async move {
                    let response = self
                        .client
                        .get_item()
                        .table_name(&self.table_name)
                        .key(KEY_ATTRIBUTE, AttributeValue::S(item_key))
                        .consistent_read(true)
                        .send()
                        .await
                        .context("Failed to get checkpoint from DynamoDB")?;

                    let raw = response
                        .item
                        .and_then(|item| item.get(TIMESTAMP_ATTRIBUTE).cloned())
                        .and_then(|attr| attr.as_n().ok().cloned());

                    raw.map(|n| {
                        n.parse::<i64>()
                            .with_context(|| format!("Invalid checkpoint value {:?}", n))
                    })
                    .transpose()
                }
            })
            .await?;

        debug!(checkpoint = ?checkpoint, "Retrieved checkpoint from DynamoDB");
        Ok(checkpoint)
    }

    #[instrument(skip(self, key), fields(key = %key, table = %self.table_name))]
    async fn save_checkpoint(&self, key: &StreamKey, timestamp_ms: i64) -> anyhow::Result<()> {
        let item_key = self.item_key(key);

        self.retry_handle()
            .retry(|| {
                let item_key = item_key.clone();
                async move {
                    self.client
                        .put_item()
                        .table_name(&self.table_name)
                        .item(KEY_ATTRIBUTE, AttributeValue::S(item_key))
                        .item("log_group", AttributeValue::S(key.group.clone()))
                        .item("log_stream", AttributeValue::S(key.stream.clone()))
                        .item(TIMESTAMP_ATTRIBUTE, AttributeValue::N(timestamp_ms.to_string()))
                        .send()
                        .await
                        .context("Failed to save checkpoint to DynamoDB")?;

                    trace!(timestamp_ms, "Checkpoint written to DynamoDB");
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await?;

        debug!(timestamp_ms, "Saved checkpoint to DynamoDB");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DynamoDbCheckpointStoreBuilder {
    client: Option<DynamoClient>,
    table_name: Option<String>,
    key_prefix: Option<String>,
    retry_config: RetryConfig,
}

impl DynamoDbCheckpointStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: DynamoClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Prefix prepended to every item key, for sharing a table between operators
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(key_prefix.into());
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<DynamoDbCheckpointStore> {
        let backoff = self.retry_config.backoff();
        Ok(DynamoDbCheckpointStore {
            client: self
                .client
                .ok_or_else(|| anyhow::anyhow!("DynamoDB client is required"))?,
            table_name: self
                .table_name
                .ok_or_else(|| anyhow::anyhow!("Table name is required"))?,
            key_prefix: self.key_prefix.unwrap_or_default(),
            retry_config: self.retry_config,
            backoff,
        })
    }
}
