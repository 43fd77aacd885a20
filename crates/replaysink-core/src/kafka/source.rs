//! The stream operations the ingestion engine depends on.

use super::consumer::{PollResult, RecordingConsumer};
use crate::fragment::{OffsetToken, PartitionKey};
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A partitioned stream of recording fragments with manual offset control.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Topic being consumed.
    fn topic(&self) -> &str;

    /// Wait up to `timeout` for the next fragment.
    async fn next_fragment(&self, timeout: Duration) -> PollResult;

    /// Acknowledge every fragment up to and including `token`.
    async fn commit_through(&self, token: &OffsetToken) -> Result<()>;

    /// Make the next fragment delivered for `partition` the one at `offset`.
    fn rewind(&self, partition: &PartitionKey, offset: i64) -> Result<()>;

    /// Partitions currently assigned to this consumer.
    fn assigned_partitions(&self) -> Result<Vec<PartitionKey>>;
}

#[async_trait]
impl RecordingSource for RecordingConsumer {
    fn topic(&self) -> &str {
        RecordingConsumer::topic(self)
    }

    async fn next_fragment(&self, timeout: Duration) -> PollResult {
        self.poll_with_backoff(timeout).await
    }

    async fn commit_through(&self, token: &OffsetToken) -> Result<()> {
        self.commit_offset_with_retry(token).await
    }

    fn rewind(&self, partition: &PartitionKey, offset: i64) -> Result<()> {
        self.seek(partition, offset)
    }

    fn assigned_partitions(&self) -> Result<Vec<PartitionKey>> {
        self.assignment()
    }
}
