//! Per-partition buffering and flush.
//!
//! A `PartitionWorker` owns the only live `BufferState` for its partition,
//! together with the fragments that state is counting. It decides when to
//! flush, runs the commit, and reports what may be acknowledged upstream.

use crate::buffer::{BufferState, BufferThresholds, Clock, FlushReason};
use crate::commit::CommitExecutor;
use crate::error::BufferCommitFailed;
use crate::fragment::{Fragment, OffsetToken, PartitionKey};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of offering a worker the chance to flush.
///
/// `Ok(None)` means nothing was uploaded and there is nothing to commit.
pub type FlushOutcome = Result<Option<CommittedBatch>, BufferCommitFailed>;

/// A batch that is durably in blob storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBatch {
    /// Partition the batch came from
    pub partition: PartitionKey,
    /// Offset of the first fragment in the batch
    pub first_offset: i64,
    /// Offset of the last fragment; safe to commit upstream
    pub last_offset: OffsetToken,
    /// Fragments written
    pub fragment_count: usize,
    /// Payload bytes written
    pub byte_size: u64,
    /// Threshold that triggered the flush
    pub reason: FlushReason,
    /// Time spent uploading
    pub duration: Duration,
}

pub struct PartitionWorker {
    partition: PartitionKey,
    state: BufferState,
    pending: Vec<Fragment>,
    executor: CommitExecutor,
    clock: Arc<dyn Clock>,
    commit_timeout: Option<Duration>,
    redelivery_offset: Option<i64>,
}

impl PartitionWorker {
    /// Create a worker with an empty buffer anchored to `clock.now()`.
    pub fn new(
        partition: PartitionKey,
        thresholds: BufferThresholds,
        executor: CommitExecutor,
        clock: Arc<dyn Clock>,
        commit_timeout: Option<Duration>,
    ) -> Self {
        let state = BufferState::new_at(thresholds, clock.now());
        Self {
            partition,
            state,
            pending: Vec::new(),
            executor,
            clock,
            commit_timeout,
            redelivery_offset: None,
        }
    }

    /// Buffer one fragment and flush if any threshold is now crossed.
    pub async fn submit(&mut self, fragment: Fragment) -> FlushOutcome {
        debug_assert_eq!(fragment.partition_key(), self.partition);

        self.state = self.state.clone().append(fragment.size);
        self.pending.push(fragment);
        self.flush_if_ready().await
    }

    /// Re-evaluate the thresholds without a new fragment.
    ///
    /// Lets a quiet partition flush once its deadline passes.
    pub async fn tick(&mut self) -> FlushOutcome {
        self.flush_if_ready().await
    }

    async fn flush_if_ready(&mut self) -> FlushOutcome {
        match self.state.readiness_at(self.clock.now()).reason() {
            Some(reason) => self.flush(reason).await,
            None => Ok(None),
        }
    }

    /// Commit everything buffered and start a fresh buffer.
    ///
    /// The buffer is renewed whether or not the commit succeeds. On failure
    /// the fragments are dropped and `redelivery_offset` names where the
    /// stream must resume.
    pub async fn flush(&mut self, reason: FlushReason) -> FlushOutcome {
        let batch = std::mem::take(&mut self.pending);
        let byte_size = self.state.accumulated_byte_size();

        let (first, last) = match (batch.first(), batch.last()) {
            (Some(first), Some(last)) => (first.offset.offset, last.offset.clone()),
            _ => {
                // Deadline passed with nothing buffered.
                self.state = self.state.renew_at(self.clock.now());
                return Ok(None);
            }
        };

        let start = Instant::now();
        let result = self.commit(&batch).await;
        let duration = start.elapsed();
        self.state = self.state.renew_at(self.clock.now());

        match result {
            Ok(()) => {
                self.redelivery_offset = None;
                debug!(
                    partition = %self.partition,
                    reason = %reason,
                    fragments = batch.len(),
                    bytes = byte_size,
                    offsets = %format!("{}..={}", first, last.offset),
                    "Buffer flushed"
                );
                Ok(Some(CommittedBatch {
                    partition: self.partition.clone(),
                    first_offset: first,
                    last_offset: last,
                    fragment_count: batch.len(),
                    byte_size,
                    reason,
                    duration,
                }))
            }
            Err(e) => {
                self.redelivery_offset = Some(first);
                Err(e)
            }
        }
    }

    async fn commit(&self, batch: &[Fragment]) -> Result<(), BufferCommitFailed> {
        let Some(limit) = self.commit_timeout else {
            return self.executor.commit(batch).await;
        };

        match tokio::time::timeout(limit, self.executor.commit(batch)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    partition = %self.partition,
                    timeout_ms = limit.as_millis(),
                    fragments = batch.len(),
                    "Buffer commit timed out"
                );
                Err(BufferCommitFailed)
            }
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn state(&self) -> &BufferState {
        &self.state
    }

    /// Fragments currently held for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// First offset of the most recent failed batch, until a commit succeeds.
    pub fn redelivery_offset(&self) -> Option<i64> {
        self.redelivery_offset
    }
}
