//! Main ingestion engine orchestration.
//!
//! Polls recording fragments from Kafka, routes each to its partition's
//! worker, and commits a partition's offsets only after that worker's batch
//! is in blob storage. A failed batch rewinds the partition so the same
//! fragments are consumed again.

use super::failure::{FailureAction, FailureBudget};
use super::worker::{FlushOutcome, PartitionWorker};
use crate::buffer::{BufferThresholds, Clock, FlushReason, SystemClock};
use crate::commit::CommitExecutor;
use crate::config::Config;
use crate::error::BufferCommitFailed;
use crate::fragment::{Fragment, PartitionKey};
use crate::health::{self, HealthCheck};
use crate::kafka::{OffsetTracker, PollResult, RecordingConsumerBuilder, RecordingSource, RetryConfig};
use crate::metrics::{ErrorType, IngestionMetrics};
use crate::storage::{BlobStorage, ObjectStoreBlobStorage};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Main ingestion engine.
pub struct IngestionEngine {
    config: Config,
    consumer: Arc<dyn RecordingSource>,
    executor: CommitExecutor,
    thresholds: BufferThresholds,
    clock: Arc<dyn Clock>,
    workers: HashMap<PartitionKey, PartitionWorker>,
    retry: RetryConfig,
    /// Consecutive commit failures, only for partitions that are failing
    failures: HashMap<PartitionKey, FailureBudget>,
    offsets: Arc<OffsetTracker>,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestionEngine {
    /// Create an engine writing to the storage named in the config.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(ObjectStoreBlobStorage::from_config(&config.storage)?);
        Self::with_storage(config, storage)
    }

    /// Create an engine writing to the given storage.
    pub fn with_storage(config: Config, storage: Arc<dyn BlobStorage>) -> Result<Self> {
        config.validate()?;
        let consumer = RecordingConsumerBuilder::new(config.kafka.clone()).build()?;
        Self::with_source(config, Arc::new(consumer), storage)
    }

    /// Create an engine reading from `source` and writing to `storage`.
    pub fn with_source(
        config: Config,
        source: Arc<dyn RecordingSource>,
        storage: Arc<dyn BlobStorage>,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthCheck::for_ingestion());
        health.mark_healthy(health::STORAGE);

        let thresholds = BufferThresholds::from(&config.buffer);
        let retry = RetryConfig::for_buffer_commit(config.buffer.max_consecutive_commit_failures);
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            max_buffer_message_count = thresholds.max_buffer_message_count,
            max_buffer_size_in_bytes = thresholds.max_buffer_size_in_bytes,
            max_buffer_time_in_seconds = thresholds.max_buffer_time_in_seconds,
            "Ingestion engine configured"
        );

        Ok(Self {
            config,
            consumer: source,
            executor: CommitExecutor::new(storage),
            thresholds,
            clock: Arc::new(SystemClock),
            workers: HashMap::new(),
            retry,
            failures: HashMap::new(),
            offsets: Arc::new(OffsetTracker::new()),
            metrics: Arc::new(IngestionMetrics::new()),
            health,
            shutdown_tx,
        })
    }

    /// Run the main ingestion loop until shutdown or a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        self.health.consumer_started();
        info!(topic = %self.consumer.topic(), "Ingestion engine started");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_timeout = Duration::from_millis(self.config.kafka.poll_timeout_ms);

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }

                result = self.step(poll_timeout) => {
                    if let Err(e) = result {
                        error!(error = %e, "Stopping ingestion");
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        self.health.consumer_stopped();

        result
    }

    /// One poll, then an idle tick for every worker.
    async fn step(&mut self, poll_timeout: Duration) -> Result<()> {
        match self.consumer.next_fragment(poll_timeout).await {
            PollResult::Message(fragment) => {
                self.health.mark_healthy(health::KAFKA);
                self.ingest(fragment).await?;
            }
            PollResult::Timeout => {}
            PollResult::Error {
                error,
                backoff,
                should_retry,
            } => {
                self.metrics.record_error_by_type(ErrorType::Kafka);
                if !should_retry {
                    self.health
                        .mark_unhealthy(health::KAFKA, &format!("Poll failed: {}", error));
                    return Err(error);
                }
                self.health
                    .mark_degraded(health::KAFKA, &format!("Poll failed: {}", error));
                tokio::time::sleep(backoff).await;
            }
        }

        self.release_revoked_partitions();
        self.tick_all().await?;
        self.update_gauges();
        Ok(())
    }

    async fn ingest(&mut self, fragment: Fragment) -> Result<()> {
        self.metrics.record_fragment(fragment.size);
        self.offsets.update_current(&fragment.offset);

        let key = fragment.partition_key();
        let worker = self.workers.entry(key.clone()).or_insert_with(|| {
            debug!(partition = %key, "Starting partition worker");
            PartitionWorker::new(
                key.clone(),
                self.thresholds,
                self.executor.clone(),
                Arc::clone(&self.clock),
                self.config.buffer.commit_timeout(),
            )
        });

        let start = Instant::now();
        let outcome = worker.submit(fragment).await;
        self.handle_outcome(&key, outcome, start.elapsed()).await
    }

    /// Give every worker a chance to flush on its deadline.
    ///
    /// Runs after every poll so a busy partition cannot starve a quiet one.
    async fn tick_all(&mut self) -> Result<()> {
        let keys: Vec<PartitionKey> = self.workers.keys().cloned().collect();

        for key in keys {
            let Some(worker) = self.workers.get_mut(&key) else {
                continue;
            };
            let start = Instant::now();
            let outcome = worker.tick().await;
            self.handle_outcome(&key, outcome, start.elapsed()).await?;
        }

        Ok(())
    }

    async fn handle_outcome(
        &mut self,
        key: &PartitionKey,
        outcome: FlushOutcome,
        elapsed: Duration,
    ) -> Result<()> {
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(batch)) => {
                // Offsets move only once the batch is durable
                if let Err(e) = self.consumer.commit_through(&batch.last_offset).await {
                    self.metrics.record_error_by_type(ErrorType::Kafka);
                    self.health
                        .mark_unhealthy(health::KAFKA, &format!("Offset commit failed: {}", e));
                    return Err(e);
                }

                self.offsets.mark_committed(&batch.last_offset);
                self.metrics.record_flush(
                    batch.reason,
                    batch.fragment_count,
                    batch.byte_size,
                    batch.duration,
                );
                self.failures.remove(key);
                if self.failures.is_empty() {
                    self.health.mark_healthy(health::STORAGE);
                    self.health.mark_healthy(health::BUFFER);
                }

                info!(
                    partition = %batch.partition,
                    reason = %batch.reason,
                    fragments = batch.fragment_count,
                    bytes = batch.byte_size,
                    offset_range = %format!("{}..={}", batch.first_offset, batch.last_offset.offset),
                    duration_ms = batch.duration.as_millis(),
                    "Buffer committed"
                );
                Ok(())
            }
            Err(BufferCommitFailed) => self.handle_commit_failure(key, elapsed).await,
        }
    }

    async fn handle_commit_failure(&mut self, key: &PartitionKey, elapsed: Duration) -> Result<()> {
        self.metrics.record_commit_failure(elapsed);

        let budget = self
            .failures
            .entry(key.clone())
            .or_insert_with(|| FailureBudget::new(self.retry.clone()));
        let action = budget.record_failure();
        let consecutive_failures = budget.consecutive_failures();

        let backoff = match action {
            FailureAction::Halt { .. } => {
                error!(
                    partition = %key,
                    consecutive_failures,
                    "Buffer commits keep failing, halting consumer"
                );
                self.health.mark_unhealthy(
                    health::STORAGE,
                    &format!("{} consecutive buffer commits failed", consecutive_failures),
                );
                return Err(BufferCommitFailed.into());
            }
            FailureAction::Retry { backoff } => backoff,
        };

        self.health
            .mark_degraded(health::STORAGE, "Buffer commit failed, retrying");
        self.health
            .mark_degraded(health::BUFFER, "Awaiting redelivery of failed batch");

        let redelivery = self
            .workers
            .get(key)
            .and_then(PartitionWorker::redelivery_offset);
        if let Some(offset) = redelivery {
            // Without the rewind a later commit would acknowledge the lost batch.
            self.consumer.rewind(key, offset)?;
            self.offsets.rewind(key, offset);
            self.metrics.record_redelivery();
        }

        warn!(
            partition = %key,
            redelivery_offset = ?redelivery,
            consecutive_failures,
            backoff_ms = backoff.as_millis(),
            "Buffer commit failed, backing off"
        );
        tokio::time::sleep(backoff).await;
        Ok(())
    }

    /// Drop workers for partitions this consumer no longer owns.
    ///
    /// Their buffered fragments were never committed, so the new owner
    /// consumes them again.
    fn release_revoked_partitions(&mut self) {
        let assigned = match self.consumer.assigned_partitions() {
            Ok(assigned) => assigned,
            Err(e) => {
                debug!(error = %e, "Could not read partition assignment");
                return;
            }
        };

        let offsets = &self.offsets;
        self.workers.retain(|key, worker| {
            let keep = assigned.contains(key);
            if !keep {
                info!(
                    partition = %key,
                    dropped_fragments = worker.pending_len(),
                    "Partition revoked, releasing worker"
                );
                offsets.remove(key);
            }
            keep
        });
        self.failures.retain(|key, _| assigned.contains(key));
    }

    fn update_gauges(&self) {
        let (fragments, bytes) = self.workers.values().fold((0u64, 0u64), |(f, b), w| {
            (
                f + w.state().accumulated_message_count(),
                b + w.state().accumulated_byte_size(),
            )
        });
        self.metrics.set_buffered(fragments, bytes);
        self.metrics.set_active_partitions(self.workers.len() as u64);
        self.metrics
            .set_consumer_lag(self.offsets.total_lag().max(0) as u64);
    }

    async fn shutdown(&mut self) {
        info!(
            partitions = self.workers.len(),
            "Shutting down ingestion engine (30s timeout)"
        );

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.flush_all()).await {
            Ok(()) => info!("Graceful shutdown completed successfully"),
            Err(_) => warn!("Shutdown timeout exceeded (30s), unflushed fragments will be redelivered"),
        }
        self.update_gauges();
    }

    /// Final flush of every partition, committing offsets where it succeeds.
    async fn flush_all(&mut self) {
        let keys: Vec<PartitionKey> = self.workers.keys().cloned().collect();

        for key in keys {
            let Some(worker) = self.workers.get_mut(&key) else {
                continue;
            };

            match worker.flush(FlushReason::Shutdown).await {
                Ok(None) => {}
                Ok(Some(batch)) => {
                    if let Err(e) = self.consumer.commit_through(&batch.last_offset).await {
                        warn!(partition = %key, error = %e, "Final offset commit failed");
                        continue;
                    }
                    self.offsets.mark_committed(&batch.last_offset);
                    self.metrics.record_flush(
                        batch.reason,
                        batch.fragment_count,
                        batch.byte_size,
                        batch.duration,
                    );
                }
                Err(BufferCommitFailed) => {
                    warn!(partition = %key, "Final buffer commit failed, fragments will be redelivered");
                }
            }
        }
    }

    /// Shared metrics, for the HTTP endpoints.
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Shared health check, for the HTTP endpoints.
    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.health)
    }

    pub fn offsets(&self) -> Arc<OffsetTracker> {
        Arc::clone(&self.offsets)
    }

    /// Get shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}
