//! Integration tests for replaysink-core.
//!
//! The Kafka tests require Docker and are marked with #[ignore] to avoid
//! running them in normal test runs.
//!
//! Run with: cargo test --test integration_tests -- --ignored

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use replaysink_core::buffer::{BufferThresholds, Clock, FlushReason, ManualClock};
use replaysink_core::engine::{FailureAction, FailureBudget, PartitionWorker};
use replaysink_core::kafka::RetryConfig;
use replaysink_core::storage::{BlobStorage, ObjectStoreBlobStorage};
use replaysink_core::{
    BufferCommitFailed, CommitExecutor, Fragment, OffsetToken, PartitionKey, StorageError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "ingest-replay-recordings";

fn fragment(partition: i32, offset: i64, payload: impl Into<Bytes>) -> Fragment {
    Fragment::new(payload, OffsetToken::new(TOPIC, partition, offset))
}

async fn stored_keys(store: &Arc<dyn ObjectStore>) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list(None)
        .map_ok(|meta| meta.location.to_string())
        .try_collect()
        .await
        .unwrap();
    keys.sort();
    keys
}

/// Delegates to real storage but fails a given number of uploads first.
struct FlakyStorage {
    inner: ObjectStoreBlobStorage,
    failures_left: AtomicUsize,
}

impl FlakyStorage {
    fn new(inner: ObjectStoreBlobStorage, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl BlobStorage for FlakyStorage {
    async fn upload(&self, fragment: &Fragment) -> replaysink_core::Result<()> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StorageError::Upload {
                key: fragment.offset.to_string(),
                message: "injected failure".into(),
            }
            .into());
        }
        self.inner.upload(fragment).await
    }
}

mod storage_integration {
    use super::*;

    /// A full count-triggered flush lands one object per fragment.
    #[tokio::test]
    async fn test_worker_flushes_batch_to_object_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = Arc::new(ObjectStoreBlobStorage::new(Arc::clone(&store), "recordings"));
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));

        let mut worker = PartitionWorker::new(
            PartitionKey::new(TOPIC, 0),
            BufferThresholds::new(3, 1_000_000, 60),
            CommitExecutor::new(storage),
            clock,
            Some(Duration::from_secs(5)),
        );

        assert!(worker.submit(fragment(0, 10, "a")).await.unwrap().is_none());
        assert!(worker.submit(fragment(0, 11, "bb")).await.unwrap().is_none());
        let batch = worker
            .submit(fragment(0, 12, "ccc"))
            .await
            .unwrap()
            .expect("third fragment crosses the count threshold");

        assert_eq!(batch.reason, FlushReason::MessageCount);
        assert_eq!(batch.first_offset, 10);
        assert_eq!(batch.last_offset.offset, 12);
        assert_eq!(batch.fragment_count, 3);
        assert_eq!(batch.byte_size, 6);

        assert_eq!(
            stored_keys(&store).await,
            vec![
                "recordings/ingest-replay-recordings/0/00000000000000000010",
                "recordings/ingest-replay-recordings/0/00000000000000000011",
                "recordings/ingest-replay-recordings/0/00000000000000000012",
            ]
        );

        let data = store
            .get(&ObjectPath::from(
                "recordings/ingest-replay-recordings/0/00000000000000000011",
            ))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(data.as_ref(), b"bb");
    }

    /// A failed batch is redelivered and rewritten to the same keys.
    #[tokio::test]
    async fn test_failed_batch_redelivery_overwrites_partial_upload() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let thresholds = BufferThresholds::new(3, 1_000_000, 60);

        // Only the first upload of the batch reaches storage.
        let failing = Arc::new(FailAfter::new(
            ObjectStoreBlobStorage::new(Arc::clone(&store), "recordings"),
            1,
        ));
        let mut worker = PartitionWorker::new(
            PartitionKey::new(TOPIC, 1),
            thresholds,
            CommitExecutor::new(failing),
            Arc::new(ManualClock::new(chrono::Utc::now())),
            None,
        );

        worker.submit(fragment(1, 100, "one")).await.unwrap();
        worker.submit(fragment(1, 101, "two")).await.unwrap();
        let result = worker.submit(fragment(1, 102, "three")).await;

        assert_eq!(result, Err(BufferCommitFailed));
        assert_eq!(worker.redelivery_offset(), Some(100));
        assert_eq!(worker.pending_len(), 0);
        assert!(worker.state().is_empty());
        assert_eq!(
            stored_keys(&store).await,
            vec!["recordings/ingest-replay-recordings/1/00000000000000000100"]
        );

        // The stream replays from offset 100 once storage is healthy again.
        let healthy = Arc::new(ObjectStoreBlobStorage::new(Arc::clone(&store), "recordings"));
        let mut worker = PartitionWorker::new(
            PartitionKey::new(TOPIC, 1),
            thresholds,
            CommitExecutor::new(healthy),
            Arc::new(ManualClock::new(chrono::Utc::now())),
            None,
        );

        worker.submit(fragment(1, 100, "one")).await.unwrap();
        worker.submit(fragment(1, 101, "two")).await.unwrap();
        let batch = worker
            .submit(fragment(1, 102, "three"))
            .await
            .unwrap()
            .expect("batch committed");
        assert_eq!(batch.first_offset, 100);
        assert_eq!(batch.last_offset.offset, 102);

        assert_eq!(
            stored_keys(&store).await,
            vec![
                "recordings/ingest-replay-recordings/1/00000000000000000100",
                "recordings/ingest-replay-recordings/1/00000000000000000101",
                "recordings/ingest-replay-recordings/1/00000000000000000102",
            ]
        );
    }

    /// Fails every upload after the first `successes`.
    struct FailAfter {
        inner: ObjectStoreBlobStorage,
        successes_left: AtomicUsize,
    }

    impl FailAfter {
        fn new(inner: ObjectStoreBlobStorage, successes: usize) -> Self {
            Self {
                inner,
                successes_left: AtomicUsize::new(successes),
            }
        }
    }

    #[async_trait]
    impl BlobStorage for FailAfter {
        async fn upload(&self, fragment: &Fragment) -> replaysink_core::Result<()> {
            let allowed = self
                .successes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(StorageError::Upload {
                    key: fragment.offset.to_string(),
                    message: "bucket unavailable".into(),
                }
                .into());
            }
            self.inner.upload(fragment).await
        }
    }

    /// Retrying the same worker after a failure succeeds once storage recovers.
    #[tokio::test]
    async fn test_worker_recovers_after_transient_failures() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = Arc::new(FlakyStorage::new(
            ObjectStoreBlobStorage::new(Arc::clone(&store), "recordings"),
            1,
        ));
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let mut worker = PartitionWorker::new(
            PartitionKey::new(TOPIC, 2),
            BufferThresholds::new(2, 1_000_000, 60),
            CommitExecutor::new(Arc::clone(&storage) as Arc<dyn BlobStorage>),
            clock,
            None,
        );
        let mut budget = FailureBudget::new(RetryConfig::for_buffer_commit(3).without_jitter());

        worker.submit(fragment(2, 0, "x")).await.unwrap();
        assert!(worker.submit(fragment(2, 1, "y")).await.is_err());
        assert!(matches!(
            budget.record_failure(),
            FailureAction::Retry { .. }
        ));
        assert_eq!(worker.redelivery_offset(), Some(0));
        assert!(stored_keys(&store).await.is_empty());

        // The stream replays both fragments.
        worker.submit(fragment(2, 0, "x")).await.unwrap();
        let batch = worker.submit(fragment(2, 1, "y")).await.unwrap();
        assert!(batch.is_some());
        budget.record_success();

        assert_eq!(budget.consecutive_failures(), 0);
        assert_eq!(worker.redelivery_offset(), None);
        assert_eq!(stored_keys(&store).await.len(), 2);
    }

    /// A quiet partition flushes on its deadline through `tick`.
    #[tokio::test]
    async fn test_time_threshold_flush_with_manual_clock() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = Arc::new(ObjectStoreBlobStorage::new(Arc::clone(&store), "replays"));
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));

        let mut worker = PartitionWorker::new(
            PartitionKey::new(TOPIC, 5),
            BufferThresholds::new(100, 2_500_000, 1),
            CommitExecutor::new(storage),
            Arc::clone(&clock) as Arc<dyn Clock>,
            None,
        );

        worker.submit(fragment(5, 40, "late")).await.unwrap();
        assert!(worker.tick().await.unwrap().is_none());
        assert!(stored_keys(&store).await.is_empty());

        clock.advance(chrono::Duration::milliseconds(999));
        assert!(worker.tick().await.unwrap().is_none());

        clock.advance(chrono::Duration::milliseconds(1));
        let batch = worker.tick().await.unwrap().expect("deadline reached");
        assert_eq!(batch.reason, FlushReason::CommitTime);
        assert_eq!(
            stored_keys(&store).await,
            vec!["replays/ingest-replay-recordings/5/00000000000000000040"]
        );

        // Fresh buffer is anchored to the time of the flush.
        assert_eq!(worker.state().creation_time(), clock.now());
    }

    /// Local directory storage keeps the same key layout on disk.
    #[tokio::test]
    async fn test_local_directory_storage() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = replaysink_core::config::StorageConfig {
            location: dir.path().join("blobs").to_string_lossy().into_owned(),
            key_prefix: "recordings".into(),
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            s3_endpoint: None,
        };
        let storage = Arc::new(ObjectStoreBlobStorage::from_config(&config).unwrap());
        let executor = CommitExecutor::new(storage);

        executor
            .commit(&[fragment(0, 1, "first"), fragment(0, 2, "second")])
            .await
            .unwrap();

        let written = dir
            .path()
            .join("blobs/recordings/ingest-replay-recordings/0/00000000000000000002");
        assert_eq!(std::fs::read(written).unwrap(), b"second");
    }
}

mod kafka_integration {
    use super::*;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::client::DefaultClientContext;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use replaysink_core::engine::IngestionEngine;
    use replaysink_core::Config;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::kafka::Kafka;

    /// Produce recordings, run the engine, and check every fragment lands in
    /// blob storage.
    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_engine_commits_recordings_to_storage() {
        let kafka = Kafka::default()
            .start()
            .await
            .expect("Failed to start Kafka container");
        let bootstrap_servers = format!(
            "127.0.0.1:{}",
            kafka
                .get_host_port_ipv4(9093)
                .await
                .expect("Failed to get Kafka port")
        );

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .create()
            .expect("Failed to create admin client");
        admin
            .create_topics(
                &[NewTopic::new(TOPIC, 1, TopicReplication::Fixed(1))],
                &AdminOptions::new(),
            )
            .await
            .expect("Failed to create topic");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .expect("Failed to create producer");

        for i in 0..5 {
            let payload = format!(r#"{{"session_id": "s-{}", "events": []}}"#, i);
            producer
                .send(
                    FutureRecord::<(), _>::to(TOPIC).payload(&payload),
                    Duration::from_secs(5),
                )
                .await
                .expect("Failed to produce recording");
        }

        let config = Config::from_toml_str(&format!(
            r#"
            [kafka]
            bootstrap_servers = ["{bootstrap_servers}"]
            topic = "{TOPIC}"
            consumer_group = "replaysink-integration"
            auto_offset_reset = "earliest"

            [storage]
            location = "memory://"

            [buffer]
            max_buffer_message_count = 5
            max_buffer_time_in_seconds = 60
            "#
        ))
        .expect("Failed to parse config");

        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = Arc::new(ObjectStoreBlobStorage::new(Arc::clone(&store), "recordings"));
        let mut engine =
            IngestionEngine::with_storage(config, storage).expect("Failed to build engine");
        let shutdown = engine.shutdown_signal();
        let offsets = engine.offsets();

        let watched = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..120 {
                if stored_keys(&watched).await.len() == 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let _ = shutdown.send(());
        });

        tokio::time::timeout(Duration::from_secs(90), engine.run())
            .await
            .expect("Engine did not stop")
            .expect("Engine failed");

        let keys = stored_keys(&store).await;
        assert_eq!(keys.len(), 5);
        assert_eq!(
            keys[0],
            "recordings/ingest-replay-recordings/0/00000000000000000000"
        );
        assert_eq!(
            offsets.get_committed(&PartitionKey::new(TOPIC, 0)),
            Some(4)
        );
    }
}
