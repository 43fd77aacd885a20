//! Kafka consumer for recording fragments.
//!
//! Offsets are committed manually, and only after the batch containing them
//! has been written to blob storage. Auto commit and auto offset store are
//! both disabled so nothing is acknowledged behind the engine's back.
//!
//! ## Exponential Backoff
//!
//! Poll errors, offset commit failures, and failed buffer commits all back
//! off using `RetryConfig`:
//! min(max_delay, base_delay * 2^attempt) + jitter

use crate::config::{KafkaConfig, OffsetReset};
use crate::fragment::{Fragment, OffsetToken, PartitionKey};
use crate::{Error, KafkaError, Result};
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a seek may block inside librdkafka.
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for exponential backoff retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (default: 100ms)
    pub base_delay: Duration,
    /// Maximum delay cap (default: 30s)
    pub max_delay: Duration,
    /// Maximum number of retries (default: 10)
    pub max_retries: u32,
    /// Whether to add jitter (randomness) to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_retries: 10,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
            jitter: true,
        }
    }

    /// Backoff between failed buffer commits: starts at 1s, caps at 60s.
    pub fn for_buffer_commit(max_retries: u32) -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), max_retries)
    }

    /// Disable jitter (for testing).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate the backoff delay for a given attempt.
    ///
    /// Uses exponential backoff: min(max_delay, base_delay * 2^attempt)
    /// Optionally adds jitter (±25%) to prevent thundering herd.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_delay_ms = delay_ms.min(max_ms);

        let final_delay_ms = if self.jitter {
            let jitter_range = capped_delay_ms / 4;
            let jitter = (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64)
                % (jitter_range * 2 + 1);
            capped_delay_ms.saturating_sub(jitter_range) + jitter
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms)
    }
}

/// Builder for the recording consumer.
pub struct RecordingConsumerBuilder {
    config: KafkaConfig,
    retry_config: RetryConfig,
}

impl RecordingConsumerBuilder {
    /// Create a new consumer builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// librdkafka settings derived from the Kafka config.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Offsets are committed only after the batch is in blob storage
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                match self.config.auto_offset_reset {
                    OffsetReset::Earliest => "earliest",
                    OffsetReset::Latest => "latest",
                },
            )
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // Must exceed the longest flush or the group evicts us mid-upload
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky");

        let security = &self.config.security;
        if let Some(ref protocol) = security.protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = security.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = security.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(ref password) = security.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(ref path) = security.ssl_ca_location {
            client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = security.ssl_cert_location {
            client_config.set("ssl.certificate.location", path.to_string_lossy().as_ref());
        }
        if let Some(ref path) = security.ssl_key_location {
            client_config.set("ssl.key.location", path.to_string_lossy().as_ref());
        }

        client_config
    }

    /// Build the consumer and subscribe to the recordings topic.
    pub fn build(self) -> Result<RecordingConsumer> {
        let consumer: StreamConsumer = self.client_config().create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(RecordingConsumer {
            consumer,
            topic: self.config.topic,
            retry_config: self.retry_config,
            consecutive_failures: AtomicU32::new(0),
        })
    }
}

/// Result of a poll operation with backoff information.
#[derive(Debug)]
pub enum PollResult {
    /// Received a fragment.
    Message(Fragment),
    /// Poll timed out (no messages available).
    Timeout,
    /// Poll failed with error and backoff recommendation.
    Error {
        /// The error that occurred.
        error: Error,
        /// Recommended backoff duration before next attempt.
        backoff: Duration,
        /// Whether to retry (false if max retries exceeded).
        should_retry: bool,
    },
}

/// Kafka consumer delivering recording fragments with manual offset control.
pub struct RecordingConsumer {
    consumer: StreamConsumer,
    topic: String,
    retry_config: RetryConfig,
    consecutive_failures: AtomicU32,
}

impl RecordingConsumer {
    /// Poll for the next fragment.
    pub async fn poll(&self, timeout: Duration) -> Option<Result<Fragment>> {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        tokio::pin!(stream);

        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(msg))) => Some(Ok(Self::convert_message(&msg))),
            Ok(Some(Err(e))) => Some(Err(Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))),
            Ok(None) => None,
            Err(_) => None, // Timeout
        }
    }

    /// A message without a payload becomes an empty fragment.
    fn convert_message(msg: &BorrowedMessage) -> Fragment {
        Fragment::new(
            msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            OffsetToken::new(msg.topic(), msg.partition(), msg.offset()),
        )
    }

    /// Poll, recording failures and recommending a backoff on error.
    pub async fn poll_with_backoff(&self, timeout: Duration) -> PollResult {
        match self.poll(timeout).await {
            Some(Ok(fragment)) => {
                self.record_success();
                PollResult::Message(fragment)
            }
            Some(Err(e)) => {
                let failures = self.record_failure();
                let should_retry = failures < self.retry_config.max_retries;
                let backoff = self.retry_config.calculate_delay(failures);
                warn!(
                    failures = failures,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Poll error, suggesting backoff"
                );
                PollResult::Error {
                    error: e,
                    backoff,
                    should_retry,
                }
            }
            None => PollResult::Timeout,
        }
    }

    /// Commit through `token`, i.e. everything up to and including it.
    ///
    /// Only call this after the batch ending at `token` has been committed
    /// to blob storage.
    pub async fn commit_offset(&self, token: &OffsetToken) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        // Kafka convention: the committed offset is the next offset to read
        tpl.add_partition_offset(&token.topic, token.partition, Offset::Offset(token.offset + 1))
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(offset = %token, "Offset committed");
        Ok(())
    }

    /// Commit offset with exponential backoff retry.
    pub async fn commit_offset_with_retry(&self, token: &OffsetToken) -> Result<()> {
        let mut attempt = 0;

        loop {
            match self.commit_offset(token).await {
                Ok(()) => {
                    self.record_success();
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry_config.max_retries {
                        warn!(
                            attempt = attempt,
                            max_retries = self.retry_config.max_retries,
                            error = %e,
                            "Offset commit failed after max retries"
                        );
                        return Err(e);
                    }

                    let delay = self.retry_config.calculate_delay(attempt);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Offset commit failed, retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Rewind `partition` so the next poll redelivers from `offset`.
    pub fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<()> {
        self.consumer
            .seek(
                &partition.topic,
                partition.partition,
                Offset::Offset(offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| {
                Error::Kafka(KafkaError::Seek {
                    topic: partition.topic.clone(),
                    partition: partition.partition,
                    offset,
                    message: e.to_string(),
                })
            })?;

        info!(partition = %partition, offset, "Partition rewound for redelivery");
        Ok(())
    }

    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the current partition assignment.
    pub fn assignment(&self) -> Result<Vec<PartitionKey>> {
        let tpl = self
            .consumer
            .assignment()
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;

        Ok(tpl
            .elements()
            .iter()
            .map(|e| PartitionKey::new(e.topic(), e.partition()))
            .collect())
    }

    /// Record a successful operation (resets backoff).
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failure (increments backoff counter).
    fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Get the retry configuration.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaSecurityConfig;

    fn kafka_config() -> KafkaConfig {
        KafkaConfig {
            bootstrap_servers: vec!["broker-1:9092".into(), "broker-2:9092".into()],
            topic: "ingest-replay-recordings".into(),
            consumer_group: "ingest-replay-recordings-buffered".into(),
            poll_timeout_ms: 1000,
            session_timeout_ms: 30000,
            heartbeat_interval_ms: 3000,
            max_poll_interval_ms: 300000,
            auto_offset_reset: OffsetReset::Latest,
            security: KafkaSecurityConfig::default(),
        }
    }

    #[test]
    fn test_client_config_disables_auto_commit() {
        let client_config = RecordingConsumerBuilder::new(kafka_config()).client_config();

        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(
            client_config.get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(client_config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(
            client_config.get("partition.assignment.strategy"),
            Some("cooperative-sticky")
        );
        assert_eq!(client_config.get("security.protocol"), None);
    }

    #[test]
    fn test_client_config_security() {
        let mut config = kafka_config();
        config.security.protocol = Some("SASL_SSL".into());
        config.security.sasl_mechanism = Some("SCRAM-SHA-512".into());
        config.security.sasl_username = Some("replay".into());

        let client_config = RecordingConsumerBuilder::new(config).client_config();
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(client_config.get("sasl.username"), Some("replay"));
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 10);
        assert!(config.jitter);
    }

    #[test]
    fn test_retry_config_for_buffer_commit() {
        let config = RetryConfig::for_buffer_commit(5).without_jitter();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(8));
        assert_eq!(config.calculate_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(30), 10)
            .without_jitter();

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_calculate_delay_caps_at_max() {
        let config = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(1), 10)
            .without_jitter();

        assert_eq!(config.calculate_delay(10), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(20), Duration::from_millis(1000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig::new(Duration::from_millis(1000), Duration::from_secs(30), 10);

        let delay = config.calculate_delay(0);
        let min = Duration::from_millis(750);
        let max = Duration::from_millis(1250);

        assert!(delay >= min, "delay {:?} should be >= {:?}", delay, min);
        assert!(delay <= max, "delay {:?} should be <= {:?}", delay, max);
    }

    #[test]
    fn test_calculate_delay_handles_overflow() {
        let config = RetryConfig::new(Duration::from_secs(1), Duration::from_secs(30), 100)
            .without_jitter();

        assert_eq!(config.calculate_delay(50), Duration::from_secs(30));
        assert_eq!(config.calculate_delay(100), Duration::from_secs(30));
    }
}
