//! Error types for the replaysink core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! `BufferCommitFailed` is deliberately cause-free: the commit path logs the
//! underlying storage fault and hands the caller a single signal meaning
//! "nothing in this batch is safely committed".

use thiserror::Error;

/// Result type alias for replaysink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for replaysink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Blob storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A buffered batch could not be durably written
    #[error(transparent)]
    BufferCommitFailed(#[from] BufferCommitFailed),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Rewinding a partition for redelivery failed
    #[error("Seek to {topic}/{partition}@{offset} failed: {message}")]
    Seek {
        topic: String,
        partition: i32,
        offset: i64,
        message: String,
    },
}

/// Blob storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The configured storage location could not be parsed
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    /// The storage scheme is recognised but not supported
    #[error("Unsupported storage backend: {0}")]
    Unsupported(String),

    /// A single fragment upload failed
    #[error("Upload to {key} failed: {message}")]
    Upload { key: String, message: String },
}

/// Raised when any upload in a buffered batch fails or times out.
///
/// Carries no cause and does not identify the failing fragment. The only
/// correct response is to leave the batch's offsets uncommitted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Buffer commit failed: batch was not durably written")]
pub struct BufferCommitFailed;

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
