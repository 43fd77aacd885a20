//! replaysink core: buffered batch commit of session-replay recordings.
//!
//! Fragments are consumed from Kafka, buffered per partition, and written to
//! blob storage when a count, size, or time threshold is crossed:
//!
//! - Bounded memory via message-count and byte-size thresholds
//! - Bounded latency via a per-buffer commit deadline
//! - At-least-once delivery: offsets are committed only after the batch is
//!   durably written

pub mod buffer;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use buffer::{BufferReadiness, BufferState, BufferThresholds, FlushReason};
pub use commit::CommitExecutor;
pub use config::Config;
pub use error::{BufferCommitFailed, KafkaError, StorageError};
pub use error::{Error, Result};
pub use fragment::{Fragment, OffsetToken, PartitionKey};
