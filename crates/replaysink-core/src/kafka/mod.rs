//! Kafka consumption with manual offset commits and exponential backoff.

mod consumer;
mod offset;
mod source;

pub use consumer::{PollResult, RecordingConsumer, RecordingConsumerBuilder, RetryConfig};
pub use offset::OffsetTracker;
pub use source::RecordingSource;
