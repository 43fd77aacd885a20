//! Recording fragments as delivered by the stream.
//!
//! The payload is opaque: nothing in this crate interprets it. Only the size
//! feeds buffer accounting and only the offset token flows through to offset
//! commit and storage keys.

use bytes::Bytes;
use std::fmt;

/// Identifies a single stream partition, and therefore a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
}

impl PartitionKey {
    /// Create a new partition key.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// Position of a fragment in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetToken {
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl OffsetToken {
    /// Create a new offset token.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// The partition this offset belongs to.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// One unit of replay-recording payload.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Raw recording bytes
    pub payload: Bytes,
    /// Payload size in bytes
    pub size: u64,
    /// Where the fragment came from
    pub offset: OffsetToken,
}

impl Fragment {
    /// Create a fragment, deriving its size from the payload.
    pub fn new(payload: impl Into<Bytes>, offset: OffsetToken) -> Self {
        let payload = payload.into();
        Self {
            size: payload.len() as u64,
            payload,
            offset,
        }
    }

    /// The partition this fragment was consumed from.
    pub fn partition_key(&self) -> PartitionKey {
        self.offset.partition_key()
    }
}
