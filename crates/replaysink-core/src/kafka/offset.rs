//! Consumed vs committed offsets per partition.

use crate::fragment::{OffsetToken, PartitionKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks how far each partition has been consumed and durably committed.
///
/// Shared between the engine loop and the status endpoints.
pub struct OffsetTracker {
    /// Last consumed offset per partition
    current_offsets: DashMap<PartitionKey, AtomicI64>,

    /// Last committed offset per partition
    committed_offsets: DashMap<PartitionKey, AtomicI64>,
}

impl OffsetTracker {
    /// Create a new offset tracker.
    pub fn new() -> Self {
        Self {
            current_offsets: DashMap::new(),
            committed_offsets: DashMap::new(),
        }
    }

    /// Record that the fragment at `token` was consumed.
    pub fn update_current(&self, token: &OffsetToken) {
        store(&self.current_offsets, token.partition_key(), token.offset);
    }

    /// Move the consumed position back after a seek.
    pub fn rewind(&self, partition: &PartitionKey, offset: i64) {
        // The seek target has not been consumed yet.
        store(&self.current_offsets, partition.clone(), offset - 1);
    }

    pub fn get_current(&self, partition: &PartitionKey) -> Option<i64> {
        self.current_offsets
            .get(partition)
            .map(|v| v.load(Ordering::SeqCst))
    }

    /// Record that every fragment up to and including `token` is durable.
    pub fn mark_committed(&self, token: &OffsetToken) {
        store(&self.committed_offsets, token.partition_key(), token.offset);
    }

    pub fn get_committed(&self, partition: &PartitionKey) -> Option<i64> {
        self.committed_offsets
            .get(partition)
            .map(|v| v.load(Ordering::SeqCst))
    }

    /// Consumed but not yet committed fragments in one partition.
    pub fn get_lag(&self, partition: &PartitionKey) -> Option<i64> {
        let current = self.get_current(partition)?;
        let committed = self.get_committed(partition).unwrap_or(-1);
        Some((current - committed).max(0))
    }

    /// Uncommitted fragments across all partitions.
    pub fn total_lag(&self) -> i64 {
        self.get_all_partitions()
            .iter()
            .filter_map(|p| self.get_lag(p))
            .sum()
    }

    /// Get all tracked partitions.
    pub fn get_all_partitions(&self) -> Vec<PartitionKey> {
        let mut partitions: Vec<_> = self
            .current_offsets
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        partitions.sort();
        partitions
    }

    /// Forget a partition that is no longer assigned.
    pub fn remove(&self, partition: &PartitionKey) {
        self.current_offsets.remove(partition);
        self.committed_offsets.remove(partition);
    }

    /// Clear all tracked offsets.
    pub fn clear(&self) {
        self.current_offsets.clear();
        self.committed_offsets.clear();
    }
}

fn store(map: &DashMap<PartitionKey, AtomicI64>, key: PartitionKey, offset: i64) {
    map.entry(key)
        .and_modify(|v| v.store(offset, Ordering::SeqCst))
        .or_insert_with(|| AtomicI64::new(offset));
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_tracker() {
        let tracker = OffsetTracker::new();
        let partition = PartitionKey::new("recordings", 0);

        tracker.update_current(&OffsetToken::new("recordings", 0, 100));
        assert_eq!(tracker.get_current(&partition), Some(100));
        assert_eq!(tracker.get_lag(&partition), Some(101));

        tracker.mark_committed(&OffsetToken::new("recordings", 0, 50));
        assert_eq!(tracker.get_committed(&partition), Some(50));
        assert_eq!(tracker.get_lag(&partition), Some(50));

        tracker.update_current(&OffsetToken::new("recordings", 0, 200));
        assert_eq!(tracker.get_lag(&partition), Some(150));
    }

    #[test]
    fn test_rewind_after_failed_flush() {
        let tracker = OffsetTracker::new();
        let partition = PartitionKey::new("recordings", 1);

        tracker.mark_committed(&OffsetToken::new("recordings", 1, 9));
        tracker.update_current(&OffsetToken::new("recordings", 1, 14));
        assert_eq!(tracker.get_lag(&partition), Some(5));

        // Batch 10..=14 failed; redelivery starts at 10
        tracker.rewind(&partition, 10);
        assert_eq!(tracker.get_current(&partition), Some(9));
        assert_eq!(tracker.get_lag(&partition), Some(0));
    }

    #[test]
    fn test_offset_tracker_multiple_partitions() {
        let tracker = OffsetTracker::new();

        tracker.update_current(&OffsetToken::new("recordings", 1, 200));
        tracker.update_current(&OffsetToken::new("recordings", 0, 100));
        tracker.update_current(&OffsetToken::new("other", 0, 50));
        tracker.mark_committed(&OffsetToken::new("recordings", 0, 100));

        let partitions = tracker.get_all_partitions();
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0], PartitionKey::new("other", 0));

        assert_eq!(tracker.total_lag(), 201 + 0 + 51);

        tracker.remove(&PartitionKey::new("recordings", 1));
        assert_eq!(tracker.total_lag(), 51);

        tracker.clear();
        assert!(tracker.get_all_partitions().is_empty());
    }
}
