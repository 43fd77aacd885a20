//! Flush-timing state for a single partition's recording buffer.
//!
//! `BufferState` performs no I/O and holds no fragments. It only tracks how
//! much has been appended and when the current buffer must be committed,
//! and answers whether any of three thresholds has been crossed.
//!
//! Every time-dependent operation has an `_at` variant taking an explicit
//! instant; the plain variants read the wall clock.

use crate::config::BufferConfig;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// The three flush thresholds, fixed for the lifetime of an engine.
///
/// A threshold of zero is exceeded immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferThresholds {
    /// Flush once this many fragments are buffered
    pub max_buffer_message_count: u64,
    /// Flush once buffered payloads reach this many bytes
    pub max_buffer_size_in_bytes: u64,
    /// Flush once this many seconds have passed since the buffer was created
    pub max_buffer_time_in_seconds: u64,
}

impl BufferThresholds {
    /// Create thresholds from the three configured limits.
    pub fn new(
        max_buffer_message_count: u64,
        max_buffer_size_in_bytes: u64,
        max_buffer_time_in_seconds: u64,
    ) -> Self {
        Self {
            max_buffer_message_count,
            max_buffer_size_in_bytes,
            max_buffer_time_in_seconds,
        }
    }

    fn max_buffer_time(&self) -> Option<Duration> {
        i64::try_from(self.max_buffer_time_in_seconds)
            .ok()
            .and_then(Duration::try_seconds)
    }
}

impl From<&BufferConfig> for BufferThresholds {
    fn from(config: &BufferConfig) -> Self {
        Self::new(
            config.max_buffer_message_count,
            config.max_buffer_size_in_bytes,
            config.max_buffer_time_in_seconds,
        )
    }
}

/// Why a buffer was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Fragment count reached its limit
    MessageCount,
    /// Buffered bytes reached their limit
    ByteSize,
    /// The commit deadline passed
    CommitTime,
    /// Forced flush while shutting down
    Shutdown,
}

impl FlushReason {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::MessageCount => "message_count",
            FlushReason::ByteSize => "byte_size",
            FlushReason::CommitTime => "commit_time",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating all three thresholds at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferReadiness {
    /// Fragment count reached `max_buffer_message_count`
    pub message_count: bool,
    /// Buffered bytes reached `max_buffer_size_in_bytes`
    pub byte_size: bool,
    /// The commit deadline has passed
    pub commit_time: bool,
}

impl BufferReadiness {
    /// True when any threshold has been crossed.
    pub fn is_ready(&self) -> bool {
        self.message_count || self.byte_size || self.commit_time
    }

    /// The first tripped threshold, in count, size, time order.
    pub fn reason(&self) -> Option<FlushReason> {
        if self.message_count {
            Some(FlushReason::MessageCount)
        } else if self.byte_size {
            Some(FlushReason::ByteSize)
        } else if self.commit_time {
            Some(FlushReason::CommitTime)
        } else {
            None
        }
    }
}

/// Accumulated buffer pressure for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferState {
    thresholds: BufferThresholds,
    accumulated_message_count: u64,
    accumulated_byte_size: u64,
    creation_time: DateTime<Utc>,
    next_commit_deadline: DateTime<Utc>,
}

impl BufferState {
    /// Create an empty buffer state anchored to the current instant.
    pub fn new(thresholds: BufferThresholds) -> Self {
        Self::new_at(thresholds, Utc::now())
    }

    /// Create an empty buffer state anchored to `now`.
    pub fn new_at(thresholds: BufferThresholds, now: DateTime<Utc>) -> Self {
        // A deadline past the representable range never fires.
        let next_commit_deadline = thresholds
            .max_buffer_time()
            .and_then(|window| now.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            thresholds,
            accumulated_message_count: 0,
            accumulated_byte_size: 0,
            creation_time: now,
            next_commit_deadline,
        }
    }

    /// Record one more fragment of `fragment_size_in_bytes`.
    ///
    /// Timing fields are carried over unchanged.
    #[must_use]
    pub fn append(self, fragment_size_in_bytes: u64) -> Self {
        Self {
            accumulated_message_count: self.accumulated_message_count.saturating_add(1),
            accumulated_byte_size: self
                .accumulated_byte_size
                .saturating_add(fragment_size_in_bytes),
            ..self
        }
    }

    pub fn has_exceeded_max_message_count(&self) -> bool {
        self.accumulated_message_count >= self.thresholds.max_buffer_message_count
    }

    pub fn has_exceeded_buffer_byte_size(&self) -> bool {
        self.accumulated_byte_size >= self.thresholds.max_buffer_size_in_bytes
    }

    /// Whether the commit deadline has passed, read against the wall clock.
    pub fn has_exceeded_last_buffer_commit_time(&self) -> bool {
        self.has_exceeded_last_buffer_commit_time_at(Utc::now())
    }

    pub fn has_exceeded_last_buffer_commit_time_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_commit_deadline
    }

    /// True if any threshold has been crossed.
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.readiness_at(now).is_ready()
    }

    /// Evaluate all three thresholds at `now`.
    pub fn readiness_at(&self, now: DateTime<Utc>) -> BufferReadiness {
        BufferReadiness {
            message_count: self.has_exceeded_max_message_count(),
            byte_size: self.has_exceeded_buffer_byte_size(),
            commit_time: self.has_exceeded_last_buffer_commit_time_at(now),
        }
    }

    /// Start a fresh buffer with the same thresholds.
    ///
    /// The new deadline is measured from the renewal instant, not from the
    /// previous deadline.
    #[must_use]
    pub fn renew(&self) -> Self {
        self.renew_at(Utc::now())
    }

    #[must_use]
    pub fn renew_at(&self, now: DateTime<Utc>) -> Self {
        Self::new_at(self.thresholds, now)
    }

    pub fn thresholds(&self) -> BufferThresholds {
        self.thresholds
    }

    pub fn accumulated_message_count(&self) -> u64 {
        self.accumulated_message_count
    }

    pub fn accumulated_byte_size(&self) -> u64 {
        self.accumulated_byte_size
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn next_commit_deadline(&self) -> DateTime<Utc> {
        self.next_commit_deadline
    }

    /// True if nothing has been appended since construction.
    pub fn is_empty(&self) -> bool {
        self.accumulated_message_count == 0
    }
}
