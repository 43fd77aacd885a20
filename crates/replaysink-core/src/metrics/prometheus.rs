//! Prometheus metrics export.

use crate::buffer::FlushReason;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "replaysink";

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 7] = [100, 250, 500, 1000, 2500, 5000, 10000];

const FLUSH_REASONS: [FlushReason; 4] = [
    FlushReason::MessageCount,
    FlushReason::ByteSize,
    FlushReason::CommitTime,
    FlushReason::Shutdown,
];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Kafka-related errors (poll, commit, seek)
    Kafka,
    /// Failed buffer commits
    Buffer,
}

impl ErrorType {
    const ALL: [ErrorType; 2] = [ErrorType::Kafka, ErrorType::Buffer];

    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Kafka => "kafka",
            ErrorType::Buffer => "buffer",
        }
    }

    fn index(&self) -> usize {
        match self {
            ErrorType::Kafka => 0,
            ErrorType::Buffer => 1,
        }
    }
}

fn reason_index(reason: FlushReason) -> usize {
    match reason {
        FlushReason::MessageCount => 0,
        FlushReason::ByteSize => 1,
        FlushReason::CommitTime => 2,
        FlushReason::Shutdown => 3,
    }
}

/// Ingestion metrics with counters, gauges, and histograms.
#[derive(Default)]
pub struct IngestionMetrics {
    // === COUNTERS ===
    fragments_consumed_total: AtomicU64,
    bytes_consumed_total: AtomicU64,

    /// Errors by type, indexed by `ErrorType::index`
    errors: [AtomicU64; 2],

    /// Successful buffer commits
    flushes_total: AtomicU64,
    /// Successful buffer commits by reason, indexed by `reason_index`
    flushes_by_reason: [AtomicU64; 4],
    fragments_flushed_total: AtomicU64,
    bytes_flushed_total: AtomicU64,

    /// Buffer commits that raised `BufferCommitFailed`
    commit_failures_total: AtomicU64,

    /// Partitions rewound after a failed commit
    redeliveries_total: AtomicU64,

    // === GAUGES ===
    buffered_fragments: AtomicU64,
    buffered_bytes: AtomicU64,
    active_partitions: AtomicU64,

    /// Consumed but uncommitted fragments, summed over partitions
    consumer_lag: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,

    /// Buckets: [0.1s, 0.25s, 0.5s, 1.0s, 2.5s, 5.0s, 10.0s, +Inf]
    flush_duration_buckets: [AtomicU64; 8],
}

impl IngestionMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    /// Record one fragment consumed from Kafka.
    pub fn record_fragment(&self, size: u64) {
        self.fragments_consumed_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_consumed_total.fetch_add(size, Ordering::Relaxed);
    }

    /// Record an error with a specific type label.
    pub fn record_error_by_type(&self, error_type: ErrorType) {
        self.errors[error_type.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful buffer commit.
    ///
    /// Every commit attempt, successful or not, feeds the duration histogram.
    pub fn record_flush(&self, reason: FlushReason, fragments: usize, bytes: u64, duration: Duration) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
        self.flushes_by_reason[reason_index(reason)].fetch_add(1, Ordering::Relaxed);
        self.fragments_flushed_total
            .fetch_add(fragments as u64, Ordering::Relaxed);
        self.bytes_flushed_total.fetch_add(bytes, Ordering::Relaxed);
        self.observe_flush_duration(duration);
    }

    /// Record a buffer commit that failed.
    pub fn record_commit_failure(&self, duration: Duration) {
        self.commit_failures_total.fetch_add(1, Ordering::Relaxed);
        self.record_error_by_type(ErrorType::Buffer);
        self.observe_flush_duration(duration);
    }

    /// Record a partition rewound for redelivery.
    pub fn record_redelivery(&self) {
        self.redeliveries_total.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_flush_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the buffered totals across all partition workers.
    pub fn set_buffered(&self, fragments: u64, bytes: u64) {
        self.buffered_fragments.store(fragments, Ordering::Relaxed);
        self.buffered_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_active_partitions(&self, count: u64) {
        self.active_partitions.store(count, Ordering::Relaxed);
    }

    pub fn set_consumer_lag(&self, lag: u64) {
        self.consumer_lag.store(lag, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn fragments_consumed_total(&self) -> u64 {
        self.fragments_consumed_total.load(Ordering::Relaxed)
    }

    pub fn bytes_consumed_total(&self) -> u64 {
        self.bytes_consumed_total.load(Ordering::Relaxed)
    }

    /// Get total errors across all types.
    pub fn errors_total(&self) -> u64 {
        self.errors.iter().map(|e| e.load(Ordering::Relaxed)).sum()
    }

    /// Get error count by type.
    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.errors[error_type.index()].load(Ordering::Relaxed)
    }

    pub fn flushes_total(&self) -> u64 {
        self.flushes_total.load(Ordering::Relaxed)
    }

    pub fn flushes_by_reason(&self, reason: FlushReason) -> u64 {
        self.flushes_by_reason[reason_index(reason)].load(Ordering::Relaxed)
    }

    pub fn fragments_flushed_total(&self) -> u64 {
        self.fragments_flushed_total.load(Ordering::Relaxed)
    }

    pub fn bytes_flushed_total(&self) -> u64 {
        self.bytes_flushed_total.load(Ordering::Relaxed)
    }

    pub fn commit_failures_total(&self) -> u64 {
        self.commit_failures_total.load(Ordering::Relaxed)
    }

    pub fn redeliveries_total(&self) -> u64 {
        self.redeliveries_total.load(Ordering::Relaxed)
    }

    pub fn buffered_fragments(&self) -> u64 {
        self.buffered_fragments.load(Ordering::Relaxed)
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes.load(Ordering::Relaxed)
    }

    pub fn active_partitions(&self) -> u64 {
        self.active_partitions.load(Ordering::Relaxed)
    }

    pub fn consumer_lag(&self) -> u64 {
        self.consumer_lag.load(Ordering::Relaxed)
    }

    /// Get flush duration histogram data for Prometheus export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.flush_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.flush_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use replaysink_core::metrics::IngestionMetrics;
    ///
    /// let metrics = IngestionMetrics::new();
    /// metrics.record_fragment(512);
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("replaysink_fragments_consumed_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with custom prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut out = PrometheusWriter::new(prefix);

        // === COUNTERS ===
        out.single(
            "fragments_consumed_total",
            "counter",
            "Total recording fragments consumed from Kafka",
            self.fragments_consumed_total(),
        );
        out.single(
            "bytes_consumed_total",
            "counter",
            "Total payload bytes consumed from Kafka",
            self.bytes_consumed_total(),
        );
        out.single(
            "errors_total",
            "counter",
            "Total errors encountered",
            self.errors_total(),
        );
        out.labeled(
            "errors",
            "counter",
            "Errors by type",
            "type",
            ErrorType::ALL
                .iter()
                .map(|t| (t.as_label(), self.errors_by_type(*t))),
        );
        out.single(
            "flushes_total",
            "counter",
            "Total buffer commits to blob storage",
            self.flushes_total(),
        );
        out.labeled(
            "flushes",
            "counter",
            "Buffer commits by flush reason",
            "reason",
            FLUSH_REASONS
                .iter()
                .map(|r| (r.as_str(), self.flushes_by_reason(*r))),
        );
        out.single(
            "fragments_flushed_total",
            "counter",
            "Total fragments written to blob storage",
            self.fragments_flushed_total(),
        );
        out.single(
            "bytes_flushed_total",
            "counter",
            "Total payload bytes written to blob storage",
            self.bytes_flushed_total(),
        );
        out.single(
            "commit_failures_total",
            "counter",
            "Total failed buffer commits",
            self.commit_failures_total(),
        );
        out.single(
            "redeliveries_total",
            "counter",
            "Partitions rewound for redelivery after a failed commit",
            self.redeliveries_total(),
        );

        // === GAUGES ===
        out.single(
            "buffered_fragments",
            "gauge",
            "Fragments currently buffered across partitions",
            self.buffered_fragments(),
        );
        out.single(
            "buffered_bytes",
            "gauge",
            "Payload bytes currently buffered across partitions",
            self.buffered_bytes(),
        );
        out.single(
            "active_partitions",
            "gauge",
            "Partitions with a live buffer worker",
            self.active_partitions(),
        );
        out.single(
            "consumer_lag",
            "gauge",
            "Consumed fragments not yet committed",
            self.consumer_lag(),
        );

        // === HISTOGRAM ===
        out.histogram(
            "flush_duration_seconds",
            "Duration of buffer commit attempts",
            &self.flush_duration_histogram(),
        );

        out.finish()
    }
}

/// Accumulates Prometheus exposition text under one prefix.
struct PrometheusWriter<'a> {
    prefix: &'a str,
    output: String,
}

impl<'a> PrometheusWriter<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            prefix,
            output: String::with_capacity(4096),
        }
    }

    fn header(&mut self, name: &str, kind: &str, help: &str) {
        // Writing to a String cannot fail.
        let _ = writeln!(self.output, "# HELP {}_{} {}", self.prefix, name, help);
        let _ = writeln!(self.output, "# TYPE {}_{} {}", self.prefix, name, kind);
    }

    fn single(&mut self, name: &str, kind: &str, help: &str, value: u64) {
        self.header(name, kind, help);
        let _ = writeln!(self.output, "{}_{} {}\n", self.prefix, name, value);
    }

    fn labeled<'l>(
        &mut self,
        name: &str,
        kind: &str,
        help: &str,
        label: &str,
        values: impl Iterator<Item = (&'l str, u64)>,
    ) {
        self.header(name, kind, help);
        for (label_value, value) in values {
            let _ = writeln!(
                self.output,
                "{}_{}{{{}=\"{}\"}} {}",
                self.prefix, name, label, label_value, value
            );
        }
        self.output.push('\n');
    }

    fn histogram(&mut self, name: &str, help: &str, hist: &FlushDurationHistogram) {
        self.header(name, "histogram", help);
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                self.output,
                "{}_{}_bucket{{le=\"{}\"}} {}",
                self.prefix, name, le, count
            );
        }
        let _ = writeln!(
            self.output,
            "{}_{}_bucket{{le=\"+Inf\"}} {}",
            self.prefix, name, hist.inf_bucket
        );
        let _ = writeln!(self.output, "{}_{}_sum {}", self.prefix, name, hist.sum_seconds);
        let _ = writeln!(self.output, "{}_{}_count {}", self.prefix, name, hist.count);
    }

    fn finish(self) -> String {
        self.output
    }
}

/// Flush duration histogram data for export.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 7],
    /// +Inf bucket count
    pub inf_bucket: u64,
}
