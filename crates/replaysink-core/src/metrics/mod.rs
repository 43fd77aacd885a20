//! Ingestion metrics and Prometheus text export.

mod prometheus;

pub use prometheus::{ErrorType, FlushDurationHistogram, IngestionMetrics, DEFAULT_PREFIX};
