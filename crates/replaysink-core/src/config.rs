//! Configuration structures for replaysink.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    pub kafka: KafkaConfig,

    /// Blob storage configuration
    pub storage: StorageConfig,

    /// Recording buffer configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Topic to consume recordings from
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// How long a single poll waits before the engine runs an idle tick
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the longest flush)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,

    /// SSL client certificate location
    pub ssl_cert_location: Option<PathBuf>,

    /// SSL client key location
    pub ssl_key_location: Option<PathBuf>,
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where fragments are written: `s3://bucket[/prefix]`, `memory://`,
    /// or a local directory
    pub location: String,

    /// Prefix prepended to every storage key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// AWS region (S3)
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,
}

/// Recording buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Flush once this many fragments are buffered
    #[serde(default = "default_max_buffer_message_count")]
    pub max_buffer_message_count: u64,

    /// Flush once buffered payloads reach this many bytes
    #[serde(default = "default_max_buffer_size_in_bytes")]
    pub max_buffer_size_in_bytes: u64,

    /// Flush once this many seconds have passed since the buffer was created
    #[serde(default = "default_max_buffer_time_in_seconds")]
    pub max_buffer_time_in_seconds: u64,

    /// Upper bound on a single batch commit; 0 disables the timeout
    #[serde(default = "default_commit_timeout_seconds")]
    pub commit_timeout_seconds: u64,

    /// Halt the consumer after this many failed commits in a row
    #[serde(default = "default_max_consecutive_commit_failures")]
    pub max_consecutive_commit_failures: u32,
}

impl BufferConfig {
    /// Commit timeout, if enabled.
    pub fn commit_timeout(&self) -> Option<Duration> {
        (self.commit_timeout_seconds > 0).then(|| Duration::from_secs(self.commit_timeout_seconds))
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_message_count: default_max_buffer_message_count(),
            max_buffer_size_in_bytes: default_max_buffer_size_in_bytes(),
            max_buffer_time_in_seconds: default_max_buffer_time_in_seconds(),
            commit_timeout_seconds: default_commit_timeout_seconds(),
            max_consecutive_commit_failures: default_max_consecutive_commit_failures(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_topic() -> String {
    "ingest-replay-recordings".to_string()
}
fn default_consumer_group() -> String {
    "ingest-replay-recordings-buffered".to_string()
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000 // 5 minutes - must exceed longest flush time
}
fn default_key_prefix() -> String {
    "recordings".to_string()
}
fn default_max_buffer_message_count() -> u64 {
    100
}
fn default_max_buffer_size_in_bytes() -> u64 {
    2_500_000
}
fn default_max_buffer_time_in_seconds() -> u64 {
    1
}
fn default_commit_timeout_seconds() -> u64 {
    30
}
fn default_max_consecutive_commit_failures() -> u32 {
    10
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.storage.location.is_empty() {
            return Err(crate::Error::Config("Storage location is required".into()));
        }

        if self.buffer.max_consecutive_commit_failures == 0 {
            return Err(crate::Error::Config(
                "max_consecutive_commit_failures must be at least 1".into(),
            ));
        }

        if self.buffer.commit_timeout_seconds.saturating_mul(1000)
            >= u64::from(self.kafka.max_poll_interval_ms)
        {
            tracing::warn!(
                commit_timeout_seconds = self.buffer.commit_timeout_seconds,
                max_poll_interval_ms = self.kafka.max_poll_interval_ms,
                "Commit timeout exceeds max poll interval; a slow flush may trigger a rebalance"
            );
        }

        Ok(())
    }
}
