//! Ingest command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use clap::Args;
use replaysink_core::engine::IngestionEngine;
use replaysink_core::Config;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Overrides applied on top of the config file.
#[derive(Debug, Default, Args)]
pub struct IngestArgs {
    /// Override Kafka bootstrap servers (comma separated)
    #[arg(long)]
    pub bootstrap_servers: Option<String>,

    /// Override Kafka topic
    #[arg(long)]
    pub topic: Option<String>,

    /// Override consumer group
    #[arg(long)]
    pub consumer_group: Option<String>,

    /// Flush after this many buffered fragments
    #[arg(long)]
    pub max_buffer_message_count: Option<u64>,

    /// Flush once buffered payloads reach this many bytes
    #[arg(long)]
    pub max_buffer_size_in_bytes: Option<u64>,

    /// Flush this many seconds after the buffer was started
    #[arg(long)]
    pub max_buffer_time_in_seconds: Option<u64>,
}

impl IngestArgs {
    /// Apply CLI overrides to a loaded config.
    pub fn apply(self, config: &mut Config) {
        if let Some(servers) = self.bootstrap_servers {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(t) = self.topic {
            config.kafka.topic = t;
        }
        if let Some(g) = self.consumer_group {
            config.kafka.consumer_group = g;
        }
        if let Some(count) = self.max_buffer_message_count {
            config.buffer.max_buffer_message_count = count;
        }
        if let Some(bytes) = self.max_buffer_size_in_bytes {
            config.buffer.max_buffer_size_in_bytes = bytes;
        }
        if let Some(seconds) = self.max_buffer_time_in_seconds {
            config.buffer.max_buffer_time_in_seconds = seconds;
        }
    }
}

/// Run the ingestion engine.
pub async fn run(mut config: Config, args: IngestArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        storage = %config.storage.location,
        "Starting ingestion engine"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let mut engine = IngestionEngine::new(config).await?;
    let shutdown_tx = engine.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: engine.health(),
        metrics: engine.metrics(),
    });

    let server_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        server_shutdown_rx,
    ));

    // Translate SIGINT and SIGTERM into a graceful shutdown
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, initiating graceful shutdown");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler, using Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        let _ = shutdown_signal.send(());
    });

    let result = engine.run().await;

    // Stop the HTTP servers whichever way the engine exited
    let _ = shutdown_tx.send(());
    result?;

    info!("Ingestion engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::from_toml_str(
            r#"
            [kafka]
            bootstrap_servers = ["localhost:9092"]

            [storage]
            location = "memory://"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = base_config();
        IngestArgs {
            bootstrap_servers: Some("a:9092, b:9092,".into()),
            topic: Some("replays".into()),
            consumer_group: None,
            max_buffer_message_count: Some(3),
            max_buffer_size_in_bytes: None,
            max_buffer_time_in_seconds: Some(60),
        }
        .apply(&mut config);

        assert_eq!(config.kafka.bootstrap_servers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.kafka.topic, "replays");
        assert_eq!(config.kafka.consumer_group, "ingest-replay-recordings-buffered");
        assert_eq!(config.buffer.max_buffer_message_count, 3);
        assert_eq!(config.buffer.max_buffer_size_in_bytes, 2_500_000);
        assert_eq!(config.buffer.max_buffer_time_in_seconds, 60);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = base_config();
        IngestArgs::default().apply(&mut config);

        assert_eq!(config.kafka.bootstrap_servers, vec!["localhost:9092"]);
        assert_eq!(config.buffer.max_buffer_message_count, 100);
    }
}
