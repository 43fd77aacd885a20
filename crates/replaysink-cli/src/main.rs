//! replaysink CLI - buffered ingestion of session-replay recordings.

use anyhow::Result;
use clap::{Parser, Subcommand};
use replaysink_core::config::LogFormat;
use replaysink_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Kafka-related error (connection, poll, offset commit, seek)
    KafkaError = 2,
    /// Storage error (invalid location, unsupported backend)
    StorageError = 4,
    /// Buffer commits kept failing and the consumer halted
    BufferCommitError = 7,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, by type where possible and by message
    /// otherwise.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<replaysink_core::Error>() {
            return Self::from_core_error(core);
        }
        if error.downcast_ref::<toml::de::Error>().is_some() {
            return ExitCode::ConfigError;
        }

        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("kafka")
            || error_str.contains("rdkafka")
            || error_str.contains("consumer")
        {
            ExitCode::KafkaError
        } else if error_str.contains("buffer commit") {
            ExitCode::BufferCommitError
        } else if error_str.contains("storage")
            || error_str.contains("s3")
            || error_str.contains("object_store")
        {
            ExitCode::StorageError
        } else {
            ExitCode::RuntimeError
        }
    }

    fn from_core_error(error: &replaysink_core::Error) -> Self {
        use replaysink_core::Error;

        match error {
            Error::Config(_) => ExitCode::ConfigError,
            Error::Kafka(_) => ExitCode::KafkaError,
            Error::Storage(_) => ExitCode::StorageError,
            Error::BufferCommitFailed(_) => ExitCode::BufferCommitError,
            Error::Io(_) => ExitCode::RuntimeError,
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "replaysink")]
#[command(about = "Buffered session-replay recording ingestion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume recordings and commit them to blob storage
    Ingest(commands::ingest::IngestArgs),

    /// Show status and health of a running instance
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // The config file is optional here; logging falls back to JSON at info.
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(
                monitoring
                    .as_ref()
                    .map(|m| m.log_level.as_directive())
                    .unwrap_or("info"),
            ),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.map(|m| m.log_format).unwrap_or(LogFormat::Json) {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest(args) => {
            let config = load_config(cli.config.as_deref())?;
            commands::ingest::run(config, args).await?;
        }

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Parse the config file without validating it, so CLI overrides can fill
/// in missing values first.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or_else(|| Path::new("config.toml"));

    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content).map_err(replaysink_core::Error::from)?;
    Ok(config)
}
