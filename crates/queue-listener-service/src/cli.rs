//! Command-line surface of the `queue-listener` binary.

use crate::app::{connect, listen, shutdown_signal};
use crate::config::ServiceConfig;
use crate::device::DeviceTemperature;
use crate::error::ServiceError;
use crate::producer::ProducerService;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue listener - demo producers and listeners for SQS-style queues
#[derive(Debug, Parser)]
#[command(name = "queue-listener")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run demo queue listeners or publish demo messages")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QL_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run all listeners until SIGINT or SIGTERM
    Listen,

    /// Publish a demo message
    Send {
        #[command(subcommand)]
        message: SendCommand,
    },
}

/// One subcommand per demo queue
#[derive(Debug, Subcommand)]
pub enum SendCommand {
    /// Plain string
    String { body: String },

    /// String with a `uniqueId` header; a random id is used when omitted
    WithUniqueId {
        body: String,
        #[arg(long)]
        unique_id: Option<String>,
    },

    /// Several strings in batches
    Batch {
        #[arg(required = true)]
        bodies: Vec<String>,
    },

    /// String that becomes visible after a delay
    Delayed {
        body: String,
        #[arg(long, default_value = "1")]
        delay_seconds: u64,
    },

    /// The same string `count` times to the parallel queue
    Parallel {
        body: String,
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// String to the FIFO queue
    Fifo { body: String },

    /// Device temperature reading as JSON
    Temperature {
        #[arg(long)]
        device_id: String,
        #[arg(long, allow_negative_numbers = true)]
        temperature: i32,
    },
}

// ============================================================================
// Execution
// ============================================================================

impl Cli {
    /// Load configuration and apply command-line overrides
    pub fn service_config(&self) -> Result<ServiceConfig, ServiceError> {
        let mut config = ServiceConfig::load(self.config.as_deref())?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Execute a parsed command
pub async fn run(command: Commands, config: ServiceConfig) -> Result<(), ServiceError> {
    match command {
        Commands::Listen => listen(&config, shutdown_signal()).await,
        Commands::Send { message } => send(message, &config).await,
    }
}

async fn send(command: SendCommand, config: &ServiceConfig) -> Result<(), ServiceError> {
    let queues = config.queues.resolve()?;
    let producer = ProducerService::new(connect(config, &queues).await?, queues);

    let ids = match command {
        SendCommand::String { body } => vec![producer.send_string(&body).await?],
        SendCommand::WithUniqueId { body, unique_id } => {
            let unique_id = unique_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            info!(unique_id = %unique_id, "Sending with unique id");
            vec![producer.send_string_with_unique_id(&body, &unique_id).await?]
        }
        SendCommand::Batch { bodies } => producer.send_string_batch(bodies).await?,
        SendCommand::Delayed { body, delay_seconds } => vec![
            producer
                .send_string_with_delay(&body, Duration::from_secs(delay_seconds))
                .await?,
        ],
        SendCommand::Parallel { body, count } => {
            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(producer.send_string_to_parallel(&body).await?);
            }
            ids
        }
        SendCommand::Fifo { body } => vec![producer.send_string_to_fifo(&body).await?],
        SendCommand::Temperature {
            device_id,
            temperature,
        } => {
            let reading = DeviceTemperature::new(device_id, temperature);
            vec![producer.send_device_temperature(&reading).await?]
        }
    };

    for id in &ids {
        println!("{}", id);
    }
    Ok(())
}
