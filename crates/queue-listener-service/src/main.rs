use anyhow::Context;
use clap::Parser;
use queue_listener_service::{cli, telemetry, Cli, ServiceError};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("queue-listener failed: {:#}", e);
        eprintln!("Error: {:#}", e);

        let exit_code = e
            .downcast_ref::<ServiceError>()
            .map(ServiceError::exit_code)
            .unwrap_or(1);
        std::process::exit(exit_code);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.service_config()?;
    telemetry::init_logging(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = ?config.provider.provider_type(),
        "Starting queue-listener"
    );

    cli::run(cli.command, config)
        .await
        .context("command failed")
}
