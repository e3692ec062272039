//! Wiring of provider, listeners and dispatcher for the `listen` command.

use crate::config::{DemoQueues, ServiceConfig};
use crate::error::ServiceError;
use crate::listeners::{build_registry, MessageSinks};
use queue_listener_runtime::{
    Dispatcher, DispatcherHandle, InMemoryProvider, ProviderConfig, QueueService,
    QueueServiceConfig, QueueServiceFactory,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;

/// Build the configured queue service. In-memory queues are declared up
/// front; AWS queues must already exist.
pub async fn connect(
    config: &ServiceConfig,
    queues: &DemoQueues,
) -> Result<Arc<dyn QueueService>, ServiceError> {
    match &config.provider {
        ProviderConfig::InMemory(in_memory) => {
            let provider = InMemoryProvider::new(in_memory.clone());
            for descriptor in queues.descriptors() {
                provider.declare_queue(descriptor).await?;
            }
            info!(queues = queues.iter().count(), "In-memory queues declared");
            Ok(Arc::new(provider))
        }
        ProviderConfig::AwsSqs(_) => {
            let service = QueueServiceFactory::create(QueueServiceConfig {
                provider: config.provider.clone(),
            })
            .await?;
            Ok(service)
        }
    }
}

/// Start every demo listener against `service`
pub fn start_listeners(
    config: &ServiceConfig,
    queues: &DemoQueues,
    service: Arc<dyn QueueService>,
    sinks: &MessageSinks,
) -> Result<DispatcherHandle, ServiceError> {
    let registry = build_registry(config, queues, sinks)?;
    info!(listeners = registry.len(), "Listener registry built");
    Ok(Dispatcher::new(service, registry).start())
}

/// Run the listeners until `shutdown` resolves, then drain within the
/// configured timeout
pub async fn listen<F>(config: &ServiceConfig, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()>,
{
    let queues = config.queues.resolve()?;
    let service = connect(config, &queues).await?;
    let sinks = MessageSinks::new();
    let handle = start_listeners(config, &queues, service, &sinks)?;

    info!("Listening; press Ctrl+C to stop");
    shutdown.await;

    let timeout = config.shutdown_timeout();
    if handle.shutdown_timeout(timeout).await {
        info!(
            strings = sinks.strings.len(),
            temperatures = sinks.temperatures.len(),
            "Listeners stopped"
        );
        Ok(())
    } else {
        warn!(timeout_seconds = timeout.as_secs(), "Shutdown timed out");
        Err(ServiceError::ShutdownTimedOut {
            seconds: timeout.as_secs(),
        })
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
