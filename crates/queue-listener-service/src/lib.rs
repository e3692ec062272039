//! # Queue Listener Service
//!
//! Demo service built on `queue-listener-runtime`. It declares seven demo
//! queues, registers one listener per queue and exposes a producer for each.
//!
//! - [`config`] loads layered YAML/environment configuration
//! - [`listeners`] registers the demo handlers, which record into [`MessageSinks`]
//! - [`producer`] publishes onto the demo queues
//! - [`app`] wires provider, listeners and graceful shutdown
//! - [`cli`] is the `queue-listener` command line

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod listeners;
pub mod producer;
pub mod telemetry;

pub use app::{connect, listen, shutdown_signal, start_listeners};
pub use cli::{Cli, Commands, SendCommand};
pub use config::{DemoQueues, ListenerOverride, LoggingConfig, QueueNames, ServiceConfig};
pub use device::DeviceTemperature;
pub use error::{ConfigError, ServiceError};
pub use listeners::{build_registry, MessageSinks, UNIQUE_ID_HEADER};
pub use producer::ProducerService;
