//! The seven demo listeners.
//!
//! | Queue                | Payload                   | Settings                          |
//! |----------------------|---------------------------|-----------------------------------|
//! | `string`             | raw string                | defaults                          |
//! | `string_with_header` | raw string + `uniqueId`   | defaults                          |
//! | `string_batch`       | batch of raw strings      | defaults                          |
//! | `delayed`            | raw string, sent delayed  | defaults                          |
//! | `parallel`           | raw string                | 5 concurrent, 2 per poll          |
//! | `fifo`               | raw string, content dedup | defaults                          |
//! | `device_temperature` | batch of JSON readings    | 5 s poll timeout                  |
//!
//! Every handler records into the injected [`MessageSinks`].

use crate::config::{DemoQueues, ServiceConfig};
use crate::device::DeviceTemperature;
use queue_listener_runtime::{
    ConfigurationError, Delivery, ListenerConfig, ListenerRegistry, ObservableSink, QueueName,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;

/// Header carrying the producer-assigned id on the header queue
pub const UNIQUE_ID_HEADER: &str = "uniqueId";

const PARALLEL_MAX_CONCURRENT_MESSAGES: u32 = 5;
const PARALLEL_MAX_MESSAGES_PER_POLL: u32 = 2;
const TEMPERATURE_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the demo handlers put what they received
#[derive(Debug, Clone, Default)]
pub struct MessageSinks {
    pub strings: Arc<ObservableSink<String>>,
    pub temperatures: Arc<ObservableSink<DeviceTemperature>>,
}

impl MessageSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.strings.reset();
        self.temperatures.reset();
    }
}

/// Build the registry of demo listeners, applying configured overrides
pub fn build_registry(
    config: &ServiceConfig,
    queues: &DemoQueues,
    sinks: &MessageSinks,
) -> Result<ListenerRegistry, ConfigurationError> {
    let listener = |queue: &QueueName| {
        config.listener_config(ListenerConfig::new(DemoQueues::descriptor(queue)))
    };
    let mut builder = ListenerRegistry::builder();

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw(listener(&queues.string), move |delivery: Delivery<String>| {
        let strings = Arc::clone(&strings);
        async move {
            debug!(message_id = %delivery.message_id, "Received string message");
            strings.append(delivery.payload);
            Ok(())
        }
    });

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw(
        listener(&queues.string_with_header),
        move |delivery: Delivery<String>| {
            let strings = Arc::clone(&strings);
            async move {
                if let Some(unique_id) = delivery.header(UNIQUE_ID_HEADER) {
                    strings.record_header(UNIQUE_ID_HEADER, unique_id);
                }
                strings.append(delivery.payload);
                Ok(())
            }
        },
    );

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw_batch(
        listener(&queues.string_batch),
        move |deliveries: Vec<Delivery<String>>| {
            let strings = Arc::clone(&strings);
            async move {
                info!(count = deliveries.len(), "Received string batch");
                strings.append_all(deliveries.into_iter().map(|d| d.payload));
                Ok(())
            }
        },
    );

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw(listener(&queues.delayed), move |delivery: Delivery<String>| {
        let strings = Arc::clone(&strings);
        async move {
            strings.append(delivery.payload);
            Ok(())
        }
    });

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw(
        config.listener_config(
            ListenerConfig::new(DemoQueues::descriptor(&queues.parallel))
                .with_max_concurrent_messages(PARALLEL_MAX_CONCURRENT_MESSAGES)
                .with_max_messages_per_poll(PARALLEL_MAX_MESSAGES_PER_POLL),
        ),
        move |delivery: Delivery<String>| {
            let strings = Arc::clone(&strings);
            async move {
                strings.record_worker(delivery.worker_id);
                strings.append(delivery.payload);
                Ok(())
            }
        },
    );

    let strings = Arc::clone(&sinks.strings);
    builder.register_raw(listener(&queues.fifo), move |delivery: Delivery<String>| {
        let strings = Arc::clone(&strings);
        async move {
            debug!(
                message_id = %delivery.message_id,
                group = ?delivery.group_id,
                "Received FIFO message"
            );
            strings.append(delivery.payload);
            Ok(())
        }
    });

    let temperatures = Arc::clone(&sinks.temperatures);
    builder.register_typed_batch(
        config.listener_config(
            ListenerConfig::new(DemoQueues::descriptor(&queues.device_temperature))
                .with_poll_timeout(TEMPERATURE_POLL_TIMEOUT),
        ),
        move |deliveries: Vec<Delivery<DeviceTemperature>>| {
            let temperatures = Arc::clone(&temperatures);
            async move {
                temperatures.append_all(deliveries.into_iter().map(|d| d.payload));
                Ok(())
            }
        },
    );

    builder.build()
}
