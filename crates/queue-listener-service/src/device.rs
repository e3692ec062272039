//! Typed payload carried on the device temperature queue.

use serde::{Deserialize, Serialize};

/// A temperature reading reported by a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTemperature {
    pub device_id: String,
    pub temperature: i32,
}

impl DeviceTemperature {
    pub fn new(device_id: impl Into<String>, temperature: i32) -> Self {
        Self {
            device_id: device_id.into(),
            temperature,
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
