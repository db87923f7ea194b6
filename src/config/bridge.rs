//! Bridge Configuration
//!
//! Settings for the registration and forwarding engine.

use std::time::Duration;

use serde::Deserialize;

use crate::forwarding::{DEFAULT_FORWARD_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
use crate::protocol::WireFormat;

/// Registration and forwarding behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Prefix for the request endpoints and for generated subjects
    pub basename: String,

    /// Device identifier stamped on every forwarded message
    pub device_id: String,

    /// Time a consumer has to acknowledge a forwarded message before its
    /// registration is dropped
    #[serde(with = "humantime_serde")]
    pub forward_timeout: Duration,

    /// Delivery queue capacity per registration
    pub queue_capacity: usize,

    /// MQTT topic prefix responders answer request/reply calls on. Topics
    /// under it cannot be registered.
    pub response_topic_prefix: String,

    /// Record format on the bus
    pub wire_format: WireFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            basename: "edgebridge".to_string(),
            device_id: "null".to_string(),
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            response_topic_prefix: "edgebridge-response/".to_string(),
            wire_format: WireFormat::default(),
        }
    }
}

impl BridgeConfig {
    /// Response topic for a request published on `topic`
    pub fn response_topic(&self, topic: &str) -> String {
        format!("{}{}", self.response_topic_prefix, topic)
    }

    /// Wildcard filter covering every response topic
    pub fn response_filter(&self) -> String {
        format!("{}#", self.response_topic_prefix)
    }

    /// Whether a topic belongs to the response namespace
    pub fn is_response_topic(&self, topic: &str) -> bool {
        topic.starts_with(&self.response_topic_prefix)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.basename.is_empty() {
            return Err("bridge.basename must not be empty".to_string());
        }
        if self.basename.contains(['*', '>', ' ']) {
            return Err(format!(
                "bridge.basename '{}' is not a valid subject token",
                self.basename
            ));
        }
        if self.queue_capacity == 0 {
            return Err("bridge.queue_capacity must be at least 1".to_string());
        }
        if self.forward_timeout.is_zero() {
            return Err("bridge.forward_timeout must be greater than zero".to_string());
        }
        if self.response_topic_prefix.is_empty() {
            return Err("bridge.response_topic_prefix must not be empty".to_string());
        }
        if self.response_topic_prefix.contains(['#', '+']) {
            return Err("bridge.response_topic_prefix must not contain wildcards".to_string());
        }
        Ok(())
    }
}
