//! Transport Configuration
//!
//! Connection settings for the MQTT broker and the NATS server.

use std::time::Duration;

use serde::Deserialize;

/// MQTT broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address (host:port or just host)
    pub address: String,

    /// Client ID to use when connecting
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    pub keepalive: u16,

    /// Use clean start (no session persistence)
    pub clean_start: bool,

    /// Reconnect interval in seconds
    pub reconnect_interval: u64,

    /// Maximum reconnect interval in seconds (for exponential backoff)
    pub max_reconnect_interval: u64,

    /// Capacity of the client's request channel
    pub channel_capacity: usize,
}

fn default_client_id() -> String {
    format!("edgebridge-{}", std::process::id())
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            address: "mosquitto:1883".to_string(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: 60,
            clean_start: true,
            reconnect_interval: 1,
            max_reconnect_interval: 60,
            channel_capacity: 100,
        }
    }
}

impl MqttConfig {
    /// Get the reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Get the max reconnect interval as Duration
    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval.max(self.reconnect_interval))
    }

    /// Parse address into host and port, defaulting to 1883
    pub fn parse_address(&self) -> (String, u16) {
        if let Some((host, port_str)) = self.address.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
        (self.address.clone(), 1883)
    }
}

/// NATS connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Connection name reported to the server
    pub name: String,

    /// Initial connection attempts before giving up
    pub connect_attempts: u32,

    /// Delay between initial connection attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Upper bound for client-side requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://nats:4222".to_string(),
            name: "edgebridge".to_string(),
            connect_attempts: 30,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }
}
