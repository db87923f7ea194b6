//! Configuration Module
//!
//! Provides TOML-based configuration for edgebridge with support for:
//! - MQTT broker connection
//! - NATS connection
//! - Bridge behaviour (basename, forwarding timeout, queue size, codec)
//! - Metrics endpoint
//! - Environment variable overrides (EDGEBRIDGE__* prefix)
//! - The gateway's legacy variables `MQTT_SERVER`, `NATS_SERVER` and
//!   `IOTEDGE_DEVICEID`

use std::net::SocketAddr;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use bridge::BridgeConfig;
pub use transport::{MqttConfig, NatsConfig};

mod bridge;
mod transport;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// MQTT broker connection
    pub mqtt: MqttConfig,
    /// NATS connection
    pub nats: NatsConfig,
    /// Registration and forwarding behaviour
    pub bridge: BridgeConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the HTTP endpoint is served
    pub enabled: bool,
    /// HTTP bind address for /metrics, /healthz, /readyz
    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,
}

fn default_metrics_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports three forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `EDGEBRIDGE__` prefix with double underscores for nesting:
    ///    - `EDGEBRIDGE__MQTT__ADDRESS=broker:1883` overrides `mqtt.address`
    ///    - `EDGEBRIDGE__BRIDGE__FORWARD_TIMEOUT=10s` overrides `bridge.forward_timeout`
    /// 3. The legacy `MQTT_SERVER`, `NATS_SERVER` and `IOTEDGE_DEVICEID` variables,
    ///    which win over everything else
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("mqtt.address", "mosquitto:1883")?
            .set_default("mqtt.keepalive", 60)?
            .set_default("mqtt.clean_start", true)?
            .set_default("mqtt.reconnect_interval", 1)?
            .set_default("mqtt.max_reconnect_interval", 60)?
            .set_default("mqtt.channel_capacity", 100)?
            .set_default("nats.url", "nats://nats:4222")?
            .set_default("nats.name", "edgebridge")?
            .set_default("nats.connect_attempts", 30)?
            .set_default("nats.retry_delay", "1s")?
            .set_default("nats.request_timeout", "10s")?
            .set_default("bridge.basename", "edgebridge")?
            .set_default("bridge.device_id", "null")?
            .set_default("bridge.forward_timeout", "5s")?
            .set_default("bridge.queue_capacity", 20)?
            .set_default("bridge.response_topic_prefix", "edgebridge-response/")?
            .set_default("bridge.wire_format", "bincode")?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.bind", "0.0.0.0:9090")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("EDGEBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = cfg.try_deserialize()?;
        config.apply_legacy_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the gateway's legacy environment variables through `lookup`
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(address) = set("MQTT_SERVER") {
            self.mqtt.address = address;
        }
        if let Some(url) = set("NATS_SERVER") {
            self.nats.url = url;
        }
        if let Some(device) = set("IOTEDGE_DEVICEID") {
            self.bridge.device_id = device;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bridge.validate().map_err(ConfigError::Validation)?;

        if self.mqtt.address.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.address must not be empty".to_string(),
            ));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "mqtt.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.nats.url.is_empty() {
            return Err(ConfigError::Validation(
                "nats.url must not be empty".to_string(),
            ));
        }
        if self.nats.connect_attempts == 0 {
            return Err(ConfigError::Validation(
                "nats.connect_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
