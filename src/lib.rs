//! edgebridge - MQTT to NATS edge gateway bridge
//!
//! Lets bus clients register MQTT topics and receive every message published
//! on them on a dynamically allocated NATS subject, publish on MQTT topics,
//! and run request/reply calls against MQTT responders.

pub mod bridge;
pub mod client;
pub mod config;
pub mod connector;
pub mod correlation;
pub mod error;
pub mod forwarding;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod remote;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeCore, BridgeService};
pub use client::{BridgeClient, ClientError};
pub use config::Config;
pub use connector::{MqttConnector, NatsBus};
pub use error::BridgeError;
pub use metrics::{Metrics, MetricsServer};
pub use protocol::WireFormat;
pub use remote::{ConnectorEvent, InboundSink, MessageBus, RemoteError, RemoteStatus};
