//! Transport Adapters
//!
//! Production implementations of the transport seams:
//! - [`MqttConnector`]: drives an MQTT v5 session with rumqttc, applies
//!   [`ConnectorEvent`](crate::remote::ConnectorEvent)s and feeds inbound
//!   publishes to an [`InboundSink`](crate::remote::InboundSink)
//! - [`NatsBus`]: a [`MessageBus`](crate::remote::MessageBus) over async-nats
//!   that also serves the bridge endpoints

mod mqtt;
mod nats;


pub use mqtt::MqttConnector;
pub use nats::NatsBus;
