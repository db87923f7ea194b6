//! Transport Seams
//!
//! Shared abstractions over the two networks the bridge sits between. The
//! core never talks to an MQTT or NATS client directly: it sends
//! [`ConnectorEvent`]s to whatever drives the MQTT side, receives
//! [`InboundMessage`]s through an [`InboundSink`], and reaches bus
//! consumers through a [`MessageBus`].

mod message;
mod peer;

pub use message::{BusRequest, ConnectorEvent, InboundMessage, OutboundPublish};
pub use peer::{InboundSink, MessageBus, RemoteError, RemoteStatus};
