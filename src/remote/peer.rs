//! Transport Traits
//!
//! Traits implemented by the NATS and MQTT adapters, and by in-memory
//! doubles in tests.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use super::InboundMessage;

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection to the remote side failed or was lost
    ConnectionLost(String),
    /// Nobody is listening on the subject
    NoResponders,
    /// Operation timed out
    Timeout,
    /// Remote side rejected the operation
    Rejected(String),
    /// Other error
    Other(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            RemoteError::NoResponders => write!(f, "No responders"),
            RemoteError::Timeout => write!(f, "Operation timed out"),
            RemoteError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            RemoteError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Status of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Not connected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection failed, backing off before retry
    Backoff,
}

/// The message-bus side of the bridge.
///
/// Implemented by `NatsBus` in production. Forwarding workers use
/// [`request`](MessageBus::request) as a send-with-acknowledgement; the
/// bridge service uses [`publish`](MessageBus::publish) to answer requests.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Send a request and wait for the first reply.
    ///
    /// Callers bound the wait with their own timeout.
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, RemoteError>;

    /// Publish a message without waiting for a reply
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RemoteError>;
}

/// Receiver for messages coming in from the MQTT broker
#[async_trait]
pub trait InboundSink: Send + Sync + 'static {
    /// Deliver one inbound message. May wait when forwarding queues are full.
    async fn deliver(&self, message: InboundMessage);
}
