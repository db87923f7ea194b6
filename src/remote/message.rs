//! Messages exchanged between the bridge core and its transports.

use bytes::Bytes;

/// A message received from the MQTT broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw MQTT payload
    pub payload: Bytes,
    /// MQTT v5 correlation data, present on request/reply responses
    pub correlation_data: Option<Bytes>,
}

impl InboundMessage {
    /// Create a plain topic message without correlation data
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            correlation_data: None,
        }
    }

    /// Attach correlation data (marks the message as a response)
    pub fn with_correlation(mut self, correlation: impl Into<Bytes>) -> Self {
        self.correlation_data = Some(correlation.into());
        self
    }
}

/// A message to publish on the MQTT broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPublish {
    /// Destination topic
    pub topic: String,
    /// Message payload
    pub payload: Bytes,
    /// Correlation data for request/reply
    pub correlation_data: Option<Bytes>,
    /// Topic the responder should answer on
    pub response_topic: Option<String>,
}

impl OutboundPublish {
    /// Create a fire-and-forget publish
    pub fn new(topic: String, payload: Bytes) -> Self {
        Self {
            topic,
            payload,
            correlation_data: None,
            response_topic: None,
        }
    }
}

/// Commands from the bridge core to the MQTT connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// Start (or confirm) an MQTT subscription for a topic
    Subscribe(String),
    /// The last registration for a topic is gone
    Unsubscribe(String),
    /// Publish a message
    Publish(OutboundPublish),
}

/// A request received on one of the bridge's bus endpoints
#[derive(Debug, Clone)]
pub struct BusRequest {
    /// Subject the request arrived on
    pub subject: String,
    /// Subject to send the response to
    pub reply: Option<String>,
    /// Encoded request body
    pub payload: Bytes,
}
