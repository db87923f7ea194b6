//! Bridge error types.
//!
//! Every variant is recovered locally: request handlers turn it into the
//! `error` string of the bus response, so the `Display` text is part of the
//! wire contract.

use std::fmt;

use crate::protocol::CodecError;

/// Errors produced by the registration and forwarding engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The subject is not (or no longer) registered
    NotFound(String),
    /// A request named an empty MQTT topic
    EmptyTopic,
    /// The topic lies in the request/reply response namespace
    ReservedTopic(String),
    /// A request/reply call was issued without a usable timeout
    ZeroTimeout,
    /// A consumer did not acknowledge a forwarded message in time
    ForwardTimeout(String),
    /// No correlated response arrived within the caller's window
    ResponseTimeout,
    /// A request or response body could not be encoded or decoded
    Codec(String),
    /// The connector side of the bridge has gone away
    Closed,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(subject) => write!(f, "no topic found for subject '{}'", subject),
            Self::EmptyTopic => write!(f, "Empty topic received"),
            Self::ReservedTopic(topic) => {
                write!(f, "topic '{}' is reserved for request/reply responses", topic)
            }
            Self::ZeroTimeout => write!(f, "timeout is zero"),
            Self::ForwardTimeout(subject) => write!(f, "subject '{}' timed out", subject),
            Self::ResponseTimeout => write!(f, "timeout expired"),
            Self::Codec(msg) => write!(f, "codec error: {}", msg),
            Self::Closed => write!(f, "bridge is shutting down"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
