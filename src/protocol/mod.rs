//! Bus Protocol
//!
//! Record types exchanged on the bridge's four bus endpoints, the data
//! envelope wrapped around forwarded MQTT payloads, and the codec used to
//! put them on the wire.
//!
//! Endpoints live below the bridge basename:
//!
//! | Subject                       | Request                 | Response            |
//! |-------------------------------|-------------------------|---------------------|
//! | `<basename>.config.register`  | [`RegisterRequest`]     | [`RegisterResponse`]|
//! | `<basename>.config.unregister`| [`UnregisterRequest`]   | [`UnregisterResponse`]|
//! | `<basename>.publish`          | [`PublishRequest`]      | [`PublishResponse`] |
//! | `<basename>.request-response` | [`RequestReplyRequest`] | [`RequestReplyResponse`]|

mod codec;
mod error;


use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use codec::WireFormat;
pub use error::CodecError;

/// Bus endpoints served by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Register an MQTT topic and obtain a subject
    Register,
    /// Drop a previously returned subject
    Unregister,
    /// Publish a message on an MQTT topic
    Publish,
    /// Publish and wait for a correlated MQTT response
    RequestReply,
}

impl Endpoint {
    /// All endpoints, in subscription order
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Register,
        Endpoint::Unregister,
        Endpoint::Publish,
        Endpoint::RequestReply,
    ];

    /// Subject suffix below the basename
    pub fn suffix(&self) -> &'static str {
        match self {
            Endpoint::Register => "config.register",
            Endpoint::Unregister => "config.unregister",
            Endpoint::Publish => "publish",
            Endpoint::RequestReply => "request-response",
        }
    }

    /// Full subject for a bridge basename
    pub fn subject(&self, basename: &str) -> String {
        format!("{}.{}", basename, self.suffix())
    }

    /// Resolve the endpoint a request subject addresses
    pub fn from_subject(basename: &str, subject: &str) -> Option<Endpoint> {
        let suffix = subject.strip_prefix(basename)?.strip_prefix('.')?;
        Self::ALL.into_iter().find(|e| e.suffix() == suffix)
    }
}

/// Register request: subscribe to an MQTT topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub topic: String,
}

/// Register response carrying the allocated subject
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub subject: String,
    pub error: String,
}

/// Unregister request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub subject: String,
}

/// Unregister response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnregisterResponse {
    pub error: String,
}

/// Publish request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishResponse {
    pub error: String,
}

/// Request/reply request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReplyRequest {
    pub topic: String,
    pub payload: Bytes,
    /// Response window in milliseconds
    #[serde(rename = "timeout")]
    pub timeout_millis: i32,
}

/// Request/reply response
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestReplyResponse {
    pub payload: Bytes,
    pub error: String,
}

/// Envelope around every MQTT payload forwarded to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub payload: Bytes,
    /// Acquisition time, unix seconds
    #[serde(rename = "acqTime")]
    pub acq_time: i64,
    /// Device the gateway runs on
    pub device: String,
}

impl DataMessage {
    /// Wrap a payload stamped with the current time
    pub fn now(payload: Bytes, device: &str) -> Self {
        let acq_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self {
            payload,
            acq_time,
            device: device.to_string(),
        }
    }
}

/// Error text for a response field: empty on success
pub(crate) fn error_text<E: std::fmt::Display>(err: Option<E>) -> String {
    err.map(|e| e.to_string()).unwrap_or_default()
}
