//! Bridge Client
//!
//! Caller-side API for services that use the bridge over the bus: register
//! a topic, read the forwarded [`DataMessage`]s from the returned subject,
//! publish, and issue request/reply calls.


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::protocol::{
    CodecError, DataMessage, Endpoint, PublishRequest, PublishResponse, RegisterRequest,
    RegisterResponse, RequestReplyRequest, RequestReplyResponse, UnregisterRequest,
    UnregisterResponse, WireFormat,
};
use crate::remote::{MessageBus, RemoteError};

/// Bus timeout for register, unregister and publish
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

/// Slack added to a request/reply call's own timeout
pub const REQUEST_REPLY_SLACK: Duration = Duration::from_secs(5);

/// Client error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The bridge answered with an error
    Remote(String),
    /// The request did not reach the bridge, or no answer came back
    Transport(RemoteError),
    /// A request or response could not be (de)serialized
    Codec(CodecError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Remote(msg) => write!(f, "{}", msg),
            ClientError::Transport(e) => write!(f, "{} for request", e),
            ClientError::Codec(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<RemoteError> for ClientError {
    fn from(e: RemoteError) -> Self {
        ClientError::Transport(e)
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        ClientError::Codec(e)
    }
}

fn check(error: String) -> Result<(), ClientError> {
    if error.is_empty() {
        Ok(())
    } else {
        Err(ClientError::Remote(error))
    }
}

/// Talks to the bridge serving `target`
#[derive(Clone)]
pub struct BridgeClient {
    bus: Arc<dyn MessageBus>,
    target: String,
    format: WireFormat,
}

impl BridgeClient {
    pub fn new(target: impl Into<String>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            target: target.into(),
            format: WireFormat::default(),
        }
    }

    /// Use a non-default record format; must match the bridge's
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Register an MQTT topic. Forwarded messages arrive on the returned
    /// subject and must be acknowledged with a reply.
    pub async fn register_topic(&self, topic: &str) -> Result<String, ClientError> {
        let response: RegisterResponse = self
            .call(
                Endpoint::Register,
                &RegisterRequest {
                    topic: topic.to_string(),
                },
                CONTROL_TIMEOUT,
            )
            .await?;
        check(response.error)?;
        Ok(response.subject)
    }

    /// Drop a subject obtained from [`register_topic`](Self::register_topic)
    pub async fn unregister_subject(&self, subject: &str) -> Result<(), ClientError> {
        let response: UnregisterResponse = self
            .call(
                Endpoint::Unregister,
                &UnregisterRequest {
                    subject: subject.to_string(),
                },
                CONTROL_TIMEOUT,
            )
            .await?;
        check(response.error)
    }

    /// Publish on an MQTT topic
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ClientError> {
        let response: PublishResponse = self
            .call(
                Endpoint::Publish,
                &PublishRequest {
                    topic: topic.to_string(),
                    payload,
                },
                CONTROL_TIMEOUT,
            )
            .await?;
        check(response.error)
    }

    /// Publish on an MQTT topic and wait up to `timeout_millis` for the
    /// correlated response
    pub async fn request_reply(
        &self,
        topic: &str,
        payload: Bytes,
        timeout_millis: i32,
    ) -> Result<Bytes, ClientError> {
        let window = Duration::from_millis(u64::try_from(timeout_millis).unwrap_or(0))
            + REQUEST_REPLY_SLACK;
        let response: RequestReplyResponse = self
            .call(
                Endpoint::RequestReply,
                &RequestReplyRequest {
                    topic: topic.to_string(),
                    payload,
                    timeout_millis,
                },
                window,
            )
            .await?;
        check(response.error)?;
        Ok(response.payload)
    }

    /// Decode a message forwarded to a registered subject
    pub fn decode_data(&self, payload: &[u8]) -> Result<DataMessage, ClientError> {
        Ok(self.format.decode(payload)?)
    }

    async fn call<Req, Resp>(
        &self,
        endpoint: Endpoint,
        request: &Req,
        window: Duration,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = self.format.encode(request)?;
        let subject = endpoint.subject(&self.target);
        let response = timeout(window, self.bus.request(&subject, payload))
            .await
            .map_err(|_| RemoteError::Timeout)??;
        Ok(self.format.decode(&response)?)
    }
}
