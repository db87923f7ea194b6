//! Bus Request Service
//!
//! Serves the four bridge endpoints. Register, unregister and publish are
//! handled in arrival order on the calling task; every request/reply call
//! runs on its own task so a slow responder never blocks the others.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::protocol::{
    error_text, Endpoint, PublishRequest, PublishResponse, RegisterRequest, RegisterResponse,
    RequestReplyRequest, RequestReplyResponse, UnregisterRequest, UnregisterResponse, WireFormat,
};
use crate::remote::{BusRequest, MessageBus};

use super::BridgeCore;

/// Answers bus requests on behalf of a [`BridgeCore`]
#[derive(Clone)]
pub struct BridgeService {
    core: BridgeCore,
    bus: Arc<dyn MessageBus>,
    format: WireFormat,
}

impl BridgeService {
    pub fn new(core: BridgeCore) -> Self {
        let bus = core.bus();
        let format = core.config().wire_format;
        Self { core, bus, format }
    }

    pub fn core(&self) -> &BridgeCore {
        &self.core
    }

    /// Serve requests until the stream ends
    pub async fn run(self, mut requests: mpsc::Receiver<BusRequest>) {
        info!(
            "Serving bridge endpoints below '{}'",
            self.core.config().basename
        );
        while let Some(request) = requests.recv().await {
            self.handle(request).await;
        }
        info!("Request stream closed, bridge service stopping");
    }

    /// Handle one request and send its response
    pub async fn handle(&self, request: BusRequest) {
        let basename = &self.core.config().basename;
        let Some(endpoint) = Endpoint::from_subject(basename, &request.subject) else {
            warn!("Request on unknown subject '{}' ignored", request.subject);
            return;
        };

        match endpoint {
            Endpoint::Register => {
                let (response, topic) = self.register(&request.payload);
                self.reply(request.reply.as_deref(), &response).await;
                // Subscribe only once the caller knows its subject
                if let Some(topic) = topic {
                    self.core.announce(&topic);
                }
            }
            Endpoint::Unregister => {
                let response = self.unregister(&request.payload);
                self.reply(request.reply.as_deref(), &response).await;
            }
            Endpoint::Publish => {
                let response = self.publish(&request.payload);
                self.reply(request.reply.as_deref(), &response).await;
            }
            Endpoint::RequestReply => {
                let service = self.clone();
                tokio::spawn(async move {
                    let response = service.request_reply(request.payload).await;
                    service.reply(request.reply.as_deref(), &response).await;
                });
            }
        }
    }

    fn register(&self, payload: &[u8]) -> (RegisterResponse, Option<String>) {
        let result = self
            .decode::<RegisterRequest>(payload)
            .and_then(|req| self.core.register(&req.topic).map(|subject| (req.topic, subject)));

        match result {
            Ok((topic, subject)) => (
                RegisterResponse {
                    subject,
                    error: String::new(),
                },
                Some(topic),
            ),
            Err(e) => {
                warn!("Register failed: {}", e);
                (
                    RegisterResponse {
                        subject: String::new(),
                        error: e.to_string(),
                    },
                    None,
                )
            }
        }
    }

    fn unregister(&self, payload: &[u8]) -> UnregisterResponse {
        let result = self
            .decode::<UnregisterRequest>(payload)
            .and_then(|req| self.core.unregister(&req.subject));
        if let Err(ref e) = result {
            warn!("Unregister failed: {}", e);
        }
        UnregisterResponse {
            error: error_text(result.err()),
        }
    }

    fn publish(&self, payload: &[u8]) -> PublishResponse {
        let result = self
            .decode::<PublishRequest>(payload)
            .and_then(|req| self.core.publish(&req.topic, req.payload));
        if let Err(ref e) = result {
            warn!("Publish failed: {}", e);
        }
        PublishResponse {
            error: error_text(result.err()),
        }
    }

    async fn request_reply(&self, payload: Bytes) -> RequestReplyResponse {
        let req = match self.decode::<RequestReplyRequest>(&payload) {
            Ok(req) => req,
            Err(e) => {
                return RequestReplyResponse {
                    payload: Bytes::new(),
                    error: e.to_string(),
                }
            }
        };

        match self
            .core
            .request_reply(&req.topic, req.payload, req.timeout_millis)
            .await
        {
            Ok(payload) => RequestReplyResponse {
                payload,
                error: String::new(),
            },
            Err(e) => {
                debug!("Request/reply on '{}' failed: {}", req.topic, e);
                RequestReplyResponse {
                    payload: Bytes::new(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, BridgeError> {
        self.format.decode(payload).map_err(BridgeError::from)
    }

    async fn reply<T: Serialize>(&self, reply: Option<&str>, response: &T) {
        let Some(reply) = reply else {
            debug!("Request without reply subject, response dropped");
            return;
        };

        let encoded = match self.format.encode(response) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode response: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(reply, encoded).await {
            warn!("Failed to send response to '{}': {}", reply, e);
        }
    }
}
