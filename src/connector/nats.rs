//! NATS Bus
//!
//! [`MessageBus`] over an async-nats client, plus the subscription side of
//! the bridge endpoints.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use async_nats::{Client, ConnectOptions, RequestErrorKind};

use crate::config::NatsConfig;
use crate::protocol::Endpoint;
use crate::remote::{BusRequest, MessageBus, RemoteError};

/// Requests buffered between the subscriptions and the bridge service
const REQUEST_BUFFER: usize = 256;

/// Connected NATS client
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Connect, retrying `connect_attempts` times with `retry_delay` between
    /// attempts. Once connected, async-nats reconnects on its own.
    pub async fn connect(config: &NatsConfig) -> Result<Self, RemoteError> {
        let mut last_error = String::new();

        for attempt in 1..=config.connect_attempts {
            let options = ConnectOptions::new()
                .name(config.name.clone())
                .request_timeout(Some(config.request_timeout));

            match options.connect(config.url.as_str()).await {
                Ok(client) => {
                    info!("Connected to NATS at {}", config.url);
                    return Ok(Self { client });
                }
                Err(e) => {
                    warn!(
                        "NATS connection attempt {}/{} to {} failed: {}",
                        attempt, config.connect_attempts, config.url, e
                    );
                    last_error = e.to_string();
                }
            }
            if attempt < config.connect_attempts {
                tokio::time::sleep(config.retry_delay).await;
            }
        }

        Err(RemoteError::ConnectionLost(format!(
            "could not connect to {} after {} attempts: {}",
            config.url, config.connect_attempts, last_error
        )))
    }

    /// Subscribe to the four bridge endpoints below `basename`.
    ///
    /// The returned stream ends when every subscription has closed.
    pub async fn serve(&self, basename: &str) -> Result<mpsc::Receiver<BusRequest>, RemoteError> {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);

        for endpoint in Endpoint::ALL {
            let subject = endpoint.subject(basename);
            let mut subscriber = self
                .client
                .subscribe(subject.clone())
                .await
                .map_err(|e| RemoteError::Rejected(format!("subscribe '{}': {}", subject, e)))?;
            debug!("Listening on '{}'", subject);

            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(message) = subscriber.next().await {
                    let request = BusRequest {
                        subject: message.subject.to_string(),
                        reply: message.reply.map(|r| r.to_string()),
                        payload: message.payload,
                    };
                    if tx.send(request).await.is_err() {
                        break;
                    }
                }
                debug!("Subscription '{}' closed", subject);
            });
        }

        Ok(rx)
    }

    /// Flush pending publishes
    pub async fn flush(&self) -> Result<(), RemoteError> {
        self.client
            .flush()
            .await
            .map_err(|e| RemoteError::ConnectionLost(e.to_string()))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, RemoteError> {
        match self.client.request(subject.to_string(), payload).await {
            Ok(message) => Ok(message.payload),
            Err(e) => Err(match e.kind() {
                RequestErrorKind::NoResponders => RemoteError::NoResponders,
                RequestErrorKind::TimedOut => RemoteError::Timeout,
                _ => RemoteError::Other(e.to_string()),
            }),
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RemoteError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| RemoteError::ConnectionLost(e.to_string()))
    }
}
