//! Bridge Core
//!
//! Orchestrates registrations, inbound fan-out and request/reply.
//!
//! A registration ties an MQTT topic to a freshly allocated bus subject. The
//! core keeps the [`SubjectRegistry`] and the [`ForwardingTable`] in step
//! under one lock, spawns a forwarding worker per subject, and tells the
//! MQTT connector which topics to (un)subscribe through a queue of
//! [`ConnectorEvent`]s.
//!
//! # Lock order
//!
//! The forwarding table lock is taken first, the registry lock second. No
//! lock is held across an await.
//!
//! # Subscription events
//!
//! `Subscribe` and `Unsubscribe` are queued while the forwarding table lock
//! is held, so their order matches the registration count transitions. An
//! `Unsubscribe` is queued exactly once when a topic's last registration
//! goes away.

mod service;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::correlation::CorrelationStore;
use crate::error::{BridgeError, Result};
use crate::forwarding::{ForwardWorker, ForwardingTable, WorkerExit};
use crate::metrics::Metrics;
use crate::protocol::DataMessage;
use crate::registry::SubjectRegistry;
use crate::remote::{ConnectorEvent, InboundMessage, InboundSink, MessageBus, OutboundPublish};

pub use service::BridgeService;

/// Handle to the bridge engine. Cheap to clone.
#[derive(Clone)]
pub struct BridgeCore {
    shared: Arc<Shared>,
}

struct Shared {
    config: BridgeConfig,
    registry: SubjectRegistry,
    routes: Mutex<ForwardingTable>,
    correlation: Arc<CorrelationStore>,
    bus: Arc<dyn MessageBus>,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    metrics: Option<Arc<Metrics>>,
}

impl BridgeCore {
    /// Create the core. The returned receiver carries the commands for the
    /// MQTT connector.
    pub fn new(
        config: BridgeConfig,
        bus: Arc<dyn MessageBus>,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            registry: SubjectRegistry::new(config.basename.clone()),
            routes: Mutex::new(ForwardingTable::new()),
            correlation: CorrelationStore::new(),
            config,
            bus,
            events,
            metrics,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub(crate) fn bus(&self) -> Arc<dyn MessageBus> {
        Arc::clone(&self.shared.bus)
    }

    /// Register `topic` and start forwarding to a new subject.
    ///
    /// The delivery queue exists before this returns, so nothing published
    /// after the MQTT subscription is lost. Call [`announce`](Self::announce)
    /// once the subject has been handed to the caller. Topics under the
    /// response prefix never reach subjects and are refused.
    pub fn register(&self, topic: &str) -> Result<String> {
        if topic.is_empty() {
            return Err(BridgeError::EmptyTopic);
        }
        if self.shared.config.is_response_topic(topic) {
            return Err(BridgeError::ReservedTopic(topic.to_string()));
        }

        let shared = &self.shared;
        let (subject, queue) = {
            let mut routes = shared.routes.lock();
            let subject = shared.registry.register_sub(topic);
            let queue = routes.open(topic, &subject, shared.config.queue_capacity);
            (subject, queue)
        };

        if let Some(ref metrics) = shared.metrics {
            metrics.registration_added();
        }
        info!("Registered '{}' -> '{}'", topic, subject);

        let worker = ForwardWorker::new(queue, Arc::clone(&shared.bus), shared.config.forward_timeout)
            .with_metrics(shared.metrics.clone());
        let weak: Weak<Shared> = Arc::downgrade(shared);
        let worker_subject = subject.clone();
        tokio::spawn(async move {
            if worker.run().await != WorkerExit::ForwardTimeout {
                return;
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Err(e) = shared.cleanup(&worker_subject, "timeout") {
                debug!("Cleanup after timeout of '{}' skipped: {}", worker_subject, e);
            }
        });

        Ok(subject)
    }

    /// Ask the connector to subscribe `topic`, if it still has registrations
    pub fn announce(&self, topic: &str) {
        let routes = self.shared.routes.lock();
        if routes.route_count(topic) > 0 {
            self.shared.notify(ConnectorEvent::Subscribe(topic.to_string()));
        }
    }

    /// Drop a registration. Returns the topic it belonged to.
    pub fn unregister(&self, subject: &str) -> Result<String> {
        self.shared.cleanup(subject, "explicit")
    }

    /// Publish a message on an MQTT topic
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if topic.is_empty() {
            return Err(BridgeError::EmptyTopic);
        }
        if !self.shared.notify(ConnectorEvent::Publish(OutboundPublish::new(
            topic.to_string(),
            payload,
        ))) {
            return Err(BridgeError::Closed);
        }
        debug!("Publish queued for '{}'", topic);
        Ok(())
    }

    /// Publish on `topic` and wait up to `timeout_millis` for the
    /// correlated response.
    pub async fn request_reply(
        &self,
        topic: &str,
        payload: Bytes,
        timeout_millis: i32,
    ) -> Result<Bytes> {
        if topic.is_empty() {
            return Err(BridgeError::EmptyTopic);
        }
        if timeout_millis <= 0 {
            return Err(BridgeError::ZeroTimeout);
        }

        let shared = &self.shared;
        let pending = shared.correlation.register();
        let publish = OutboundPublish {
            topic: topic.to_string(),
            payload,
            correlation_data: Some(Bytes::copy_from_slice(pending.id().as_bytes())),
            response_topic: Some(shared.config.response_topic(topic)),
        };
        if !shared.notify(ConnectorEvent::Publish(publish)) {
            return Err(BridgeError::Closed);
        }
        debug!("Request '{}' published on '{}'", pending.id(), topic);

        if let Some(ref metrics) = shared.metrics {
            metrics.request_started();
        }
        let started = Instant::now();
        let result = pending
            .wait(Duration::from_millis(timeout_millis as u64))
            .await;

        if let Some(ref metrics) = shared.metrics {
            metrics.request_finished(request_outcome(&result), started.elapsed().as_secs_f64());
        }
        result
    }

    /// Route one message from the MQTT broker.
    ///
    /// Messages on the response prefix complete a pending request/reply
    /// call; everything else is fanned out to the topic's subjects. The
    /// fan-out waits while a subject's queue is full.
    pub async fn dispatch(&self, message: InboundMessage) {
        let shared = &self.shared;
        if let Some(ref metrics) = shared.metrics {
            metrics.mqtt_message_received(message.payload.len());
        }

        if shared.config.is_response_topic(&message.topic) {
            shared.complete_request(message);
            return;
        }

        let senders = shared.routes.lock().senders(&message.topic);
        if senders.is_empty() {
            debug!("No registrations for '{}', dropping message", message.topic);
            return;
        }

        let data = DataMessage::now(message.payload, &shared.config.device_id);
        let encoded = match shared.config.wire_format.encode(&data) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode message from '{}': {}", message.topic, e);
                return;
            }
        };

        // A closed queue belongs to a registration that just went away
        join_all(senders.iter().map(|queue| queue.send(encoded.clone()))).await;
    }

    /// Subjects currently registered for `topic`
    pub fn subjects(&self, topic: &str) -> Vec<String> {
        self.shared.registry.get(topic)
    }

    /// Topic a subject is registered for
    pub fn topic_of(&self, subject: &str) -> Result<String> {
        self.shared.registry.get_topic(subject)
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.shared.registry.subject_count()
    }

    /// Number of request/reply calls waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.correlation.len()
    }
}

/// Metrics label for a finished request/reply call
fn request_outcome(result: &Result<Bytes>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(BridgeError::ResponseTimeout) => "timeout",
        Err(BridgeError::Closed) => "closed",
        Err(_) => "error",
    }
}

impl Shared {
    /// Queue a connector event. False once the connector side is gone.
    fn notify(&self, event: ConnectorEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Remove a registration from both maps and close its queue
    fn cleanup(&self, subject: &str, reason: &str) -> Result<String> {
        let mut routes = self.routes.lock();
        let topic = self.registry.unregister_sub(subject)?;
        routes.close(&topic, subject);

        if let Some(ref metrics) = self.metrics {
            metrics.registration_removed(reason);
        }
        info!("Unregistered '{}' from '{}' ({})", subject, topic, reason);

        if routes.route_count(&topic) == 0 {
            info!("Last registration for '{}' gone, unsubscribing", topic);
            if !self.notify(ConnectorEvent::Unsubscribe(topic.clone())) {
                debug!("Connector gone, unsubscribe for '{}' not sent", topic);
            }
        }
        Ok(topic)
    }

    fn complete_request(&self, message: InboundMessage) {
        let Some(correlation) = message.correlation_data else {
            debug!("Response on '{}' without correlation data dropped", message.topic);
            self.response_dropped();
            return;
        };

        let id = String::from_utf8_lossy(&correlation);
        if !self.correlation.complete(&id, message.payload) {
            debug!("Response for unknown request '{}' dropped", id);
            self.response_dropped();
        }
    }

    fn response_dropped(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.response_dropped();
        }
    }
}

#[async_trait]
impl InboundSink for BridgeCore {
    async fn deliver(&self, message: InboundMessage) {
        self.dispatch(message).await;
    }
}
