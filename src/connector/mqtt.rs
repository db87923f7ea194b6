//! MQTT Connector
//!
//! Owns the rumqttc v5 client and event loop. Two tasks run per connector:
//! the event loop task polls the broker and delivers inbound publishes; the
//! command task applies connector events from the bridge core. Only the
//! event loop task drains the client's request channel.
//!
//! rumqttc reconnects on the next poll after an error. Subscriptions are
//! replayed after every CONNACK, together with the response wildcard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::metrics::Metrics;
use crate::remote::{ConnectorEvent, InboundMessage, InboundSink, OutboundPublish, RemoteStatus};

/// MQTT side of the bridge
pub struct MqttConnector {
    config: MqttConfig,
    /// Wildcard covering request/reply response topics
    response_filter: String,
    status: Arc<RwLock<RemoteStatus>>,
    metrics: Option<Arc<Metrics>>,
}

impl MqttConnector {
    pub fn new(config: MqttConfig, response_filter: impl Into<String>) -> Self {
        Self {
            config,
            response_filter: response_filter.into(),
            status: Arc::new(RwLock::new(RemoteStatus::Disconnected)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current connection state, kept up to date by the spawned tasks
    pub fn status(&self) -> RemoteStatus {
        *self.status.read()
    }

    /// Start the connection and command tasks.
    ///
    /// The connector runs until `events` closes; it then disconnects and the
    /// returned handle completes.
    pub fn spawn(
        &self,
        events: mpsc::UnboundedReceiver<ConnectorEvent>,
        sink: Arc<dyn InboundSink>,
    ) -> JoinHandle<()> {
        let (client, eventloop) = AsyncClient::new(options(&self.config), self.config.channel_capacity);
        let subscriptions = Arc::new(Mutex::new(SubscriptionSet::new(self.response_filter.clone())));

        *self.status.write() = RemoteStatus::Connecting;
        info!(
            "MQTT connector '{}' connecting to {}",
            self.config.client_id, self.config.address
        );

        let commands = tokio::spawn(command_loop(
            client.clone(),
            events,
            Arc::clone(&subscriptions),
            self.metrics.clone(),
        ));
        let connection = tokio::spawn(connection_loop(
            self.config.clone(),
            client,
            eventloop,
            subscriptions,
            Arc::clone(&self.status),
            self.metrics.clone(),
            sink,
        ));

        tokio::spawn(async move {
            if let Err(e) = commands.await {
                error!("MQTT command task failed: {}", e);
            }
            if let Err(e) = connection.await {
                error!("MQTT connection task failed: {}", e);
            }
        })
    }
}

/// Build rumqttc options from configuration
fn options(config: &MqttConfig) -> MqttOptions {
    let (host, port) = config.parse_address();
    let mut options = MqttOptions::new(config.client_id.clone(), host, port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keepalive.max(5))));
    options.set_clean_start(config.clean_start);
    if let Some(ref username) = config.username {
        options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

/// Topics the connector is subscribed to, plus the response wildcard
pub(crate) struct SubscriptionSet {
    response_filter: String,
    topics: HashSet<String>,
}

impl SubscriptionSet {
    pub(crate) fn new(response_filter: String) -> Self {
        Self {
            response_filter,
            topics: HashSet::new(),
        }
    }

    /// Returns false if already subscribed
    pub(crate) fn add(&mut self, topic: &str) -> bool {
        self.topics.insert(topic.to_string())
    }

    /// Returns false if not subscribed
    pub(crate) fn remove(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    /// Every filter to subscribe after a (re)connect, response wildcard first
    pub(crate) fn filters(&self) -> Vec<String> {
        let mut filters = Vec::with_capacity(self.topics.len() + 1);
        filters.push(self.response_filter.clone());
        filters.extend(self.topics.iter().cloned());
        filters
    }
}

/// Reconnect delay doubling from `initial` up to `max`
pub(crate) struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Delay to wait now; doubles the next one
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// MQTT v5 properties carrying request/reply metadata
pub(crate) fn publish_properties(publish: &OutboundPublish) -> Option<PublishProperties> {
    if publish.correlation_data.is_none() && publish.response_topic.is_none() {
        return None;
    }
    Some(PublishProperties {
        correlation_data: publish.correlation_data.clone(),
        response_topic: publish.response_topic.clone(),
        ..Default::default()
    })
}

/// Convert a received publish into the core's message type
pub(crate) fn inbound_message(
    topic: &[u8],
    payload: Bytes,
    properties: Option<PublishProperties>,
) -> InboundMessage {
    InboundMessage {
        topic: String::from_utf8_lossy(topic).into_owned(),
        payload,
        correlation_data: properties.and_then(|p| p.correlation_data),
    }
}

async fn command_loop(
    client: AsyncClient,
    mut events: mpsc::UnboundedReceiver<ConnectorEvent>,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    metrics: Option<Arc<Metrics>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectorEvent::Subscribe(topic) => {
                let fresh = subscriptions.lock().add(&topic);
                if !fresh {
                    debug!("Already subscribed to '{}'", topic);
                    continue;
                }
                info!("Subscribing to '{}'", topic);
                if let Err(e) = client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                    error!("Failed to subscribe to '{}': {}", topic, e);
                }
            }
            ConnectorEvent::Unsubscribe(topic) => {
                let known = subscriptions.lock().remove(&topic);
                if !known {
                    debug!("Not subscribed to '{}'", topic);
                    continue;
                }
                info!("Unsubscribing from '{}'", topic);
                if let Err(e) = client.unsubscribe(topic.clone()).await {
                    error!("Failed to unsubscribe from '{}': {}", topic, e);
                }
            }
            ConnectorEvent::Publish(publish) => {
                let properties = publish_properties(&publish);
                let result = match properties {
                    Some(properties) => {
                        client
                            .publish_with_properties(
                                publish.topic.clone(),
                                QoS::AtLeastOnce,
                                false,
                                publish.payload,
                                properties,
                            )
                            .await
                    }
                    None => {
                        client
                            .publish(publish.topic.clone(), QoS::AtLeastOnce, false, publish.payload)
                            .await
                    }
                };
                match result {
                    Ok(()) => {
                        debug!("Published on '{}'", publish.topic);
                        if let Some(ref metrics) = metrics {
                            metrics.mqtt_published();
                        }
                    }
                    Err(e) => error!("Failed to publish on '{}': {}", publish.topic, e),
                }
            }
        }
    }

    info!("Connector event stream closed, disconnecting");
    if let Err(e) = client.disconnect().await {
        debug!("Disconnect request failed: {}", e);
    }
}

async fn connection_loop(
    config: MqttConfig,
    client: AsyncClient,
    mut eventloop: EventLoop,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    status: Arc<RwLock<RemoteStatus>>,
    metrics: Option<Arc<Metrics>>,
    sink: Arc<dyn InboundSink>,
) {
    let mut backoff = Backoff::new(
        config.reconnect_interval_duration(),
        config.max_reconnect_interval_duration(),
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                info!(
                    "MQTT connector '{}': Connected (session_present={})",
                    config.client_id, connack.session_present
                );
                *status.write() = RemoteStatus::Connected;
                if let Some(ref metrics) = metrics {
                    metrics.set_mqtt_connected(true);
                }
                backoff.reset();

                // Replayed from a separate task: subscribe() waits on the
                // request channel that only this loop drains.
                let filters = subscriptions.lock().filters();
                let client = client.clone();
                tokio::spawn(async move {
                    for filter in filters {
                        if let Err(e) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to '{}': {}", filter, e);
                        }
                    }
                });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = inbound_message(&publish.topic, publish.payload, publish.properties);
                debug!("MQTT message on '{}'", message.topic);
                sink.deliver(message).await;
            }
            Ok(Event::Incoming(Packet::Disconnect(disconnect))) => {
                warn!(
                    "MQTT connector '{}': Received DISCONNECT: {:?}",
                    config.client_id, disconnect.reason_code
                );
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT connector '{}': Disconnected gracefully", config.client_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connector '{}': Connection failed: {}", config.client_id, e);
                *status.write() = RemoteStatus::Backoff;
                if let Some(ref metrics) = metrics {
                    metrics.set_mqtt_connected(false);
                }

                let delay = backoff.next_delay();
                debug!(
                    "MQTT connector '{}': Reconnecting in {:?}",
                    config.client_id, delay
                );
                tokio::time::sleep(delay).await;
                *status.write() = RemoteStatus::Connecting;
            }
        }
    }

    *status.write() = RemoteStatus::Disconnected;
    if let Some(ref metrics) = metrics {
        metrics.set_mqtt_connected(false);
    }
}
