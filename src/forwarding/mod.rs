//! Forwarding Table
//!
//! Every registration owns a bounded delivery queue and one worker task that
//! drains it. The inbound MQTT path pushes encoded payloads into the queues
//! of all subjects registered for a topic; each worker relays them to its
//! subject with a send-with-acknowledgement bounded by the forward timeout.
//!
//! Queues are independent, so a stalled consumer only backs up its own
//! queue. Messages for one subject are relayed in enqueue order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::remote::MessageBus;


/// Delivery queue capacity per subject
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Time a consumer has to acknowledge a forwarded message
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Producer side of one registration's delivery queue
struct Route {
    subject: String,
    queue: mpsc::Sender<Bytes>,
    active: Arc<AtomicBool>,
}

/// Topic → delivery queues.
///
/// Not synchronized on its own: the bridge core keeps it behind the same
/// lock it holds while mutating the subject registry.
#[derive(Default)]
pub struct ForwardingTable {
    routes: HashMap<String, Vec<Route>>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the delivery queue for a new registration.
    ///
    /// The returned [`DeliveryQueue`] is the consuming half, to be handed to
    /// a [`ForwardWorker`].
    pub fn open(&mut self, topic: &str, subject: &str, capacity: usize) -> DeliveryQueue {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let active = Arc::new(AtomicBool::new(true));

        self.routes.entry(topic.to_string()).or_default().push(Route {
            subject: subject.to_string(),
            queue: tx,
            active: active.clone(),
        });

        DeliveryQueue {
            topic: topic.to_string(),
            subject: subject.to_string(),
            queue: rx,
            active,
        }
    }

    /// Close and drop a subject's queue. Returns false if it had none.
    pub fn close(&mut self, topic: &str, subject: &str) -> bool {
        let Some(routes) = self.routes.get_mut(topic) else {
            return false;
        };
        let Some(index) = routes.iter().position(|r| r.subject == subject) else {
            return false;
        };

        let route = routes.swap_remove(index);
        route.active.store(false, Ordering::Release);
        if routes.is_empty() {
            self.routes.remove(topic);
        }
        true
    }

    /// Producer handles for every queue of a topic
    pub fn senders(&self, topic: &str) -> Vec<mpsc::Sender<Bytes>> {
        self.routes
            .get(topic)
            .map(|routes| routes.iter().map(|r| r.queue.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of open queues for a topic
    pub fn route_count(&self, topic: &str) -> usize {
        self.routes.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Total number of open queues
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Consumer side of one registration's delivery queue
pub struct DeliveryQueue {
    topic: String,
    subject: String,
    queue: mpsc::Receiver<Bytes>,
    active: Arc<AtomicBool>,
}

impl DeliveryQueue {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Why a forwarding worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was closed by an explicit unregister
    Unregistered,
    /// The consumer failed to acknowledge; the registration must be torn down
    ForwardTimeout,
}

/// Drains one delivery queue into its subject
pub struct ForwardWorker {
    queue: DeliveryQueue,
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl ForwardWorker {
    pub fn new(queue: DeliveryQueue, bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self {
            queue,
            bus,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Relay messages until the queue closes or the consumer stops answering.
    ///
    /// On [`WorkerExit::ForwardTimeout`] anything still queued is dropped
    /// along with the worker; the caller performs the cleanup.
    pub async fn run(mut self) -> WorkerExit {
        let subject = self.queue.subject.clone();

        while let Some(payload) = self.queue.queue.recv().await {
            if !self.queue.active.load(Ordering::Acquire) {
                break;
            }

            debug!("Forwarding '{}' -> '{}'", self.queue.topic, subject);
            match timeout(self.timeout, self.bus.request(&subject, payload)).await {
                Ok(Ok(_)) => {
                    if let Some(ref metrics) = self.metrics {
                        metrics.message_forwarded();
                    }
                }
                Ok(Err(e)) => {
                    warn!("Subject '{}' failed to acknowledge ({}). Unregistering.", subject, e);
                    return WorkerExit::ForwardTimeout;
                }
                Err(_) => {
                    warn!("Subject '{}' timed out. Unregistering.", subject);
                    return WorkerExit::ForwardTimeout;
                }
            }
        }

        debug!("Forward worker for '{}' stopped", subject);
        WorkerExit::Unregistered
    }
}
