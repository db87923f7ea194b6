//! Bridge core and service tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use pretty_assertions::assert_eq;
use test_case::test_case;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use super::*;
use crate::protocol::{
    PublishRequest, PublishResponse, RegisterRequest, RegisterResponse, RequestReplyRequest,
    RequestReplyResponse, UnregisterRequest, UnregisterResponse, WireFormat,
};
use crate::remote::{BusRequest, RemoteError};
use crate::test_support::{eventually, RecordingBus};

fn config(basename: &str) -> BridgeConfig {
    BridgeConfig {
        basename: basename.to_string(),
        device_id: "edge-1".to_string(),
        forward_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

fn core_with(
    config: BridgeConfig,
) -> (BridgeCore, Arc<RecordingBus>, UnboundedReceiver<ConnectorEvent>) {
    let bus = RecordingBus::new();
    let (core, events) = BridgeCore::new(config, bus.clone(), None);
    (core, bus, events)
}

fn drain(events: &mut UnboundedReceiver<ConnectorEvent>) -> Vec<ConnectorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn unsubscribes(events: &[ConnectorEvent], topic: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectorEvent::Unsubscribe(t) if t == topic))
        .count()
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_allocates_subject_below_basename() {
    let (core, _bus, mut events) = core_with(config("gw"));

    let subject = core.register("sensors/temp").unwrap();
    assert!(subject.starts_with("gw."));
    assert_eq!(core.subjects("sensors/temp"), vec![subject.clone()]);
    assert_eq!(core.topic_of(&subject).unwrap(), "sensors/temp");
    assert_eq!(core.registration_count(), 1);

    // Nothing is subscribed until the registration is announced
    assert!(drain(&mut events).is_empty());
    core.announce("sensors/temp");
    assert_eq!(
        drain(&mut events),
        vec![ConnectorEvent::Subscribe("sensors/temp".to_string())]
    );
}

#[tokio::test]
async fn test_register_empty_topic() {
    let (core, _bus, mut events) = core_with(config("gw"));
    assert_eq!(core.register(""), Err(BridgeError::EmptyTopic));
    assert_eq!(core.registration_count(), 0);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_register_response_topic_is_refused() {
    let (core, _bus, mut events) = core_with(config("gw"));
    assert_eq!(
        core.register("edgebridge-response/cmd"),
        Err(BridgeError::ReservedTopic("edgebridge-response/cmd".to_string()))
    );
    assert_eq!(core.registration_count(), 0);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_two_registrations_one_unsubscribe() {
    let (core, _bus, mut events) = core_with(config("gw"));

    let first = core.register("a/b").unwrap();
    let second = core.register("a/b").unwrap();
    assert_ne!(first, second);

    assert_eq!(core.unregister(&first).unwrap(), "a/b");
    assert_eq!(core.subjects("a/b"), vec![second.clone()]);
    assert_eq!(unsubscribes(&drain(&mut events), "a/b"), 0);

    core.unregister(&second).unwrap();
    assert!(core.subjects("a/b").is_empty());
    assert_eq!(unsubscribes(&drain(&mut events), "a/b"), 1);
}

#[tokio::test]
async fn test_unregister_unknown_subject() {
    let (core, _bus, mut events) = core_with(config("gw"));
    let subject = core.register("a/b").unwrap();

    assert_eq!(
        core.unregister("gw.missing"),
        Err(BridgeError::NotFound("gw.missing".to_string()))
    );
    assert_eq!(core.subjects("a/b"), vec![subject]);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_announce_after_unregister_is_silent() {
    let (core, _bus, mut events) = core_with(config("gw"));
    let subject = core.register("a/b").unwrap();
    core.unregister(&subject).unwrap();
    drain(&mut events);

    core.announce("a/b");
    assert!(drain(&mut events).is_empty());
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn test_sensor_scenario() {
    let (core, bus, mut events) = core_with(config("gw"));

    let subject = core.register("sensors/temp").unwrap();
    core.announce("sensors/temp");

    core.dispatch(InboundMessage::new("sensors/temp", r#"{"v":42}"#))
        .await;
    eventually(|| bus.delivered_count() == 1).await;

    let delivered = bus.delivered(&subject);
    assert_eq!(delivered.len(), 1);
    let data: DataMessage = WireFormat::Bincode.decode(&delivered[0]).unwrap();
    assert_eq!(data.payload, Bytes::from_static(br#"{"v":42}"#));
    assert_eq!(data.device, "edge-1");
    assert!(data.acq_time > 0);

    core.unregister(&subject).unwrap();
    core.dispatch(InboundMessage::new("sensors/temp", r#"{"v":43}"#))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.delivered_count(), 1);

    let events = drain(&mut events);
    assert_eq!(unsubscribes(&events, "sensors/temp"), 1);
}

#[tokio::test]
async fn test_fan_out_encodes_once_for_all_subjects() {
    let (core, bus, _events) = core_with(config("gw"));
    let first = core.register("a/b").unwrap();
    let second = core.register("a/b").unwrap();

    core.dispatch(InboundMessage::new("a/b", "x")).await;
    eventually(|| bus.delivered_count() == 2).await;

    assert_eq!(bus.delivered(&first), bus.delivered(&second));
}

#[tokio::test]
async fn test_messages_for_unknown_topic_are_dropped() {
    let (core, bus, _events) = core_with(config("gw"));
    core.register("a/b").unwrap();

    core.dispatch(InboundMessage::new("c/d", "x")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.delivered_count(), 0);
}

#[tokio::test]
async fn test_forward_timeout_unregisters_subject() {
    let (core, bus, mut events) = core_with(config("gw"));
    let subject = core.register("a/b").unwrap();
    bus.kill(&subject);

    core.dispatch(InboundMessage::new("a/b", "x")).await;
    eventually(|| core.registration_count() == 0).await;

    assert!(core.subjects("a/b").is_empty());
    assert_eq!(
        core.unregister(&subject),
        Err(BridgeError::NotFound(subject.clone()))
    );
    assert_eq!(unsubscribes(&drain(&mut events), "a/b"), 1);
}

/// Bus that holds every acknowledgement until released
struct GatedBus {
    open: watch::Sender<bool>,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<Bytes>>,
}

impl GatedBus {
    fn new() -> Arc<Self> {
        let (open, _) = watch::channel(false);
        Arc::new(Self {
            open,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn release(&self) {
        self.open.send_replace(true);
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn payloads(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|p| {
                let data: DataMessage = WireFormat::Bincode.decode(p).unwrap();
                String::from_utf8(data.payload.to_vec()).unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl MessageBus for GatedBus {
    async fn request(&self, _subject: &str, payload: Bytes) -> std::result::Result<Bytes, RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(RemoteError::Timeout);
        }
        self.delivered.lock().push(payload);
        Ok(Bytes::new())
    }

    async fn publish(&self, _subject: &str, _payload: Bytes) -> std::result::Result<(), RemoteError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_full_queue_blocks_dispatch_and_keeps_order() {
    let bus = GatedBus::new();
    let bridge_config = BridgeConfig {
        forward_timeout: Duration::from_secs(10),
        ..config("gw")
    };
    let (core, _events) = BridgeCore::new(bridge_config, bus.clone(), None);
    let subject = core.register("a/b").unwrap();
    let capacity = core.config().queue_capacity;

    // The worker holds the first message while waiting for its ack
    core.dispatch(InboundMessage::new("a/b", "0")).await;
    eventually(|| bus.attempts() == 1).await;

    for i in 1..=capacity {
        core.dispatch(InboundMessage::new("a/b", i.to_string())).await;
    }

    let mut blocked = tokio_test::task::spawn(
        core.dispatch(InboundMessage::new("a/b", (capacity + 1).to_string())),
    );
    tokio_test::assert_pending!(blocked.poll());
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio_test::assert_pending!(blocked.poll());

    bus.release();
    tokio::time::timeout(Duration::from_secs(2), async {
        while blocked.poll().is_pending() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    for i in capacity + 2..30 {
        core.dispatch(InboundMessage::new("a/b", i.to_string())).await;
    }
    eventually(|| bus.payloads().len() == 30).await;

    let expected: Vec<String> = (0..30).map(|i| i.to_string()).collect();
    assert_eq!(bus.payloads(), expected);
    assert_eq!(core.subjects("a/b"), vec![subject]);
}

#[tokio::test]
async fn test_dead_subject_does_not_stall_sibling() {
    let (core, bus, mut events) = core_with(config("gw"));
    let dead = core.register("a/b").unwrap();
    let alive = core.register("a/b").unwrap();
    bus.kill(&dead);

    core.dispatch(InboundMessage::new("a/b", "x")).await;
    eventually(|| bus.delivered(&alive).len() == 1).await;
    eventually(|| core.registration_count() == 1).await;

    assert_eq!(core.subjects("a/b"), vec![alive]);
    assert_eq!(unsubscribes(&drain(&mut events), "a/b"), 0);
}

// =============================================================================
// Publish and request/reply
// =============================================================================

#[tokio::test]
async fn test_publish_queues_connector_event() {
    let (core, _bus, mut events) = core_with(config("gw"));
    core.publish("cmd/led", Bytes::from_static(b"on")).unwrap();

    assert_eq!(
        drain(&mut events),
        vec![ConnectorEvent::Publish(OutboundPublish::new(
            "cmd/led".to_string(),
            Bytes::from_static(b"on")
        ))]
    );
    assert_eq!(core.publish("", Bytes::new()), Err(BridgeError::EmptyTopic));
}

#[tokio::test]
async fn test_publish_after_connector_gone() {
    let (core, _bus, events) = core_with(config("gw"));
    drop(events);
    assert_eq!(
        core.publish("cmd/led", Bytes::new()),
        Err(BridgeError::Closed)
    );
}

#[tokio::test]
async fn test_request_reply_invalid_arguments() {
    let (core, _bus, mut events) = core_with(config("gw"));

    assert_eq!(
        core.request_reply("", Bytes::new(), 100).await,
        Err(BridgeError::EmptyTopic)
    );
    assert_eq!(
        core.request_reply("cmd", Bytes::new(), 0).await,
        Err(BridgeError::ZeroTimeout)
    );
    assert_eq!(
        core.request_reply("cmd", Bytes::new(), -5).await,
        Err(BridgeError::ZeroTimeout)
    );
    assert!(drain(&mut events).is_empty());
    assert_eq!(core.pending_requests(), 0);
}

#[tokio::test]
async fn test_request_reply_receives_correlated_response() {
    let (core, _bus, mut events) = core_with(config("gw"));

    let caller = core.clone();
    let call = tokio::spawn(async move {
        caller
            .request_reply("cmd/reboot", Bytes::from_static(b"now"), 1000)
            .await
    });

    let Some(ConnectorEvent::Publish(publish)) = events.recv().await else {
        panic!("expected a publish event");
    };
    assert_eq!(publish.topic, "cmd/reboot");
    assert_eq!(publish.payload, Bytes::from_static(b"now"));
    assert_eq!(
        publish.response_topic.as_deref(),
        Some("edgebridge-response/cmd/reboot")
    );
    let correlation = publish.correlation_data.unwrap();
    assert_eq!(core.pending_requests(), 1);

    core.dispatch(
        InboundMessage::new("edgebridge-response/cmd/reboot", "done")
            .with_correlation(correlation),
    )
    .await;

    assert_eq!(call.await.unwrap(), Ok(Bytes::from_static(b"done")));
    assert_eq!(core.pending_requests(), 0);
}

#[tokio::test]
async fn test_request_reply_timeout_removes_entry() {
    let (core, bus, mut events) = core_with(config("gw"));

    let started = Instant::now();
    let result = core.request_reply("cmd", Bytes::new(), 100).await;
    let elapsed = started.elapsed();

    assert_eq!(result, Err(BridgeError::ResponseTimeout));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1000));
    assert_eq!(core.pending_requests(), 0);

    // A late response for the same id is dropped silently
    let Some(ConnectorEvent::Publish(publish)) = drain(&mut events).pop() else {
        panic!("expected a publish event");
    };
    core.dispatch(
        InboundMessage::new("edgebridge-response/cmd", "late")
            .with_correlation(publish.correlation_data.unwrap()),
    )
    .await;
    assert_eq!(core.pending_requests(), 0);
    assert_eq!(bus.delivered_count(), 0);
}

#[tokio::test]
async fn test_response_without_correlation_is_dropped() {
    let (core, bus, _events) = core_with(config("gw"));
    core.register("cmd").unwrap();

    core.dispatch(InboundMessage::new("edgebridge-response/cmd", "x"))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.delivered_count(), 0);
    assert_eq!(core.pending_requests(), 0);
}

#[test_case(Ok(Bytes::new()), "ok" ; "answered")]
#[test_case(Err(BridgeError::ResponseTimeout), "timeout" ; "timed out")]
#[test_case(Err(BridgeError::Closed), "closed" ; "connector gone")]
#[test_case(Err(BridgeError::Codec("bad".to_string())), "error" ; "other failure")]
fn test_request_outcome_label(result: Result<Bytes>, label: &str) {
    assert_eq!(request_outcome(&result), label);
}

// =============================================================================
// Service
// =============================================================================

fn service_with(
    format: WireFormat,
) -> (BridgeService, Arc<RecordingBus>, UnboundedReceiver<ConnectorEvent>) {
    let (core, bus, events) = core_with(BridgeConfig {
        wire_format: format,
        ..config("gw")
    });
    (BridgeService::new(core), bus, events)
}

fn request<T: serde::Serialize>(format: WireFormat, endpoint: &str, body: &T) -> BusRequest {
    BusRequest {
        subject: format!("gw.{}", endpoint),
        reply: Some("_INBOX.reply".to_string()),
        payload: format.encode(body).unwrap(),
    }
}

fn only_response<T: serde::de::DeserializeOwned>(bus: &RecordingBus, format: WireFormat) -> T {
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "_INBOX.reply");
    format.decode(&published[0].1).unwrap()
}

#[tokio::test]
async fn test_service_register_then_subscribe_bincode() {
    service_register_then_subscribe(WireFormat::Bincode).await;
}

#[tokio::test]
async fn test_service_register_then_subscribe_json() {
    service_register_then_subscribe(WireFormat::Json).await;
}

async fn service_register_then_subscribe(format: WireFormat) {
    let (service, bus, mut events) = service_with(format);

    service
        .handle(request(
            format,
            "config.register",
            &RegisterRequest {
                topic: "sensors/temp".to_string(),
            },
        ))
        .await;

    let response: RegisterResponse = only_response(&bus, format);
    assert_eq!(response.error, "");
    assert!(response.subject.starts_with("gw."));
    assert_eq!(service.core().subjects("sensors/temp"), vec![response.subject]);
    assert_eq!(
        drain(&mut events),
        vec![ConnectorEvent::Subscribe("sensors/temp".to_string())]
    );
}

#[tokio::test]
async fn test_service_register_garbage_reports_error() {
    let (service, bus, mut events) = service_with(WireFormat::Json);

    service
        .handle(BusRequest {
            subject: "gw.config.register".to_string(),
            reply: Some("_INBOX.reply".to_string()),
            payload: Bytes::from_static(b"not json"),
        })
        .await;

    let response: RegisterResponse = only_response(&bus, WireFormat::Json);
    assert_eq!(response.subject, "");
    assert!(response.error.starts_with("codec error:"));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_service_unregister() {
    let (service, bus, mut events) = service_with(WireFormat::Bincode);
    let subject = service.core().register("a/b").unwrap();

    service
        .handle(request(
            WireFormat::Bincode,
            "config.unregister",
            &UnregisterRequest {
                subject: subject.clone(),
            },
        ))
        .await;
    let response: UnregisterResponse = only_response(&bus, WireFormat::Bincode);
    assert_eq!(response.error, "");
    assert_eq!(unsubscribes(&drain(&mut events), "a/b"), 1);
}

#[tokio::test]
async fn test_service_unregister_unknown() {
    let (service, bus, _events) = service_with(WireFormat::Bincode);

    service
        .handle(request(
            WireFormat::Bincode,
            "config.unregister",
            &UnregisterRequest {
                subject: "gw.nope".to_string(),
            },
        ))
        .await;
    let response: UnregisterResponse = only_response(&bus, WireFormat::Bincode);
    assert_eq!(response.error, "no topic found for subject 'gw.nope'");
}

#[tokio::test]
async fn test_service_publish_empty_topic() {
    let (service, bus, mut events) = service_with(WireFormat::Bincode);

    service
        .handle(request(
            WireFormat::Bincode,
            "publish",
            &PublishRequest {
                topic: String::new(),
                payload: Bytes::from_static(b"x"),
            },
        ))
        .await;
    let response: PublishResponse = only_response(&bus, WireFormat::Bincode);
    assert_eq!(response.error, "Empty topic received");
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_service_request_reply_zero_timeout() {
    let (service, bus, _events) = service_with(WireFormat::Bincode);

    service
        .handle(request(
            WireFormat::Bincode,
            "request-response",
            &RequestReplyRequest {
                topic: "cmd".to_string(),
                payload: Bytes::new(),
                timeout_millis: 0,
            },
        ))
        .await;
    eventually(|| bus.published().len() == 1).await;
    let response: RequestReplyResponse = only_response(&bus, WireFormat::Bincode);
    assert_eq!(response.error, "timeout is zero");
}

#[tokio::test]
async fn test_service_request_reply_timeout() {
    let (service, bus, _events) = service_with(WireFormat::Bincode);

    service
        .handle(request(
            WireFormat::Bincode,
            "request-response",
            &RequestReplyRequest {
                topic: "cmd".to_string(),
                payload: Bytes::new(),
                timeout_millis: 50,
            },
        ))
        .await;
    // The call runs on its own task
    assert!(bus.published().is_empty());

    eventually(|| bus.published().len() == 1).await;
    let response: RequestReplyResponse = only_response(&bus, WireFormat::Bincode);
    assert_eq!(response.error, "timeout expired");
    assert!(response.payload.is_empty());
}

#[tokio::test]
async fn test_service_ignores_foreign_subjects() {
    let (service, bus, _events) = service_with(WireFormat::Bincode);

    let mut req = request(
        WireFormat::Bincode,
        "config.register",
        &RegisterRequest {
            topic: "a/b".to_string(),
        },
    );
    req.subject = "other.config.register".to_string();
    service.handle(req).await;

    assert!(bus.published().is_empty());
    assert_eq!(service.core().registration_count(), 0);
}

#[tokio::test]
async fn test_service_without_reply_subject_still_registers() {
    let (service, bus, mut events) = service_with(WireFormat::Bincode);

    let mut req = request(
        WireFormat::Bincode,
        "config.register",
        &RegisterRequest {
            topic: "a/b".to_string(),
        },
    );
    req.reply = None;
    service.handle(req).await;

    assert!(bus.published().is_empty());
    assert_eq!(service.core().registration_count(), 1);
    assert_eq!(
        drain(&mut events),
        vec![ConnectorEvent::Subscribe("a/b".to_string())]
    );
}
