//! Prometheus metrics for edgebridge
//!
//! Exposes registration churn, forwarding throughput and request/reply
//! outcomes at the /metrics endpoint.

use prometheus::core::Collector;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;


pub use server::MetricsServer;

/// All bridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Registration metrics
    pub registrations_current: IntGauge,
    pub registrations_total: IntCounter,
    pub unregistrations_total: IntCounterVec,

    // Forwarding metrics
    pub mqtt_messages_received: IntCounter,
    pub mqtt_bytes_received: IntCounter,
    pub messages_forwarded: IntCounter,

    // Outbound MQTT
    pub mqtt_publishes_total: IntCounter,

    // Request/reply
    pub requests_total: IntCounterVec,
    pub requests_pending: IntGauge,
    pub responses_dropped: IntCounter,
    pub request_latency: Histogram,

    // Connection state
    pub mqtt_connected: IntGauge,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> C {
    registry
        .register(Box::new(collector.clone()))
        .expect("metric names are unique");
    collector
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let registrations_current = IntGauge::with_opts(Opts::new(
            "edgebridge_registrations_current",
            "Active topic registrations",
        ))
        .unwrap();

        let registrations_total = IntCounter::with_opts(Opts::new(
            "edgebridge_registrations_total",
            "Topic registrations since startup",
        ))
        .unwrap();

        let unregistrations_total = IntCounterVec::new(
            Opts::new(
                "edgebridge_unregistrations_total",
                "Registrations torn down, by reason",
            ),
            &["reason"],
        )
        .unwrap();

        let mqtt_messages_received = IntCounter::with_opts(Opts::new(
            "edgebridge_mqtt_messages_received_total",
            "Messages received from the MQTT broker",
        ))
        .unwrap();

        let mqtt_bytes_received = IntCounter::with_opts(Opts::new(
            "edgebridge_mqtt_bytes_received_total",
            "Payload bytes received from the MQTT broker",
        ))
        .unwrap();

        let messages_forwarded = IntCounter::with_opts(Opts::new(
            "edgebridge_messages_forwarded_total",
            "Messages acknowledged by bus consumers",
        ))
        .unwrap();

        let mqtt_publishes_total = IntCounter::with_opts(Opts::new(
            "edgebridge_mqtt_publishes_total",
            "Messages handed to the MQTT connector for publishing",
        ))
        .unwrap();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "edgebridge_request_reply_total",
                "Request/reply calls, by result",
            ),
            &["result"],
        )
        .unwrap();

        let requests_pending = IntGauge::with_opts(Opts::new(
            "edgebridge_request_reply_pending",
            "Request/reply calls waiting for a response",
        ))
        .unwrap();

        let responses_dropped = IntCounter::with_opts(Opts::new(
            "edgebridge_responses_dropped_total",
            "MQTT responses without a waiting request",
        ))
        .unwrap();

        let request_latency = Histogram::with_opts(
            HistogramOpts::new(
                "edgebridge_request_reply_seconds",
                "Time from request publish to correlated response",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .unwrap();

        let mqtt_connected = IntGauge::with_opts(Opts::new(
            "edgebridge_mqtt_connected",
            "1 while the MQTT connection is up",
        ))
        .unwrap();

        Metrics {
            registrations_current: register(&registry, registrations_current),
            registrations_total: register(&registry, registrations_total),
            unregistrations_total: register(&registry, unregistrations_total),
            mqtt_messages_received: register(&registry, mqtt_messages_received),
            mqtt_bytes_received: register(&registry, mqtt_bytes_received),
            messages_forwarded: register(&registry, messages_forwarded),
            mqtt_publishes_total: register(&registry, mqtt_publishes_total),
            requests_total: register(&registry, requests_total),
            requests_pending: register(&registry, requests_pending),
            responses_dropped: register(&registry, responses_dropped),
            request_latency: register(&registry, request_latency),
            mqtt_connected: register(&registry, mqtt_connected),
            registry,
        }
    }

    pub fn registration_added(&self) {
        self.registrations_total.inc();
        self.registrations_current.inc();
    }

    /// `reason` is `explicit` or `timeout`
    pub fn registration_removed(&self, reason: &str) {
        self.registrations_current.dec();
        self.unregistrations_total.with_label_values(&[reason]).inc();
    }

    pub fn mqtt_message_received(&self, bytes: usize) {
        self.mqtt_messages_received.inc();
        self.mqtt_bytes_received.inc_by(bytes as u64);
    }

    pub fn message_forwarded(&self) {
        self.messages_forwarded.inc();
    }

    pub fn mqtt_published(&self) {
        self.mqtt_publishes_total.inc();
    }

    pub fn request_started(&self) {
        self.requests_pending.inc();
    }

    /// `result` is `ok`, `timeout`, `closed` or `error`. Latency is only
    /// observed for answered calls.
    pub fn request_finished(&self, result: &str, seconds: f64) {
        self.requests_pending.dec();
        self.requests_total.with_label_values(&[result]).inc();
        if result == "ok" {
            self.request_latency.observe(seconds);
        }
    }

    pub fn response_dropped(&self) {
        self.responses_dropped.inc();
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.set(i64::from(connected));
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
