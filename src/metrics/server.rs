//! HTTP server for the Prometheus endpoint and health probes

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::Metrics;

/// HTTP server exposing `/metrics`, `/healthz` and `/readyz`
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = metrics.clone();
                    async move { Ok::<_, Infallible>(respond(req.uri().path(), &metrics)) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

/// Route a request path to its response
pub(crate) fn respond(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metrics.registry.gather(), &mut buffer) {
                Ok(()) => (StatusCode::OK, encoder.format_type().to_string(), buffer),
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain".to_string(),
                        b"Failed to encode metrics".to_vec(),
                    )
                }
            }
        }
        "/health" | "/healthz" => (StatusCode::OK, "text/plain".to_string(), b"OK".to_vec()),
        "/ready" | "/readyz" => {
            if metrics.mqtt_connected.get() > 0 {
                (StatusCode::OK, "text/plain".to_string(), b"OK".to_vec())
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "text/plain".to_string(),
                    b"MQTT disconnected".to_vec(),
                )
            }
        }
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain".to_string(),
            b"Not Found".to_vec(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(&content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}
