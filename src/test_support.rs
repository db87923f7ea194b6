//! In-memory doubles shared by unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::remote::{MessageBus, RemoteError};

/// Bus that acknowledges every request unless told otherwise
#[derive(Default)]
pub(crate) struct RecordingBus {
    /// Acknowledged requests
    delivered: Mutex<Vec<(String, Bytes)>>,
    /// Fire-and-forget publishes (responses)
    published: Mutex<Vec<(String, Bytes)>>,
    /// Subjects whose consumer never answers
    dead: Mutex<HashSet<String>>,
    /// Subjects without any consumer
    refused: Mutex<HashSet<String>>,
}

impl RecordingBus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn kill(&self, subject: &str) {
        self.dead.lock().insert(subject.to_string());
    }

    pub(crate) fn refuse(&self, subject: &str) {
        self.refused.lock().insert(subject.to_string());
    }

    pub(crate) fn delivered(&self, subject: &str) -> Vec<Bytes> {
        self.delivered
            .lock()
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub(crate) fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn request(&self, subject: &str, payload: Bytes) -> Result<Bytes, RemoteError> {
        let refused = self.refused.lock().contains(subject);
        if refused {
            return Err(RemoteError::NoResponders);
        }
        let dead = self.dead.lock().contains(subject);
        if dead {
            std::future::pending::<()>().await;
        }
        self.delivered.lock().push((subject.to_string(), payload));
        Ok(Bytes::new())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RemoteError> {
        self.published.lock().push((subject.to_string(), payload));
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
