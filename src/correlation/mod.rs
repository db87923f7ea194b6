//! Correlation Store
//!
//! Pending request/reply calls keyed by correlation id. Each entry is
//! removed exactly once: either by the matching response, or when the
//! caller's [`PendingRequest`] is dropped after its wait ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{BridgeError, Result};


/// Correlation id → response channel
#[derive(Default)]
pub struct CorrelationStore {
    pending: Mutex<HashMap<String, oneshot::Sender<Bytes>>>,
}

impl CorrelationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a pending request under a fresh correlation id
    pub fn register(self: &Arc<Self>) -> PendingRequest {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        PendingRequest {
            id,
            response: rx,
            store: Arc::clone(self),
        }
    }

    /// Hand a response to its waiting caller.
    ///
    /// Returns false if no request is waiting under `id` (unknown, or it
    /// already timed out); the payload is dropped.
    pub fn complete(&self, id: &str, payload: Bytes) -> bool {
        let Some(tx) = self.pending.lock().remove(id) else {
            return false;
        };
        tx.send(payload).is_ok()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn remove(&self, id: &str) {
        self.pending.lock().remove(id);
    }
}

/// An in-flight request/reply call. Dropping it withdraws the entry.
pub struct PendingRequest {
    id: String,
    response: oneshot::Receiver<Bytes>,
    store: Arc<CorrelationStore>,
}

impl PendingRequest {
    /// Correlation id to attach to the outgoing message
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the correlated response or the deadline, whichever is first
    pub async fn wait(mut self, window: Duration) -> Result<Bytes> {
        match tokio::time::timeout(window, &mut self.response).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => Err(BridgeError::ResponseTimeout),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.store.remove(&self.id);
    }
}
