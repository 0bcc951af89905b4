// ABOUTME: Typed JSON queue on top of the raw list store, plus queue naming conventions.
// ABOUTME: Serializes on push, deserializes on pop; no atomicity across queue names.

use crate::identity::WorkerId;
use crate::metrics;
use crate::store::{SharedStore, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Queue polled by every worker for questions without affinity
pub const COMMON_QUEUE: &str = "queue.common";

/// Private question queue of one worker
pub fn worker_queue(id: &WorkerId) -> String {
    format!("queue.{}", id)
}

/// Response queue drained by one consumer
pub fn answers_queue(consumer: &str) -> String {
    format!("queue.answers.{}", consumer)
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The element was popped but is not a valid document; it is gone from the store
    #[error("malformed payload in {queue}: {source}")]
    Malformed {
        queue: String,
        source: serde_json::Error,
    },

    #[error("failed to serialize payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// JSON queue client. Cheap to clone; clones share the store connection.
#[derive(Clone)]
pub struct Queue {
    store: SharedStore,
}

impl Queue {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Serialize `value` and append it to the tail of `name`
    pub async fn push<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), QueueError> {
        let payload = serde_json::to_string(value).map_err(QueueError::Encode)?;
        tracing::debug!(queue = %name, bytes = payload.len(), "enqueue");
        if let Err(e) = self.store.push(name, payload).await {
            metrics::record_store_error("push");
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the head of `name` and decode it. `Ok(None)` when the queue is empty.
    pub async fn pop<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, QueueError> {
        let raw = match self.store.pop(name).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                metrics::record_store_error("pop");
                return Err(e.into());
            }
        };
        tracing::debug!(queue = %name, bytes = raw.len(), "dequeue");
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| QueueError::Malformed {
                queue: name.to_string(),
                source,
            })
    }
}
