// ABOUTME: Durable thread → affinity bindings kept in the queue store with a TTL.
// ABOUTME: Survives edited or truncated chat history; the text marker remains the fallback.

use crate::affinity::AffinityMarker;
use crate::store::{SharedStore, StoreError};
use std::time::Duration;

/// Default lifetime of a binding: one day
pub const DEFAULT_BINDING_TTL: Duration = Duration::from_secs(86_400);

#[derive(Clone)]
pub struct ThreadBindings {
    store: SharedStore,
    ttl: Duration,
}

impl ThreadBindings {
    /// A zero `ttl` disables bindings entirely
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn key(channel: &str, thread_ts: &str) -> String {
        format!("affinity.thread.{}.{}", channel, thread_ts)
    }

    /// Remember which conversation and worker the thread belongs to
    pub async fn record(
        &self,
        channel: &str,
        thread_ts: &str,
        marker: &AffinityMarker,
    ) -> Result<(), StoreError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let value = serde_json::to_string(marker)
            .map_err(|e| StoreError::Unavailable(format!("cannot encode binding: {}", e)))?;
        self.store
            .set_ex(&Self::key(channel, thread_ts), value, self.ttl)
            .await
    }

    /// Stored binding for the thread. Misses, store errors and bad values all yield `None`.
    pub async fn lookup(&self, channel: &str, thread_ts: &str) -> Option<AffinityMarker> {
        if !self.is_enabled() {
            return None;
        }
        let key = Self::key(channel, thread_ts);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Thread binding lookup failed");
                return None;
            }
        };
        match serde_json::from_str::<AffinityMarker>(&raw) {
            Ok(marker) if marker.worker_id.is_routable() => Some(marker),
            Ok(marker) => {
                tracing::warn!(key = %key, worker_id = %marker.worker_id, "Ignoring thread binding to unroutable worker");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Ignoring unreadable thread binding");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::WorkerId;
    use crate::store::{MemoryStore, QueueStore};
    use std::sync::Arc;

    fn marker() -> AffinityMarker {
        AffinityMarker::new("c1", "m1", WorkerId::from_raw("W1"))
    }

    #[tokio::test]
    async fn test_record_then_lookup() {
        let bindings = ThreadBindings::new(Arc::new(MemoryStore::new()), DEFAULT_BINDING_TTL);
        bindings.record("C1", "100.1", &marker()).await.unwrap();
        assert_eq!(bindings.lookup("C1", "100.1").await, Some(marker()));
        assert_eq!(bindings.lookup("C1", "200.2").await, None);
    }

    #[tokio::test]
    async fn test_disabled_bindings_store_nothing() {
        let store = Arc::new(MemoryStore::new());
        let bindings = ThreadBindings::new(store.clone(), Duration::ZERO);
        bindings.record("C1", "1", &marker()).await.unwrap();
        assert!(store
            .get(&ThreadBindings::key("C1", "1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(bindings.lookup("C1", "1").await, None);
    }

    #[tokio::test]
    async fn test_store_outage_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let bindings = ThreadBindings::new(store.clone(), DEFAULT_BINDING_TTL);
        bindings.record("C1", "1", &marker()).await.unwrap();
        store.set_offline(true);
        assert_eq!(bindings.lookup("C1", "1").await, None);
    }

    #[tokio::test]
    async fn test_garbage_value_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex(&ThreadBindings::key("C1", "1"), "nope".into(), DEFAULT_BINDING_TTL)
            .await
            .unwrap();
        let bindings = ThreadBindings::new(store, DEFAULT_BINDING_TTL);
        assert_eq!(bindings.lookup("C1", "1").await, None);
    }

    #[tokio::test]
    async fn test_unroutable_worker_is_a_miss() {
        let bindings = ThreadBindings::new(Arc::new(MemoryStore::new()), DEFAULT_BINDING_TTL);
        let odd = AffinityMarker::new("c1", "m1", WorkerId::from_raw("answers.console"));
        bindings.record("C1", "1", &odd).await.unwrap();
        assert_eq!(bindings.lookup("C1", "1").await, None);
    }
}
