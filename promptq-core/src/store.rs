// ABOUTME: Backing list store for queues: Redis in production, in-memory for tests and demos.
// ABOUTME: Exposes atomic push-to-tail / pop-from-head plus TTL key-values for thread bindings.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Store unreachable, or the client was closed
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
}

/// A named-list store with atomic single-element push and pop.
///
/// There is no acknowledgement, visibility timeout or multi-key transaction: once
/// `pop` returns an element it is gone from the store.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append to the tail of `queue`
    async fn push(&self, queue: &str, payload: String) -> Result<(), StoreError>;

    /// Remove and return the head of `queue`, `None` when empty. Never blocks.
    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Store a value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Release the connection. Later calls fail with `Unavailable`.
    async fn close(&self);
}

pub type SharedStore = Arc<dyn QueueStore>;

/// Open a store from a URL: `redis://`, `rediss://` or `memory://`
pub async fn connect(url: &str) -> Result<SharedStore, StoreError> {
    if url.starts_with("memory://") {
        tracing::info!("Using in-process memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(RedisStore::connect(url).await?))
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed store using `RPUSH`/`LPOP` on lists and `SETEX`/`GET` on keys.
pub struct RedisStore {
    conn: RwLock<Option<ConnectionManager>>,
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let manager = ConnectionManager::new(client).await.map_err(unavailable)?;
        tracing::info!("Connected to redis queue store");
        Ok(Self {
            conn: RwLock::new(Some(manager)),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Unavailable("store client closed".to_string()))
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push(&self, queue: &str, payload: String) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(queue, payload)
            .await
            .map_err(unavailable)
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.lpop::<_, Option<String>>(queue, None)
            .await
            .map_err(unavailable)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(unavailable)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(unavailable)
    }

    async fn close(&self) {
        if self.conn.write().await.take().is_some() {
            tracing::info!("Redis queue store closed");
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local store with the same semantics as the Redis one.
///
/// Used by tests and by `memory://` setups where the worker runs in-process.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    keys: Mutex<HashMap<String, (String, Instant)>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage; every operation fails until set back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of elements waiting in `queue`
    pub fn len(&self, queue: &str) -> usize {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Copy of the elements in `queue`, head first
    pub fn snapshot(&self, queue: &str) -> Vec<String> {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push(&self, queue: &str, payload: String) -> Result<(), StoreError> {
        self.check()?;
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = lists.get_mut(queue) else {
            return Ok(None);
        };
        let head = list.pop_front();
        // Redis deletes a list when it becomes empty
        if list.is_empty() {
            lists.remove(queue);
        }
        Ok(head)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        match keys.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                keys.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.set_offline(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_is_fifo_per_queue() {
        let store = MemoryStore::new();
        store.push("q", "1".into()).await.unwrap();
        store.push("q", "2".into()).await.unwrap();
        store.push("other", "x".into()).await.unwrap();

        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.pop("q").await.unwrap(), None);
        assert_eq!(store.len("other"), 1);
    }

    #[tokio::test]
    async fn test_offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.push("q", "1".into()).await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.push("q", "1".into()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryStore::new();
        store.close().await;
        assert!(store.pop("q").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_memory_url() {
        let store = connect("memory://").await.unwrap();
        store.push("q", "hello".into()).await.unwrap();
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("hello"));
    }
}
