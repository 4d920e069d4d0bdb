//! Task Queue: the external FIFO broker, consumed as an interface.
//!
//! The broker is a set of named lists. Producers push to the left (LPUSH)
//! and consumers block-pop from the right (BRPOP), which yields FIFO order
//! per channel. A blocking pop over several channels checks them in the
//! order given and returns the first non-empty one.
//!
//! Pop removes the payload optimistically: there is no acknowledgement
//! step, so a consumer that crashes between pop and its durable write
//! loses that payload.
//!
//! Two implementations are provided:
//!
//! - `RedisTaskQueue`: one Redis connection per instance
//! - `MemoryTaskQueue`: in-process lists with the same semantics, used by
//!   tests and single-process runs

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the broker, or the broker is unreachable.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A durable FIFO broker with named channels.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Appends `payload` to `channel`.
    async fn push(&self, channel: &str, payload: &str) -> Result<(), QueueError>;

    /// Pops the oldest payload from the first non-empty channel, waiting up
    /// to `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout expires with every channel empty.
    async fn blocking_pop(
        &self,
        channels: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError>;

    /// Returns the number of payloads waiting on `channel`.
    async fn len(&self, channel: &str) -> Result<usize, QueueError>;
}

/// Opens a dedicated broker handle for one component.
///
/// Blocking pops hold their connection for the whole wait, so every
/// consumer gets its own handle instead of sharing a process-wide one.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TaskQueue>, QueueError>;
}

/// Redis-backed task queue.
pub struct RedisTaskQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisTaskQueue {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }
}

/// BRPOP takes whole seconds; round up so short timeouts never become 0
/// (which would block forever).
fn brpop_timeout_secs(timeout: Duration) -> usize {
    let millis = timeout.as_millis();
    (millis.div_ceil(1000) as usize).max(1)
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, channel: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        channels: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError> {
        let mut conn = self.redis.clone();

        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(channels)
            .arg(brpop_timeout_secs(timeout))
            .query_async(&mut conn)
            .await?;

        Ok(result)
    }

    async fn len(&self, channel: &str) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(channel).await?;
        Ok(len)
    }
}

/// Connects a fresh `RedisTaskQueue` per component.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn TaskQueue>, QueueError> {
        let queue = RedisTaskQueue::connect(&self.url).await?;
        Ok(Arc::new(queue))
    }
}

struct MemoryInner {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    available: AtomicBool,
}

/// In-process task queue.
///
/// Clones share the same lists, so a clone plays the role of a separate
/// connection to the same broker.
#[derive(Clone)]
pub struct MemoryTaskQueue {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                lists: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::ConnectionFailed(
                "in-memory broker is unavailable".to_string(),
            ))
        }
    }

    async fn try_pop(&self, channels: &[String]) -> Option<(String, String)> {
        let mut lists = self.inner.lists.lock().await;
        for channel in channels {
            if let Some(payload) = lists.get_mut(channel).and_then(|list| list.pop_back()) {
                return Some((channel.clone(), payload));
            }
        }
        None
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn push(&self, channel: &str, payload: &str) -> Result<(), QueueError> {
        self.ensure_available()?;
        {
            let mut lists = self.inner.lists.lock().await;
            lists
                .entry(channel.to_string())
                .or_default()
                .push_front(payload.to_string());
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(
        &self,
        channels: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError> {
        self.ensure_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.inner.notify.notified();

            if let Some(item) = self.try_pop(channels).await {
                return Ok(Some(item));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let _ = tokio::time::timeout_at(deadline, notified).await;
        }
    }

    async fn len(&self, channel: &str) -> Result<usize, QueueError> {
        self.ensure_available()?;
        let lists = self.inner.lists.lock().await;
        Ok(lists.get(channel).map(VecDeque::len).unwrap_or(0))
    }
}

#[async_trait]
impl QueueConnector for MemoryTaskQueue {
    async fn connect(&self) -> Result<Arc<dyn TaskQueue>, QueueError> {
        self.ensure_available()?;
        Ok(Arc::new(self.clone()))
    }
}
