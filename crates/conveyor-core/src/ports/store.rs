//! Store port - the shared key-value / list / pub-sub backend.
//!
//! Redis in production, [`crate::impls::InMemoryStore`] for tests and local runs.
//! Every list is used as a FIFO: values go in at the "new" end with
//! [`Store::list_push`] and come out of the "old" end with [`Store::list_pop`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Backend operations the queue and notification service rely on.
///
/// # Contract
/// - `list_pop` must be atomic: two concurrent callers never receive the same
///   value. This is what keeps workers racing the same list from running a
///   task twice.
/// - Missing keys are `Ok(None)` / `0`, never an error.
/// - Values written with a TTL disappear once it elapses.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append `value` at the new end of the list stored at `key`.
    async fn list_push(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove and return the oldest value of the list stored at `key`.
    async fn list_pop(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Overwrite `key` with `value`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Broadcast `message` on `channel`. Returns how many subscribers received it.
    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError>;

    /// Start receiving messages published on `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;
}

/// Live feed of messages published on one channel.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next raw message, or `None` once the backend side has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Run one store call with an upper time bound.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
