//! InMemoryStore - single-process Store for development and tests.
//!
//! - `HashMap<String, VecDeque<String>>` per list key, one tokio Mutex for
//!   everything, so `list_pop` is atomic by construction.
//! - Expiring values are evicted lazily on read (tokio `Instant`, so tests can
//!   drive expiry with `tokio::time::pause` / `advance`).
//! - Channels are `tokio::sync::broadcast`, forwarded into each subscriber's
//!   mpsc queue.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;

use crate::ports::{Store, StoreError, Subscription};

const CHANNEL_CAPACITY: usize = 1024;
const SUBSCRIPTION_BUFFER: usize = 256;

struct Entry {
    value: String,
    /// `None` when `now + ttl` is past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct InMemoryState {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, Entry>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_push(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.lists.entry(key.to_string()).or_default().push_back(value);
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.pop_front();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        state.values.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        let expired = match state.values.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(Instant::now()),
        };
        if expired {
            state.values.remove(key);
            return Ok(None);
        }
        Ok(state.values.get(key).map(|entry| entry.value.clone()))
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        let Some(sender) = state.channels.get(channel) else {
            return Ok(0);
        };
        // send only fails when every receiver is gone
        Ok(sender.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut rx = {
            let mut state = self.state.lock().await;
            state
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let (tx, sub_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = rx.recv() => message,
                };
                match message {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            channel = %channel,
                            skipped,
                            "subscriber lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(sub_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn list_is_fifo() {
        let store = InMemoryStore::new();
        store.list_push("q", "a".into()).await.unwrap();
        store.list_push("q", "b".into()).await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 2);

        assert_eq!(store.list_pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.list_pop("q").await.unwrap(), None);
        assert_eq!(store.list_len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lists_are_independent() {
        let store = InMemoryStore::new();
        store.list_push("q1", "a".into()).await.unwrap();
        store.list_push("q2", "b".into()).await.unwrap();

        assert_eq!(store.list_pop("q2").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.list_pop("q2").await.unwrap(), None);
        assert_eq!(store.list_pop("q1").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pops_never_share_a_value() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..500 {
            store.list_push("q", i.to_string()).await.unwrap();
        }

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = store.list_pop("q").await.unwrap() {
                    got.push(v);
                }
                got
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for join in joins {
            for v in join.await.unwrap() {
                total += 1;
                assert!(seen.insert(v), "value delivered twice");
            }
        }
        assert_eq!(total, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_never_expires() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("k", "v".into(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("k", "old".into(), ttl).await.unwrap();
        store.set_with_ttl("k", "new".into(), ttl).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = InMemoryStore::new();
        assert_eq!(store.publish("ch", "nobody".into()).await.unwrap(), 0);

        let mut sub = store.subscribe("ch").await.unwrap();
        assert_eq!(store.publish("ch", "hello".into()).await.unwrap(), 1);
        assert_eq!(sub.recv().await.as_deref(), Some("hello"));

        let mut other = store.subscribe("other").await.unwrap();
        store.publish("ch", "second".into()).await.unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("second"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), other.recv())
                .await
                .is_err()
        );
    }
}
