//! RedisStore - Store backed by a shared Redis instance.
//!
//! | Store call     | Redis command |
//! |----------------|---------------|
//! | `list_push`    | `LPUSH`       |
//! | `list_pop`     | `RPOP`        |
//! | `list_len`     | `LLEN`        |
//! | `set_with_ttl` | `PSETEX`      |
//! | `get`          | `GET`         |
//! | `publish`      | `PUBLISH`     |
//! | `subscribe`    | `SUBSCRIBE` on a dedicated connection |
//!
//! LPUSH + RPOP keeps each list FIFO, and RPOP is a single atomic command.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

use crate::ports::{Store, StoreError, Subscription};

const SUBSCRIPTION_BUFFER: usize = 256;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Cloning is cheap: the ConnectionManager multiplexes one reconnecting
/// connection across all clones.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        tracing::info!(url = %redact(url), "connected to redis");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn list_push(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _len: usize = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop(key, None).await?)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.pset_ex(key, value, expiry_millis(ttl)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.publish(channel, message).await?)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "skipping non-text message");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            tracing::debug!(channel = %channel, "redis subscription closed");
        });

        Ok(Subscription::new(rx))
    }
}

/// PSETEX rejects 0, and Redis keeps expiries as i64 milliseconds.
fn expiry_millis(ttl: Duration) -> u64 {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    millis.clamp(1, i64::MAX as u64)
}

/// Hide the password part of a connection url for logs.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
