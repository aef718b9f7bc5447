//! NotificationService - durable record plus live broadcast of task outcomes.
//!
//! The stored record (`P:notification:{task_id}`) is the source of truth.
//! Publishing on `P:notification:channel` is best effort: a failed publish is
//! logged and the call still succeeds.

use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::domain::{Notification, NotificationKind, TaskId};
use crate::error::ConveyorError;
use crate::ports::store::bounded;
use crate::ports::{Clock, IdGenerator, Store, Subscription, SystemClock, UlidGenerator};
use crate::queue::KeySpace;

pub struct NotificationService {
    store: Arc<dyn Store>,
    keys: KeySpace,
    ttl: Duration,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>, config: &QueueConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.prefix.clone()),
            ttl: config.notification_ttl,
            store_timeout: config.store_timeout,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Persist an outcome notification for `task_id`, then broadcast it.
    ///
    /// Fails only when encoding or the store write fails.
    #[tracing::instrument(skip_all, fields(task_id = %task_id, kind = %kind))]
    pub async fn send_notification(
        &self,
        task_id: &TaskId,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Result<Notification, ConveyorError> {
        let notification = Notification {
            id: self.ids.generate_notification_id(kind),
            kind,
            task_id: task_id.clone(),
            message: message.into(),
            created_at: self.clock.now(),
        };
        let encoded = serde_json::to_string(&notification)?;

        bounded(
            self.store_timeout,
            self.store
                .set_with_ttl(&self.keys.notification(task_id), encoded.clone(), self.ttl),
        )
        .await?;

        let channel = self.keys.notification_channel();
        match bounded(self.store_timeout, self.store.publish(&channel, encoded)).await {
            Ok(receivers) => {
                tracing::debug!(
                    notification_id = %notification.id,
                    receivers,
                    "notification published"
                );
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    error = %e,
                    "publish notification failed"
                );
            }
        }

        Ok(notification)
    }

    /// Latest notification for `task_id`; `None` when absent or expired.
    pub async fn get_notification(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<Notification>, ConveyorError> {
        let raw = bounded(
            self.store_timeout,
            self.store.get(&self.keys.notification(task_id)),
        )
        .await?;

        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    /// Receive every notification published from now on.
    pub async fn subscribe(&self) -> Result<NotificationStream, ConveyorError> {
        let channel = self.keys.notification_channel();
        let subscription = bounded(self.store_timeout, self.store.subscribe(&channel)).await?;
        Ok(NotificationStream {
            subscription,
            channel,
        })
    }
}

/// Live notifications decoded from the broadcast channel.
#[derive(Debug)]
pub struct NotificationStream {
    subscription: Subscription,
    channel: String,
}

impl NotificationStream {
    /// Next notification. Messages that do not decode are skipped.
    /// Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            let raw = self.subscription.recv().await?;
            match serde_json::from_str(&raw) {
                Ok(notification) => return Some(notification),
                Err(e) => {
                    tracing::warn!(
                        channel = %self.channel,
                        error = %e,
                        "skipping undecodable notification"
                    );
                }
            }
        }
    }
}
