//! Queue: type-partitioned FIFO storage plus status tracking.
//!
//! Design:
//! - One list per task type holds the encoded [`Task`] records.
//! - Being in the list means "pending"; the live status is a separate
//!   expiring record written by the worker that popped the task.
//! - All coordination goes through the [`Store`]; the queue itself holds no
//!   mutable state and can be shared freely behind an `Arc`.

mod keys;

pub use keys::KeySpace;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::QueueConfig;
use crate::domain::{Task, TaskId, TaskStatus, TaskType};
use crate::error::ConveyorError;
use crate::ports::store::bounded;
use crate::ports::{Clock, IdGenerator, Store, SystemClock, UlidGenerator};

pub struct Queue {
    store: Arc<dyn Store>,
    keys: KeySpace,
    status_ttl: Duration,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Queue {
    pub fn new(store: Arc<dyn Store>, config: &QueueConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.prefix.clone()),
            status_ttl: config.status_ttl,
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

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Encode `payload` and append a new pending task to `task_type`'s list.
    ///
    /// Returns the id assigned to the task so the producer can poll its status.
    #[tracing::instrument(skip_all, fields(task_type = %task_type))]
    pub async fn push<P>(&self, task_type: &TaskType, payload: &P) -> Result<TaskId, ConveyorError>
    where
        P: Serialize + ?Sized,
    {
        let data = serde_json::to_value(payload)?;
        let now = self.clock.now();
        let task = Task {
            id: self.ids.generate_task_id(task_type),
            task_type: task_type.clone(),
            data,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let encoded = serde_json::to_string(&task)?;

        bounded(
            self.store_timeout,
            self.store.list_push(&self.keys.queue(task_type), encoded),
        )
        .await?;

        tracing::debug!(task_id = %task.id, "task pushed");
        Ok(task.id)
    }

    /// Remove and return the oldest task of `task_type`.
    ///
    /// An empty queue is `Ok(None)`, not an error.
    pub async fn pop(&self, task_type: &TaskType) -> Result<Option<Task>, ConveyorError> {
        let raw = bounded(
            self.store_timeout,
            self.store.list_pop(&self.keys.queue(task_type)),
        )
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let task: Task = serde_json::from_str(&raw)?;
        Ok(Some(task))
    }

    /// Number of tasks still waiting in `task_type`'s list.
    pub async fn pending_count(&self, task_type: &TaskType) -> Result<usize, ConveyorError> {
        let len = bounded(
            self.store_timeout,
            self.store.list_len(&self.keys.queue(task_type)),
        )
        .await?;
        Ok(len)
    }

    /// Overwrite the status record of `task_id`. The record expires after the
    /// configured status retention.
    pub async fn update_task_status(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<(), ConveyorError> {
        bounded(
            self.store_timeout,
            self.store.set_with_ttl(
                &self.keys.status(task_id),
                status.as_str().to_string(),
                self.status_ttl,
            ),
        )
        .await?;
        tracing::trace!(task_id = %task_id, status = %status, "task status updated");
        Ok(())
    }

    /// Current status of `task_id`; `None` when unknown or expired.
    pub async fn get_task_status(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<TaskStatus>, ConveyorError> {
        let raw = bounded(self.store_timeout, self.store.get(&self.keys.status(task_id))).await?;
        raw.map(|s| s.parse::<TaskStatus>()).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn queue() -> (Arc<InMemoryStore>, Queue) {
        let store = Arc::new(InMemoryStore::new());
        let queue = Queue::new(store.clone(), &QueueConfig::default());
        (store, queue)
    }

    #[tokio::test]
    async fn pop_returns_tasks_in_push_order() {
        let (_, queue) = queue();
        let task_type = TaskType::new("image_recognition");

        let a = queue.push(&task_type, &json!({ "n": "a" })).await.unwrap();
        let b = queue.push(&task_type, &json!({ "n": "b" })).await.unwrap();

        let first = queue.pop(&task_type).await.unwrap().unwrap();
        let second = queue.pop(&task_type).await.unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(second.id, b);
        assert_eq!(first.data, json!({ "n": "a" }));
    }

    #[tokio::test]
    async fn pop_on_empty_type_is_none() {
        let (_, queue) = queue();
        let popped = queue.pop(&TaskType::new("model_training")).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn types_do_not_share_lists() {
        let (_, queue) = queue();
        let images = TaskType::new("image_recognition");
        let training = TaskType::new("model_training");

        queue.push(&images, &json!({})).await.unwrap();

        assert!(queue.pop(&training).await.unwrap().is_none());
        assert_eq!(queue.pending_count(&images).await.unwrap(), 1);
        assert!(queue.pop(&images).await.unwrap().is_some());
        assert_eq!(queue.pending_count(&images).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_survives_the_round_trip() {
        let (_, queue) = queue();
        let task_type = TaskType::new("image_recognition");

        let mut payload = BTreeMap::new();
        payload.insert("image_url", "x");
        queue.push(&task_type, &payload).await.unwrap();

        let task = queue.pop(&task_type).await.unwrap().unwrap();
        let decoded: BTreeMap<String, String> = task.decode().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["image_url"], "x");
    }

    #[tokio::test]
    async fn pushed_task_is_pending_with_clock_timestamps() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let (_, queue) = queue();
        let queue = queue.with_clock(Arc::new(FixedClock::new(at)));
        let task_type = TaskType::new("model_training");

        let id = queue.push(&task_type, &json!({ "dataset_id": "d1" })).await.unwrap();
        let task = queue.pop(&task_type).await.unwrap().unwrap();

        assert_eq!(task.id, id);
        assert!(id.as_str().starts_with("model_training_"));
        assert_eq!(task.task_type, task_type);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, at);
        assert_eq!(task.updated_at, at);
    }

    #[tokio::test]
    async fn unserializable_payload_is_rejected_before_touching_the_store() {
        let (store, queue) = queue();
        let task_type = TaskType::new("image_recognition");

        // JSON object keys must be strings
        let mut payload = std::collections::HashMap::new();
        payload.insert(vec![1u8], "value");

        let err = queue.push(&task_type, &payload).await.unwrap_err();
        assert!(matches!(err, ConveyorError::Serialization(_)));
        assert_eq!(store.list_len(&queue.keys().queue(&task_type)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_serialization_error() {
        let (store, queue) = queue();
        let task_type = TaskType::new("image_recognition");
        store
            .list_push(&queue.keys().queue(&task_type), "not json".to_string())
            .await
            .unwrap();

        let err = queue.pop(&task_type).await.unwrap_err();
        assert!(matches!(err, ConveyorError::Serialization(_)));
    }

    #[tokio::test]
    async fn status_round_trip_and_missing_status() {
        let (_, queue) = queue();
        let id = TaskId::new("image_recognition_1");

        assert_eq!(queue.get_task_status(&id).await.unwrap(), None);

        queue.update_task_status(&id, TaskStatus::Processing).await.unwrap();
        assert_eq!(queue.get_task_status(&id).await.unwrap(), Some(TaskStatus::Processing));

        queue.update_task_status(&id, TaskStatus::Completed).await.unwrap();
        assert_eq!(queue.get_task_status(&id).await.unwrap(), Some(TaskStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn status_expires_after_retention() {
        let (_, queue) = queue();
        let id = TaskId::new("image_recognition_1");
        queue.update_task_status(&id, TaskStatus::Failed).await.unwrap();

        tokio::time::advance(Duration::from_secs(23 * 60 * 60)).await;
        assert_eq!(queue.get_task_status(&id).await.unwrap(), Some(TaskStatus::Failed));

        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert_eq!(queue.get_task_status(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_stored_status_is_reported() {
        let (store, queue) = queue();
        let id = TaskId::new("t_1");
        store
            .set_with_ttl(&queue.keys().status(&id), "archived".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let err = queue.get_task_status(&id).await.unwrap_err();
        assert!(matches!(err, ConveyorError::InvalidStatus(_)));
    }
}
