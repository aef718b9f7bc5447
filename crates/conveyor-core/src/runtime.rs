use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::{Task, TaskType};
use crate::error::ConveyorError;

/// Business failure reported by a handler. Its text becomes the `failed`
/// notification message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// lets handlers use `task.decode::<T>()?`
impl From<ConveyorError> for HandlerError {
    fn from(err: ConveyorError) -> Self {
        Self::new(err.to_string())
    }
}

/// Per-invocation context handed to a handler.
///
/// The pool never interrupts a running handler. Long handlers may check
/// [`TaskContext::is_shutting_down`] and wrap up early on their own.
#[derive(Debug, Clone)]
pub struct TaskContext {
    worker_id: usize,
    shutdown: watch::Receiver<bool>,
}

impl TaskContext {
    pub(crate) fn new(worker_id: usize, shutdown: watch::Receiver<bool>) -> Self {
        Self { worker_id, shutdown }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A handler for a specific task type.
///
/// Takes the whole `Task` so the handler can decode the payload as it likes.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`TaskHandler`]. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), task.clone()).await
    }
}

/// ```ignore
/// pool.register_handler("image_recognition", handler_fn(|_ctx, task| async move {
///     let payload: ImagePayload = task.decode()?;
///     recognize(&payload).await.map_err(|e| HandlerError::new(e.to_string()))
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Frozen when the pool starts, read without locks afterwards.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type. Last wins: the replaced handler,
    /// if any, is returned.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(task_type, handler)
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    /// Registered types in a stable (sorted) order.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskStatus};
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(&self, _ctx: &TaskContext, _task: &Task) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn task(data: serde_json::Value) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new("image_recognition_1"),
            task_type: TaskType::new("image_recognition"),
            data,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx() -> (watch::Sender<bool>, TaskContext) {
        let (tx, rx) = watch::channel(false);
        (tx, TaskContext::new(3, rx))
    }

    #[test]
    fn registry_lists_types_sorted() {
        let mut reg = HandlerRegistry::new();
        reg.register(TaskType::new("model_training"), Arc::new(OkHandler));
        reg.register(TaskType::new("image_recognition"), Arc::new(OkHandler));

        assert_eq!(reg.len(), 2);
        assert_eq!(
            reg.task_types(),
            vec![TaskType::new("image_recognition"), TaskType::new("model_training")]
        );
        assert!(reg.get(&TaskType::new("data_analysis")).is_none());
    }

    #[test]
    fn re_registering_replaces_the_handler() {
        let mut reg = HandlerRegistry::new();
        assert!(reg.register(TaskType::new("t"), Arc::new(OkHandler)).is_none());
        assert!(reg.register(TaskType::new("t"), Arc::new(OkHandler)).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn handler_fn_decodes_payload_and_propagates_errors() {
        #[derive(Deserialize)]
        struct ImagePayload {
            image_url: String,
        }

        let handler = handler_fn(|_ctx, task: Task| async move {
            let payload: ImagePayload = task.decode()?;
            if payload.image_url.is_empty() {
                return Err(HandlerError::new("image_url is empty"));
            }
            Ok(())
        });
        let (_tx, ctx) = ctx();

        handler.handle(&ctx, &task(json!({ "image_url": "x" }))).await.unwrap();

        let err = handler
            .handle(&ctx, &task(json!({ "image_url": "" })))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "image_url is empty");

        let err = handler.handle(&ctx, &task(json!({}))).await.unwrap_err();
        assert!(err.message().contains("serialization failed"));
    }

    #[test]
    fn context_reflects_shutdown() {
        let (tx, ctx) = ctx();
        assert_eq!(ctx.worker_id(), 3);
        assert!(!ctx.is_shutting_down());
        tx.send(true).unwrap();
        assert!(ctx.is_shutting_down());
    }
}
