//! WorkerPool - fixed-size set of pollers draining every registered task type.
//!
//! Lifecycle:
//! 1. `WorkerPool::new` + `register_handler` (registry is mutable here)
//! 2. `start(n)` consumes the pool, freezes the registry and spawns `n` loops
//! 3. `RunningPool::stop` signals shutdown and waits for every loop
//!
//! Per task: pop -> `processing` -> handler -> `completed` / `failed` ->
//! notification. Every failure on that path is logged, reported as a
//! [`WorkerEvent`], and the loop carries on.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::config::QueueConfig;
use crate::domain::{NotificationKind, Task, TaskId, TaskStatus, TaskType};
use crate::error::ConveyorError;
use crate::notification::NotificationService;
use crate::queue::Queue;
use crate::runtime::{HandlerError, HandlerRegistry, TaskContext, TaskHandler};

const EVENT_CAPACITY: usize = 1024;

const COMPLETED_MESSAGE: &str = "task completed successfully";

/// Observable outcome of each step a worker takes.
///
/// Delivered on a broadcast channel; nobody has to listen, and a slow
/// listener only loses old events.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    TaskCompleted {
        worker_id: usize,
        task_id: TaskId,
        task_type: TaskType,
    },
    TaskFailed {
        worker_id: usize,
        task_id: TaskId,
        task_type: TaskType,
        error: String,
    },
    PopFailed {
        worker_id: usize,
        task_type: TaskType,
        error: String,
    },
    StatusUpdateFailed {
        worker_id: usize,
        task_id: TaskId,
        status: TaskStatus,
        error: String,
    },
    NotificationFailed {
        worker_id: usize,
        task_id: TaskId,
        error: String,
    },
}

/// Pool under construction. Register handlers, then [`WorkerPool::start`].
pub struct WorkerPool {
    queue: Arc<Queue>,
    notifications: Arc<NotificationService>,
    registry: HandlerRegistry,
    idle_interval: Duration,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<Queue>,
        notifications: Arc<NotificationService>,
        config: &QueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            notifications,
            registry: HandlerRegistry::new(),
            idle_interval: config.idle_interval,
            events,
        }
    }

    /// Associate `handler` with `task_type`. Registering the same type twice
    /// replaces the earlier handler.
    pub fn register_handler<H>(&mut self, task_type: impl Into<TaskType>, handler: H) -> &mut Self
    where
        H: TaskHandler + 'static,
    {
        let task_type = task_type.into();
        if self
            .registry
            .register(task_type.clone(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!(task_type = %task_type, "handler replaced");
        }
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Subscribe to worker events. Call before `start` to see everything.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Spawn `concurrency` worker loops.
    pub fn start(self, concurrency: usize) -> Result<RunningPool, ConveyorError> {
        if concurrency == 0 {
            return Err(ConveyorError::InvalidConfig("concurrency must be > 0".into()));
        }
        if self.registry.is_empty() {
            tracing::warn!("worker pool started without handlers, nothing will be drained");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            task_types: self.registry.task_types(),
            queue: self.queue,
            notifications: self.notifications,
            registry: self.registry,
            idle_interval: self.idle_interval,
            events: self.events.clone(),
        });

        tracing::info!(
            concurrency,
            task_types = ?shared.task_types,
            idle_interval_ms = shared.idle_interval.as_millis() as u64,
            "worker pool started"
        );

        let joins = (0..concurrency)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { shared.run(worker_id, rx).await })
            })
            .collect();

        Ok(RunningPool {
            shutdown_tx,
            joins,
            events: self.events,
        })
    }
}

/// Handle to started workers.
///
/// Dropping it without calling [`RunningPool::stop`] also stops the workers
/// (at their next check), but nothing waits for them.
pub struct RunningPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl RunningPool {
    pub fn concurrency(&self) -> usize {
        self.joins.len()
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Ask every worker to stop after its current task. Does not wait.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for all workers.
    ///
    /// In-flight handlers are not interrupted, so this returns only after each
    /// worker has finished the task it was running.
    pub async fn stop(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker terminated abnormally");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

/// State shared by every worker loop. Read-only once built.
struct Shared {
    queue: Arc<Queue>,
    notifications: Arc<NotificationService>,
    registry: HandlerRegistry,
    task_types: Vec<TaskType>,
    idle_interval: Duration,
    events: broadcast::Sender<WorkerEvent>,
}

impl Shared {
    async fn run(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::debug!(worker_id, "worker started");

        'sweep: loop {
            if shutdown_requested(&shutdown_rx) {
                break;
            }

            let mut found_work = false;
            for task_type in &self.task_types {
                // task 単位でも shutdown を確認する（handler の途中では止めない）
                if shutdown_requested(&shutdown_rx) {
                    break 'sweep;
                }
                let Some(handler) = self.registry.get(task_type) else {
                    continue;
                };

                match self.queue.pop(task_type).await {
                    Ok(Some(task)) => {
                        found_work = true;
                        self.process(worker_id, Arc::clone(handler), task, &shutdown_rx)
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(worker_id, task_type = %task_type, error = %e, "pop failed");
                        self.emit(WorkerEvent::PopFailed {
                            worker_id,
                            task_type: task_type.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            if !found_work {
                // 空振りしたら少し待つ。shutdown が来たらすぐ起きる
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break 'sweep;
                        }
                    }
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
            }
        }

        tracing::debug!(worker_id, "worker stopped");
    }

    async fn process(
        &self,
        worker_id: usize,
        handler: Arc<dyn TaskHandler>,
        task: Task,
        shutdown_rx: &watch::Receiver<bool>,
    ) {
        let task_id = task.id.clone();
        let task_type = task.task_type.clone();
        tracing::debug!(worker_id, task_id = %task_id, task_type = %task_type, "task picked up");

        self.set_status(worker_id, &task_id, TaskStatus::Processing).await;

        // Run on its own tokio task so a panicking handler surfaces as a
        // JoinError instead of taking the worker loop down with it.
        let ctx = TaskContext::new(worker_id, shutdown_rx.clone());
        let result = tokio::spawn(async move { handler.handle(&ctx, &task).await })
            .await
            .unwrap_or_else(|e| Err(join_error_to_handler_error(e)));

        match result {
            Ok(()) => {
                tracing::info!(
                    worker_id,
                    task_id = %task_id,
                    task_type = %task_type,
                    "task completed"
                );
                self.set_status(worker_id, &task_id, TaskStatus::Completed).await;
                self.notify(worker_id, &task_id, NotificationKind::TaskComplete, COMPLETED_MESSAGE)
                    .await;
                self.emit(WorkerEvent::TaskCompleted {
                    worker_id,
                    task_id,
                    task_type,
                });
            }
            Err(err) => {
                tracing::warn!(
                    worker_id,
                    task_id = %task_id,
                    task_type = %task_type,
                    error = %err,
                    "task failed"
                );
                self.set_status(worker_id, &task_id, TaskStatus::Failed).await;
                self.notify(
                    worker_id,
                    &task_id,
                    NotificationKind::TaskFailed,
                    format!("task failed: {err}"),
                )
                .await;
                self.emit(WorkerEvent::TaskFailed {
                    worker_id,
                    task_id,
                    task_type,
                    error: err.to_string(),
                });
            }
        }
    }

    async fn set_status(&self, worker_id: usize, task_id: &TaskId, status: TaskStatus) {
        if let Err(e) = self.queue.update_task_status(task_id, status).await {
            tracing::warn!(
                worker_id,
                task_id = %task_id,
                status = %status,
                error = %e,
                "status update failed"
            );
            self.emit(WorkerEvent::StatusUpdateFailed {
                worker_id,
                task_id: task_id.clone(),
                status,
                error: e.to_string(),
            });
        }
    }

    async fn notify(
        &self,
        worker_id: usize,
        task_id: &TaskId,
        kind: NotificationKind,
        message: impl Into<String>,
    ) {
        if let Err(e) = self.notifications.send_notification(task_id, kind, message).await {
            tracing::warn!(worker_id, task_id = %task_id, error = %e, "send notification failed");
            self.emit(WorkerEvent::NotificationFailed {
                worker_id,
                task_id: task_id.clone(),
                error: e.to_string(),
            });
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // Err only means nobody is listening
        let _ = self.events.send(event);
    }
}

/// Shutdown was requested, or the pool handle is gone.
fn shutdown_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

fn join_error_to_handler_error(err: JoinError) -> HandlerError {
    if err.is_panic() {
        HandlerError::new(format!("handler panicked: {}", panic_message(err.into_panic())))
    } else {
        HandlerError::new(format!("handler aborted: {err}"))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::runtime::handler_fn;

    fn parts() -> (Arc<Queue>, Arc<NotificationService>, QueueConfig) {
        let store = Arc::new(InMemoryStore::new());
        let config = QueueConfig::default().with_idle_interval(Duration::from_millis(10));
        let queue = Arc::new(Queue::new(store.clone(), &config));
        let notifications = Arc::new(NotificationService::new(store, &config));
        (queue, notifications, config)
    }

    #[tokio::test]
    async fn start_rejects_zero_concurrency() {
        let (queue, notifications, config) = parts();
        let pool = WorkerPool::new(queue, notifications, &config);
        assert!(matches!(pool.start(0), Err(ConveyorError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn register_handler_is_last_wins() {
        let (queue, notifications, config) = parts();
        let mut pool = WorkerPool::new(queue, notifications, &config);
        pool.register_handler("image_recognition", handler_fn(|_, _| async { Ok(()) }))
            .register_handler("image_recognition", handler_fn(|_, _| async { Ok(()) }))
            .register_handler("model_training", handler_fn(|_, _| async { Ok(()) }));
        assert_eq!(pool.registry().len(), 2);
    }

    #[tokio::test]
    async fn stop_returns_promptly_when_idle() {
        let (queue, notifications, config) = parts();
        let config = config.with_idle_interval(Duration::from_secs(30));
        let mut pool = WorkerPool::new(queue, notifications, &config);
        pool.register_handler("image_recognition", handler_fn(|_, _| async { Ok(()) }));
        let running = pool.start(3).unwrap();
        assert_eq!(running.concurrency(), 3);

        // workers are parked in a 30s idle sleep; shutdown must wake them
        tokio::time::timeout(Duration::from_secs(2), running.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unregistered_types_are_never_drained() {
        let (queue, notifications, config) = parts();
        let orphan = TaskType::new("data_analysis");
        queue.push(&orphan, &serde_json::json!({})).await.unwrap();

        let mut pool = WorkerPool::new(queue.clone(), notifications, &config);
        pool.register_handler("image_recognition", handler_fn(|_, _| async { Ok(()) }));
        let running = pool.start(2).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        running.stop().await;

        assert_eq!(queue.pending_count(&orphan).await.unwrap(), 1);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        assert_eq!(panic_message(Box::new("static str")), "static str");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u32)), "unknown panic payload");
    }
}
