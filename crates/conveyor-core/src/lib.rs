//! conveyor-core
//!
//! Durable task queue and worker pool for long-running jobs
//! (image recognition, model training, ...).
//!
//! # Modules
//! - **domain**: Task, TaskStatus, Notification and their identifiers
//! - **ports**: abstractions over the shared backend (Store, Clock, IdGenerator)
//! - **impls**: Store adapters (InMemoryStore, RedisStore behind the `redis` feature)
//! - **queue**: type-partitioned FIFO + status records
//! - **notification**: outcome records + live broadcast
//! - **runtime**: handler contract and registry
//! - **worker**: the polling worker pool
//!
//! # Example
//! ```ignore
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let config = QueueConfig::default();
//! let queue = Arc::new(Queue::new(store.clone(), &config));
//! let notifications = Arc::new(NotificationService::new(store, &config));
//!
//! let mut pool = WorkerPool::new(queue.clone(), notifications, &config);
//! pool.register_handler("image_recognition", handler_fn(|_ctx, _task| async { Ok(()) }));
//! let running = pool.start(4)?;
//!
//! let id = queue.push(&TaskType::new("image_recognition"), &json!({"image_url": "x"})).await?;
//! // ...
//! running.stop().await;
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod notification;
pub mod ports;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use config::QueueConfig;
pub use domain::{
    Notification, NotificationId, NotificationKind, Task, TaskId, TaskStatus, TaskType,
};
pub use error::ConveyorError;
pub use impls::InMemoryStore;
#[cfg(feature = "redis")]
pub use impls::RedisStore;
pub use notification::{NotificationService, NotificationStream};
pub use ports::{Store, StoreError};
pub use queue::Queue;
pub use runtime::{HandlerError, HandlerRegistry, TaskContext, TaskHandler, handler_fn};
pub use worker::{RunningPool, WorkerEvent, WorkerPool};
