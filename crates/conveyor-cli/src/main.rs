use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use clap::builder::RangedU64ValueParser;
use serde::Deserialize;
use serde_json::json;

use conveyor_core::{
    HandlerError, InMemoryStore, NotificationService, Queue, QueueConfig, Store, Task, TaskContext,
    TaskHandler, TaskId, TaskType, WorkerPool,
};

const IMAGE_RECOGNITION: &str = "image_recognition";
const MODEL_TRAINING: &str = "model_training";

const REDIS_URL_ENV: &str = "CONVEYOR_REDIS_URL";

const MAX_CONCURRENCY: u64 = 1024;
const MAX_TASKS_PER_TYPE: u64 = 10_000;

#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(about = "Push sample tasks, work them with a pool and stream the outcomes")]
struct Args {
    /// Number of worker loops
    #[arg(
        long,
        default_value = "4",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_CONCURRENCY)
    )]
    concurrency: usize,

    /// Tasks pushed per task type
    #[arg(
        long,
        default_value = "3",
        value_parser = RangedU64ValueParser::<usize>::new().range(0..=MAX_TASKS_PER_TYPE)
    )]
    tasks: usize,

    /// Redis URL (falls back to CONVEYOR_REDIS_URL). In-memory store when unset
    #[arg(long)]
    redis_url: Option<String>,

    /// Key prefix, overrides CONVEYOR_PREFIX
    #[arg(long)]
    prefix: Option<String>,

    /// Stop waiting for outcomes after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ImageRecognitionPayload {
    image_url: String,
    model_id: String,
}

struct ImageRecognitionHandler {
    latency: Duration,
}

#[async_trait]
impl TaskHandler for ImageRecognitionHandler {
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError> {
        let payload: ImageRecognitionPayload = task.decode()?;
        if payload.image_url.is_empty() {
            return Err("image_url is empty".into());
        }

        tracing::info!(
            worker_id = ctx.worker_id(),
            task_id = %task.id,
            image_url = %payload.image_url,
            model_id = %payload.model_id,
            "recognizing image"
        );
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ModelTrainingPayload {
    dataset_id: String,
    model_id: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
}

struct ModelTrainingHandler {
    epoch_time: Duration,
}

#[async_trait]
impl TaskHandler for ModelTrainingHandler {
    async fn handle(&self, ctx: &TaskContext, task: &Task) -> Result<(), HandlerError> {
        let payload: ModelTrainingPayload = task.decode()?;
        if payload.dataset_id.is_empty() {
            return Err("dataset_id is empty".into());
        }
        let epochs = payload
            .params
            .get("epochs")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);

        for epoch in 1..=epochs {
            if ctx.is_shutting_down() {
                return Err(format!("training interrupted at epoch {epoch}/{epochs}").into());
            }
            tokio::time::sleep(self.epoch_time).await;
            tracing::debug!(
                task_id = %task.id,
                model_id = %payload.model_id,
                epoch,
                epochs,
                "epoch done"
            );
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let mut config = QueueConfig::from_env().context("invalid CONVEYOR_* environment")?;
    if let Some(prefix) = args.prefix {
        config = config.with_prefix(prefix);
    }
    config.validate()?;

    let redis_url = args.redis_url.or_else(|| std::env::var(REDIS_URL_ENV).ok());
    let store = open_store(redis_url).await?;
    let queue = Arc::new(Queue::new(store.clone(), &config));
    let notifications = Arc::new(NotificationService::new(store, &config));

    let mut stream = notifications.subscribe().await?;
    let printer = tokio::spawn(async move {
        while let Some(n) = stream.next().await {
            tracing::info!(
                task_id = %n.task_id,
                kind = %n.kind,
                message = %n.message,
                "notification"
            );
        }
    });

    let mut pool = WorkerPool::new(queue.clone(), notifications.clone(), &config);
    pool.register_handler(
        IMAGE_RECOGNITION,
        ImageRecognitionHandler {
            latency: Duration::from_millis(150),
        },
    )
    .register_handler(
        MODEL_TRAINING,
        ModelTrainingHandler {
            epoch_time: Duration::from_millis(100),
        },
    );
    let running = pool.start(args.concurrency)?;

    let pushed = push_sample_tasks(&queue, args.tasks).await?;
    tracing::info!(count = pushed.len(), "tasks pushed");

    let deadline = Duration::from_secs(args.timeout_secs);
    tokio::select! {
        res = tokio::time::timeout(deadline, wait_for_outcomes(&queue, &pushed)) => {
            match res {
                Ok(Ok(())) => tracing::info!("every task reached a terminal state"),
                Ok(Err(e)) => tracing::error!(error = %e, "status polling failed"),
                Err(_) => {
                    tracing::warn!(timeout_secs = args.timeout_secs, "gave up waiting for outcomes")
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    running.stop().await;
    printer.abort();

    for id in &pushed {
        let status = queue.get_task_status(id).await?;
        let message = notifications
            .get_notification(id)
            .await?
            .map(|n| n.message)
            .unwrap_or_default();
        let status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
        println!("{id}\t{status}\t{message}");
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

async fn open_store(redis_url: Option<String>) -> anyhow::Result<Arc<dyn Store>> {
    match redis_url {
        None => {
            tracing::info!("using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = conveyor_core::RedisStore::connect(&url)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!(
            "a redis url was given but conveyor-cli was built without the `redis` feature"
        ),
    }
}

/// `per_type` tasks of each sample type, plus one image task that is bound to fail.
async fn push_sample_tasks(queue: &Queue, per_type: usize) -> anyhow::Result<Vec<TaskId>> {
    let images = TaskType::new(IMAGE_RECOGNITION);
    let training = TaskType::new(MODEL_TRAINING);
    let mut ids = Vec::with_capacity(per_type.saturating_mul(2).saturating_add(1));

    for i in 0..per_type {
        let image_url = format!("https://images.example.com/{i}.jpg");
        let id = queue
            .push(&images, &json!({ "image_url": image_url, "model_id": "resnet50" }))
            .await?;
        ids.push(id);

        let id = queue
            .push(
                &training,
                &json!({
                    "dataset_id": format!("dataset-{i}"),
                    "model_id": "resnet50",
                    "params": { "epochs": 3, "learning_rate": 0.001 },
                }),
            )
            .await?;
        ids.push(id);
    }

    let id = queue
        .push(&images, &json!({ "image_url": "", "model_id": "resnet50" }))
        .await?;
    ids.push(id);

    Ok(ids)
}

async fn wait_for_outcomes(queue: &Queue, ids: &[TaskId]) -> anyhow::Result<()> {
    loop {
        let mut done = 0;
        for id in ids {
            if queue.get_task_status(id).await?.is_some_and(|s| s.is_terminal()) {
                done += 1;
            }
        }
        if done == ids.len() {
            return Ok(());
        }
        tracing::debug!(done, total = ids.len(), "waiting for outcomes");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
