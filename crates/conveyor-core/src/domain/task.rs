use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TaskId, TaskStatus};
use crate::error::ConveyorError;

/// Task category routing a task to its registered handler
/// (`image_recognition`, `model_training`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A unit of asynchronous work as stored in its type's list.
///
/// `status` is the status at push time (always `pending`); the live status
/// is tracked in a separate record, see [`crate::Queue::get_task_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Encoded payload, opaque to the queue.
    pub data: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Decode the payload into the handler's own type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ConveyorError> {
        Ok(T::deserialize(&self.data)?)
    }
}
