//! Key namespace under the configured prefix `P`.
//!
//! - `P:{task_type}`            list of pending task records
//! - `P:status:{task_id}`       status string
//! - `P:notification:{task_id}` notification JSON
//! - `P:notification:channel`   broadcast channel

use crate::domain::{TaskId, TaskType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn queue(&self, task_type: &TaskType) -> String {
        format!("{}:{}", self.prefix, task_type)
    }

    pub fn status(&self, task_id: &TaskId) -> String {
        format!("{}:status:{}", self.prefix, task_id)
    }

    pub fn notification(&self, task_id: &TaskId) -> String {
        format!("{}:notification:{}", self.prefix, task_id)
    }

    pub fn notification_channel(&self) -> String {
        format!("{}:notification:channel", self.prefix)
    }
}
