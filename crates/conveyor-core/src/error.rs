use thiserror::Error;

use crate::ports::StoreError;

/// Errors surfaced by queue and notification operations.
///
/// "Not found" is never an error here: empty queues and missing or expired
/// records come back as `Ok(None)`.
#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    TransientStore(#[from] StoreError),

    #[error("invalid task status: {0:?}")]
    InvalidStatus(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ConveyorError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConveyorError::TransientStore(_))
    }
}
