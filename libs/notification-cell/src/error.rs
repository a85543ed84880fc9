use thiserror::Error;
use uuid::Uuid;

use queue_matching_cell::QueueMatchingError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Watch not found: {0}")]
    WatchNotFound(Uuid),

    #[error("Watch already registered: {0}")]
    WatchAlreadyRegistered(Uuid),

    #[error("Queue lookup failed: {0}")]
    Queue(#[from] QueueMatchingError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
