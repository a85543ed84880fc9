use thiserror::Error;

use queue_matching_cell::QueueMatchingError;

use crate::models::CallState;
use crate::services::media::MediaAcquireError;

#[derive(Debug, Error)]
pub enum CallSessionError {
    #[error("Signaling transport has no local address; cannot place or receive calls")]
    NotAddressable,

    #[error("Media permission denied")]
    PermissionDenied,

    #[error("No usable capture device: {0}")]
    DeviceUnavailable(String),

    #[error("Call dropped before it meaningfully started")]
    TransientDrop,

    #[error("Call did not connect within {0} seconds")]
    ConnectTimeout(u64),

    #[error("Operation not valid in call state {0:?}")]
    InvalidState(CallState),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueMatchingError),
}

impl From<MediaAcquireError> for CallSessionError {
    fn from(e: MediaAcquireError) -> Self {
        match e {
            MediaAcquireError::PermissionDenied => CallSessionError::PermissionDenied,
            other => CallSessionError::DeviceUnavailable(other.to_string()),
        }
    }
}
