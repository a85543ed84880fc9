use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::MediaKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaAcquireError {
    #[error("Capture device is busy")]
    DeviceBusy,

    #[error("No capture device found")]
    DeviceNotFound,

    #[error("Requested capture constraints cannot be satisfied")]
    ConstraintUnsatisfied,

    #[error("Capture permission denied")]
    PermissionDenied,
}

impl MediaAcquireError {
    /// Whether a downgraded request (audio only) is worth trying. A denied
    /// permission stays denied no matter what is requested.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MediaAcquireError::PermissionDenied)
    }
}

/// An acquired capture stream. Held by exactly one owner; releasing it
/// returns the device to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    pub id: Uuid,
    pub kind: MediaKind,
}

/// Platform capture surface (camera and microphone).
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<CaptureHandle, MediaAcquireError>;

    async fn release(&self, handle: CaptureHandle);
}

/// Owns at most one capture handle and runs the ordered acquisition
/// fallback. Every acquisition releases the currently held stream first, so
/// a failed upgrade or a re-dial can never leak a device handle.
pub struct MediaAcquisitionService {
    devices: Box<dyn CaptureDevices>,
    held: Option<CaptureHandle>,
}

impl MediaAcquisitionService {
    pub fn new(devices: Box<dyn CaptureDevices>) -> Self {
        Self {
            devices,
            held: None,
        }
    }

    /// Acquires local media for a call: audio+video preferred, audio-only
    /// when the camera is busy, missing, or over-constrained. Permission
    /// denial is terminal and is never downgraded around.
    pub async fn acquire_for_call(&mut self) -> Result<CaptureHandle, MediaAcquireError> {
        self.release_held().await;

        match self.devices.acquire(MediaKind::AudioVideo).await {
            Ok(handle) => {
                info!("Acquired audio+video capture {}", handle.id);
                self.held = Some(handle.clone());
                Ok(handle)
            }
            Err(e) if e.is_retryable() => {
                warn!("Audio+video capture failed ({}), retrying audio-only", e);
                let handle = self.devices.acquire(MediaKind::AudioOnly).await?;
                info!("Acquired audio-only capture {}", handle.id);
                self.held = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn release_held(&mut self) {
        if let Some(handle) = self.held.take() {
            info!("Releasing capture {}", handle.id);
            self.devices.release(handle).await;
        }
    }

    pub fn held_kind(&self) -> MediaKind {
        self.held
            .as_ref()
            .map(|handle| handle.kind)
            .unwrap_or(MediaKind::None)
    }

    pub fn has_handle(&self) -> bool {
        self.held.is_some()
    }
}

/// Built-in devices that always succeed. Local runs and tests use this; a
/// deployment backs the trait with the platform capture stack.
#[derive(Default)]
pub struct LoopbackCaptureDevices;

#[async_trait]
impl CaptureDevices for LoopbackCaptureDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<CaptureHandle, MediaAcquireError> {
        Ok(CaptureHandle {
            id: Uuid::new_v4(),
            kind,
        })
    }

    async fn release(&self, _handle: CaptureHandle) {}
}
