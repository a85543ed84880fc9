use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    Caller,
    Callee,
}

/// Lifecycle of one call, as seen by one actor. Waiting is the pre-call
/// queue phase; Summary is the post-call wrap-up screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Waiting,
    Connecting,
    Connected,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    AudioVideo,
    AudioOnly,
    None,
}

/// Why a call ended. Distinguishes a deliberate hang-up from losses the
/// party did not ask for; a short unintentional drop is treated as
/// transient rather than as a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEndReason {
    LocalHangup,
    RemoteClosed,
    NegotiationFailed,
    ConnectTimeout,
}

impl CallEndReason {
    pub fn is_intentional(&self) -> bool {
        matches!(self, CallEndReason::LocalHangup)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub role: CallRole,
    pub state: CallState,
    pub consultation_request_id: Option<Uuid>,
    pub local_media: MediaKind,
    pub remote_media: MediaKind,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn idle(role: CallRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: CallState::Idle,
            consultation_request_id: None,
            local_media: MediaKind::None,
            remote_media: MediaKind::None,
            microphone_enabled: true,
            camera_enabled: true,
            started_at: None,
            connected_at: None,
        }
    }

    /// Time spent connected. Zero when the call never reached Connected.
    pub fn connected_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.connected_at {
            Some(connected_at) => now - connected_at,
            None => Duration::zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    pub session_id: Uuid,
    pub role: CallRole,
    pub reason: CallEndReason,
    pub consultation_request_id: Option<Uuid>,
    pub connected_seconds: i64,
    pub ended_at: DateTime<Utc>,
}

/// What a teardown decided: a real end-of-call with its summary, or a drop
/// short enough to retry without ending the consultation.
#[derive(Debug, Clone)]
pub enum TeardownOutcome {
    Summary(CallSummary),
    TransientDrop,
}
