use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const FACILITY_COUNTERS: &str = "facility_counters";
pub const QUEUE_ENTRIES: &str = "queue_entries";
pub const CONSULTATION_REQUESTS: &str = "consultation_requests";

pub const DEFAULT_AVERAGE_SERVICE_MINUTES: i64 = 10;

/// Open/claim state of a facility. A single tagged variant so "open with no
/// claim information" and "claimed but closed" cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FacilityStatus {
    Closed,
    OpenUnclaimed,
    OpenClaimedBy { operator_id: Uuid },
}

impl FacilityStatus {
    pub fn is_accepting_entries(&self) -> bool {
        !matches!(self, FacilityStatus::Closed)
    }

    pub fn operator(&self) -> Option<Uuid> {
        match self {
            FacilityStatus::OpenClaimedBy { operator_id } => Some(*operator_id),
            _ => None,
        }
    }
}

/// One counter row per facility. Invariant: `serving_pointer <= total_issued`,
/// `total_issued` grows only through the atomic issue operation, and every
/// write bumps `version` so concurrent writers are detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityCounter {
    pub facility_id: Uuid,
    pub serving_pointer: i64,
    pub total_issued: i64,
    pub status: FacilityStatus,
    pub average_service_minutes: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl FacilityCounter {
    pub fn new(facility_id: Uuid, status: FacilityStatus) -> Self {
        Self {
            facility_id,
            serving_pointer: 0,
            total_issued: 0,
            status,
            average_service_minutes: DEFAULT_AVERAGE_SERVICE_MINUTES,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Waiting,
    Called,
    Completed,
    Cancelled,
}

impl QueueEntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEntryStatus::Completed | QueueEntryStatus::Cancelled)
    }

    /// Entries are append-only history once terminal.
    pub fn can_transition_to(&self, target: &QueueEntryStatus) -> bool {
        use QueueEntryStatus::*;
        match (self, target) {
            (Waiting, Called) => true,
            (Waiting, Completed) => true,
            (Called, Completed) => true,
            (_, Cancelled) => !self.is_terminal(),
            _ => false,
        }
    }
}

/// One entry per (patient, facility, active visit). The position is fixed at
/// creation; people-ahead is always derived against the serving pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub position: i64,
    pub status: QueueEntryStatus,
    pub cancel_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(patient_id: Uuid, facility_id: Uuid, position: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            facility_id,
            position,
            status: QueueEntryStatus::Waiting,
            cancel_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl ConsultationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsultationStatus::Completed | ConsultationStatus::Cancelled)
    }

    pub fn can_transition_to(&self, target: &ConsultationStatus) -> bool {
        use ConsultationStatus::*;
        match (self, target) {
            (Waiting, InProgress) => true,
            // Short-drop recovery releases an in-progress request back to
            // the queue with its original creation time (rank preserved).
            (InProgress, Waiting) => true,
            (InProgress, Completed) => true,
            (_, Cancelled) => !self.is_terminal(),
            _ => false,
        }
    }
}

/// On-demand matching request. There is no counter for the virtual queue:
/// the Waiting requests ordered by `created_at` ascending ARE the queue, and
/// position is the 1-based rank in that list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub assigned_operator_id: Option<Uuid>,
    /// Opaque address used to reach the requester for call negotiation.
    pub session_endpoint_token: String,
    pub status: ConsultationStatus,
    pub cancel_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsultationRequest {
    pub fn new(requester_id: Uuid, session_endpoint_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id,
            assigned_operator_id: None,
            session_endpoint_token,
            status: ConsultationStatus::Waiting,
            cancel_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// People ahead of an entry. Never negative, even when the serving pointer
/// has already passed the entry's position.
pub fn people_ahead(position: i64, serving_pointer: i64) -> i64 {
    (position - serving_pointer).max(0)
}

/// Estimated wait rounded up to the nearest 5-minute increment.
pub fn estimated_wait_minutes(people_ahead: i64, average_service_minutes: i64) -> i64 {
    if people_ahead <= 0 {
        return 0;
    }
    let raw = people_ahead * average_service_minutes.max(0);
    ((raw + 4) / 5) * 5
}

// ==============================================================================
// API REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct RequestEntryPayload {
    pub facility_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelPayload {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenFacilityPayload {
    pub average_service_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStatusResponse {
    pub entry: QueueEntry,
    pub people_ahead: i64,
    pub estimated_wait_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct SubmitConsultationPayload {
    pub session_endpoint_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsultationPositionResponse {
    pub request: ConsultationRequest,
    pub people_ahead: i64,
}
