use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueMatchingError {
    #[error("Concurrent update lost the race for facility {0}")]
    Conflict(Uuid),

    #[error("Patient {0} already holds an active queue entry")]
    AlreadyBooked(Uuid),

    #[error("Facility {0} is not accepting entries")]
    FacilityClosed(Uuid),

    #[error("Facility {facility_id} is already claimed by operator {operator_id}")]
    FacilityClaimed {
        facility_id: Uuid,
        operator_id: Uuid,
    },

    #[error("Facility counter not found: {0}")]
    FacilityNotFound(Uuid),

    #[error("Queue entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Consultation request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("No waiting entries for facility {0}")]
    QueueEmpty(Uuid),

    #[error("No waiting consultation requests")]
    NoWaitingRequests,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serving pointer cannot move from {from} to {to} (issued up to {issued})")]
    InvalidAdvance { from: i64, to: i64, issued: i64 },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
