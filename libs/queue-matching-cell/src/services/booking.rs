use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use shared_database::SharedStore;

use crate::error::QueueMatchingError;
use crate::models::{
    estimated_wait_minutes, people_ahead, EntryStatusResponse, QueueEntry, QueueEntryStatus,
    QUEUE_ENTRIES,
};
use crate::services::counter::FacilityCounterService;

/// Facility waiting-list bookings: entry creation, cancellation, derived
/// position, and the operator's call-next action.
pub struct BookingService {
    store: Arc<dyn SharedStore>,
    counter: Arc<FacilityCounterService>,
}

impl BookingService {
    pub fn new(store: Arc<dyn SharedStore>, counter: Arc<FacilityCounterService>) -> Self {
        Self { store, counter }
    }

    /// Creates a Waiting entry for the patient at the facility. A patient may
    /// hold at most one active entry anywhere; a second request is rejected.
    pub async fn request_entry(
        &self,
        patient_id: Uuid,
        facility_id: Uuid,
    ) -> Result<EntryStatusResponse, QueueMatchingError> {
        // Read-then-insert: each patient's client holds one request in
        // flight at a time, so this check is not raced by the same patient.
        let existing = self
            .store
            .read(
                QUEUE_ENTRIES,
                &[
                    ("patient_id", patient_id.to_string()),
                    ("status", "waiting".to_string()),
                ],
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        if !existing.is_empty() {
            return Err(QueueMatchingError::AlreadyBooked(patient_id));
        }

        let position = self.counter.issue_next_position(facility_id).await?;
        let entry = QueueEntry::new(patient_id, facility_id, position);
        let row = serde_json::to_value(&entry)?;

        if let Err(e) = self.store.insert(QUEUE_ENTRIES, row).await {
            // The position is already issued and the counter never moves
            // backwards. Record a cancelled placeholder so the position is
            // accounted for rather than silently skipped.
            let mut placeholder = entry.clone();
            placeholder.status = QueueEntryStatus::Cancelled;
            placeholder.cancel_reason = Some("entry insert failed".to_string());
            placeholder.updated_at = Utc::now();
            if let Ok(row) = serde_json::to_value(&placeholder) {
                if let Err(e) = self.store.insert(QUEUE_ENTRIES, row).await {
                    warn!(
                        "Could not record placeholder for issued position {}: {}",
                        position, e
                    );
                }
            }
            return Err(QueueMatchingError::DatabaseError(e.to_string()));
        }

        info!(
            "Patient {} entered facility {} queue at position {}",
            patient_id, facility_id, position
        );

        let counter = self.counter.get_counter(facility_id).await?;
        let ahead = people_ahead(entry.position, counter.serving_pointer);
        Ok(EntryStatusResponse {
            entry,
            people_ahead: ahead,
            estimated_wait_minutes: estimated_wait_minutes(ahead, counter.average_service_minutes),
        })
    }

    /// Cancels a Waiting entry, keeping the reason with the record. The
    /// reputation penalty for late cancellations is applied outside the core.
    pub async fn cancel_entry(
        &self,
        entry_id: Uuid,
        reason: &str,
    ) -> Result<QueueEntry, QueueMatchingError> {
        let entry = self.get_entry(entry_id).await?;

        if !entry
            .status
            .can_transition_to(&QueueEntryStatus::Cancelled)
        {
            return Err(QueueMatchingError::InvalidTransition {
                from: format!("{:?}", entry.status),
                to: "Cancelled".to_string(),
            });
        }

        let patch = json!({
            "status": QueueEntryStatus::Cancelled,
            "cancel_reason": reason,
            "version": entry.version + 1,
            "updated_at": Utc::now(),
        });

        let applied = self
            .store
            .update_if(
                QUEUE_ENTRIES,
                &[("id", entry_id.to_string())],
                entry.version,
                patch,
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        if !applied {
            return Err(QueueMatchingError::Conflict(entry.facility_id));
        }

        info!("Entry {} cancelled: {}", entry_id, reason);
        self.get_entry(entry_id).await
    }

    /// Entry plus its derived position and wait estimate.
    pub async fn entry_status(
        &self,
        entry_id: Uuid,
    ) -> Result<EntryStatusResponse, QueueMatchingError> {
        let entry = self.get_entry(entry_id).await?;
        let counter = self.counter.get_counter(entry.facility_id).await?;

        let ahead = match entry.status {
            QueueEntryStatus::Waiting | QueueEntryStatus::Called => {
                people_ahead(entry.position, counter.serving_pointer)
            }
            _ => 0,
        };

        Ok(EntryStatusResponse {
            estimated_wait_minutes: estimated_wait_minutes(ahead, counter.average_service_minutes),
            people_ahead: ahead,
            entry,
        })
    }

    pub async fn list_waiting(
        &self,
        facility_id: Uuid,
    ) -> Result<Vec<QueueEntry>, QueueMatchingError> {
        let rows = self
            .store
            .read(
                QUEUE_ENTRIES,
                &[
                    ("facility_id", facility_id.to_string()),
                    ("status", "waiting".to_string()),
                ],
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        let mut entries = rows
            .into_iter()
            .map(serde_json::from_value::<QueueEntry>)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.position);
        Ok(entries)
    }

    /// Calls the head-of-line entry: the lowest-position Waiting entry.
    /// Cancelled entries between the pointer and the head are skipped;
    /// positions are never renumbered. The operator must hold the facility
    /// claim, and the advance is conditional so a duplicate submission
    /// cannot move the pointer twice.
    pub async fn call_next(
        &self,
        facility_id: Uuid,
        operator_id: Uuid,
    ) -> Result<QueueEntry, QueueMatchingError> {
        self.counter.require_claim(facility_id, operator_id).await?;

        let waiting = self.list_waiting(facility_id).await?;
        let head = waiting
            .into_iter()
            .next()
            .ok_or(QueueMatchingError::QueueEmpty(facility_id))?;

        self.counter
            .advance_serving(facility_id, head.position)
            .await?;

        self.get_entry(head.id).await
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<QueueEntry, QueueMatchingError> {
        let rows = self
            .store
            .read(QUEUE_ENTRIES, &[("id", entry_id.to_string())])
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(QueueMatchingError::EntryNotFound(entry_id))?;
        Ok(serde_json::from_value(row)?)
    }
}
