use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::SharedStore;

use crate::error::QueueMatchingError;
use crate::models::{
    FacilityCounter, FacilityStatus, QueueEntryStatus, FACILITY_COUNTERS, QUEUE_ENTRIES,
};

const CAS_RETRY_LIMIT: usize = 5;

/// Owner of the per-facility counter invariant: exactly one monotonic
/// position counter and one serving pointer per facility.
///
/// Writers are serialized two ways: a per-facility mutex keeps this process
/// single-writer, and every store write is conditional on the version read
/// under that lock, so a writer in another process is detected as a conflict
/// rather than silently overwritten.
pub struct FacilityCounterService {
    store: Arc<dyn SharedStore>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl FacilityCounterService {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_counter(
        &self,
        facility_id: Uuid,
    ) -> Result<FacilityCounter, QueueMatchingError> {
        let rows = self
            .store
            .read(
                FACILITY_COUNTERS,
                &[("facility_id", facility_id.to_string())],
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(QueueMatchingError::FacilityNotFound(facility_id))?;

        Ok(serde_json::from_value(row)?)
    }

    /// Atomically issues the next position for a facility. Concurrent callers
    /// receive distinct, consecutive positions; a stale read never produces a
    /// duplicate because the write is conditional on the version it read.
    pub async fn issue_next_position(
        &self,
        facility_id: Uuid,
    ) -> Result<i64, QueueMatchingError> {
        let lock = self.facility_lock(facility_id).await;
        let _guard = lock.lock().await;

        for attempt in 0..CAS_RETRY_LIMIT {
            let counter = self.get_counter(facility_id).await?;

            if !counter.status.is_accepting_entries() {
                return Err(QueueMatchingError::FacilityClosed(facility_id));
            }

            let next = counter.total_issued + 1;
            let patch = json!({
                "total_issued": next,
                "version": counter.version + 1,
                "updated_at": Utc::now(),
            });

            if self.write_counter(facility_id, counter.version, patch).await? {
                debug!("Issued position {} for facility {}", next, facility_id);
                return Ok(next);
            }

            warn!(
                "Position issue for facility {} lost a race (attempt {})",
                facility_id,
                attempt + 1
            );
        }

        Err(QueueMatchingError::Conflict(facility_id))
    }

    /// Moves the serving pointer to `to_position` and marks the entry at that
    /// position Completed. Called exactly once per "call next" action: a
    /// duplicate submission sees a stale version and gets a conflict instead
    /// of advancing the pointer twice.
    pub async fn advance_serving(
        &self,
        facility_id: Uuid,
        to_position: i64,
    ) -> Result<(), QueueMatchingError> {
        let lock = self.facility_lock(facility_id).await;
        let _guard = lock.lock().await;

        let counter = self.get_counter(facility_id).await?;

        if to_position < counter.serving_pointer || to_position > counter.total_issued {
            return Err(QueueMatchingError::InvalidAdvance {
                from: counter.serving_pointer,
                to: to_position,
                issued: counter.total_issued,
            });
        }

        let patch = json!({
            "serving_pointer": to_position,
            "version": counter.version + 1,
            "updated_at": Utc::now(),
        });

        if !self.write_counter(facility_id, counter.version, patch).await? {
            return Err(QueueMatchingError::Conflict(facility_id));
        }

        // The entry at the new pointer has been called; close it out.
        let entry_patch = json!({
            "status": QueueEntryStatus::Completed,
            "updated_at": Utc::now(),
        });
        self.store
            .update(
                QUEUE_ENTRIES,
                &[
                    ("facility_id", facility_id.to_string()),
                    ("position", to_position.to_string()),
                    ("status", "waiting".to_string()),
                ],
                entry_patch,
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        info!(
            "Facility {} now serving position {}",
            facility_id, to_position
        );
        Ok(())
    }

    /// Leader-claim on the facility: opening fails when another operator
    /// already holds an open facility, otherwise the opener atomically
    /// becomes the holder. The counter row is created on first open.
    pub async fn open_facility(
        &self,
        facility_id: Uuid,
        operator_id: Uuid,
        average_service_minutes: Option<i64>,
    ) -> Result<FacilityCounter, QueueMatchingError> {
        let lock = self.facility_lock(facility_id).await;
        let _guard = lock.lock().await;

        let status = FacilityStatus::OpenClaimedBy { operator_id };

        let counter = match self.get_counter(facility_id).await {
            Ok(counter) => counter,
            Err(QueueMatchingError::FacilityNotFound(_)) => {
                let mut counter = FacilityCounter::new(facility_id, status);
                if let Some(avg) = average_service_minutes {
                    counter.average_service_minutes = avg;
                }
                let row = serde_json::to_value(&counter)?;
                self.store
                    .insert(FACILITY_COUNTERS, row)
                    .await
                    .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;
                info!("Operator {} opened new facility {}", operator_id, facility_id);
                return Ok(counter);
            }
            Err(e) => return Err(e),
        };

        if let Some(holder) = counter.status.operator() {
            if holder != operator_id && counter.status.is_accepting_entries() {
                return Err(QueueMatchingError::FacilityClaimed {
                    facility_id,
                    operator_id: holder,
                });
            }
        }

        let mut patch = json!({
            "status": status,
            "version": counter.version + 1,
            "updated_at": Utc::now(),
        });
        if let Some(avg) = average_service_minutes {
            patch["average_service_minutes"] = json!(avg);
        }

        if !self.write_counter(facility_id, counter.version, patch).await? {
            return Err(QueueMatchingError::Conflict(facility_id));
        }

        info!("Operator {} opened facility {}", operator_id, facility_id);
        self.get_counter(facility_id).await
    }

    /// Closes the facility and clears the claim. Only the holder may close.
    pub async fn close_facility(
        &self,
        facility_id: Uuid,
        operator_id: Uuid,
    ) -> Result<(), QueueMatchingError> {
        let lock = self.facility_lock(facility_id).await;
        let _guard = lock.lock().await;

        let counter = self.get_counter(facility_id).await?;

        match counter.status {
            FacilityStatus::Closed => return Ok(()),
            FacilityStatus::OpenClaimedBy { operator_id: holder } if holder != operator_id => {
                return Err(QueueMatchingError::FacilityClaimed {
                    facility_id,
                    operator_id: holder,
                });
            }
            _ => {}
        }

        let patch = json!({
            "status": FacilityStatus::Closed,
            "version": counter.version + 1,
            "updated_at": Utc::now(),
        });

        if !self.write_counter(facility_id, counter.version, patch).await? {
            return Err(QueueMatchingError::Conflict(facility_id));
        }

        info!("Operator {} closed facility {}", operator_id, facility_id);
        Ok(())
    }

    /// Confirms the operator currently holds the facility claim.
    pub async fn require_claim(
        &self,
        facility_id: Uuid,
        operator_id: Uuid,
    ) -> Result<FacilityCounter, QueueMatchingError> {
        let counter = self.get_counter(facility_id).await?;
        match counter.status.operator() {
            Some(holder) if holder == operator_id => Ok(counter),
            Some(holder) => Err(QueueMatchingError::FacilityClaimed {
                facility_id,
                operator_id: holder,
            }),
            None => Err(QueueMatchingError::FacilityClosed(facility_id)),
        }
    }

    async fn write_counter(
        &self,
        facility_id: Uuid,
        expected_version: i64,
        patch: serde_json::Value,
    ) -> Result<bool, QueueMatchingError> {
        self.store
            .update_if(
                FACILITY_COUNTERS,
                &[("facility_id", facility_id.to_string())],
                expected_version,
                patch,
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))
    }

    async fn facility_lock(&self, facility_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(facility_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
