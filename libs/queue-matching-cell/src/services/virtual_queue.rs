use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::SharedStore;

use crate::error::QueueMatchingError;
use crate::models::{
    ConsultationPositionResponse, ConsultationRequest, ConsultationStatus, CONSULTATION_REQUESTS,
};

const CLAIM_RETRY_LIMIT: usize = 3;

/// On-demand matching queue. Position is computed as 1-based rank over the
/// Waiting requests ordered by creation time; there is no counter to keep
/// consistent, so the only contended write is the head-of-line claim.
pub struct ConsultationQueueService {
    store: Arc<dyn SharedStore>,
}

impl ConsultationQueueService {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Submits a new request for the requester. A prior Waiting request from
    /// the same requester is cancelled first, so at most one is ever active.
    pub async fn submit_request(
        &self,
        requester_id: Uuid,
        session_endpoint_token: String,
    ) -> Result<ConsultationRequest, QueueMatchingError> {
        let prior = self
            .store
            .read(
                CONSULTATION_REQUESTS,
                &[
                    ("requester_id", requester_id.to_string()),
                    ("status", "waiting".to_string()),
                ],
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        for row in prior {
            let request: ConsultationRequest = serde_json::from_value(row)?;
            self.cancel(request.id, "superseded by a new request").await?;
        }

        let request = ConsultationRequest::new(requester_id, session_endpoint_token);
        let row = serde_json::to_value(&request)?;
        self.store
            .insert(CONSULTATION_REQUESTS, row)
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        info!(
            "Consultation request {} submitted by {}",
            request.id, requester_id
        );
        Ok(request)
    }

    pub async fn list_waiting(&self) -> Result<Vec<ConsultationRequest>, QueueMatchingError> {
        let rows = self
            .store
            .read(CONSULTATION_REQUESTS, &[("status", "waiting".to_string())])
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        let mut requests = rows
            .into_iter()
            .map(serde_json::from_value::<ConsultationRequest>)
            .collect::<Result<Vec<_>, _>>()?;
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    /// Rank of the request among Waiting requests; people-ahead is rank - 1.
    /// A request that is no longer waiting has nobody ahead of it.
    pub async fn position_of(
        &self,
        request_id: Uuid,
    ) -> Result<ConsultationPositionResponse, QueueMatchingError> {
        let request = self.get_request(request_id).await?;

        if request.status != ConsultationStatus::Waiting {
            return Ok(ConsultationPositionResponse {
                request,
                people_ahead: 0,
            });
        }

        let waiting = self.list_waiting().await?;
        let people_ahead = waiting
            .iter()
            .position(|candidate| candidate.id == request_id)
            .map(|index| index as i64)
            .unwrap_or(0);

        Ok(ConsultationPositionResponse {
            request,
            people_ahead,
        })
    }

    /// Claims the head-of-line Waiting request for the operator. The claim is
    /// a conditional write, so two operators claiming concurrently receive
    /// distinct requests.
    pub async fn claim_next(
        &self,
        operator_id: Uuid,
    ) -> Result<ConsultationRequest, QueueMatchingError> {
        for _ in 0..CLAIM_RETRY_LIMIT {
            let waiting = self.list_waiting().await?;
            if waiting.is_empty() {
                return Err(QueueMatchingError::NoWaitingRequests);
            }

            for candidate in waiting {
                let patch = json!({
                    "status": ConsultationStatus::InProgress,
                    "assigned_operator_id": operator_id,
                    "version": candidate.version + 1,
                    "updated_at": Utc::now(),
                });

                let claimed = self
                    .store
                    .update_if(
                        CONSULTATION_REQUESTS,
                        &[("id", candidate.id.to_string())],
                        candidate.version,
                        patch,
                    )
                    .await
                    .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

                if claimed {
                    info!(
                        "Operator {} claimed consultation request {}",
                        operator_id, candidate.id
                    );
                    return self.get_request(candidate.id).await;
                }

                debug!(
                    "Request {} was taken by another operator, trying the next",
                    candidate.id
                );
            }
        }

        Err(QueueMatchingError::NoWaitingRequests)
    }

    /// Returns an in-progress request to the Waiting pool. Creation time is
    /// untouched, so the requester keeps their place in line. Used when a
    /// call drops before it meaningfully started.
    pub async fn release(&self, request_id: Uuid) -> Result<(), QueueMatchingError> {
        self.transition(
            request_id,
            ConsultationStatus::Waiting,
            json!({ "assigned_operator_id": null }),
        )
        .await
    }

    pub async fn complete(&self, request_id: Uuid) -> Result<(), QueueMatchingError> {
        self.transition(request_id, ConsultationStatus::Completed, json!({})).await
    }

    pub async fn cancel(
        &self,
        request_id: Uuid,
        reason: &str,
    ) -> Result<(), QueueMatchingError> {
        self.transition(
            request_id,
            ConsultationStatus::Cancelled,
            json!({ "cancel_reason": reason }),
        )
        .await
    }

    pub async fn get_request(
        &self,
        request_id: Uuid,
    ) -> Result<ConsultationRequest, QueueMatchingError> {
        let rows = self
            .store
            .read(CONSULTATION_REQUESTS, &[("id", request_id.to_string())])
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(QueueMatchingError::RequestNotFound(request_id))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn transition(
        &self,
        request_id: Uuid,
        target: ConsultationStatus,
        extra: serde_json::Value,
    ) -> Result<(), QueueMatchingError> {
        let request = self.get_request(request_id).await?;

        if !request.status.can_transition_to(&target) {
            return Err(QueueMatchingError::InvalidTransition {
                from: format!("{:?}", request.status),
                to: format!("{:?}", target),
            });
        }

        let mut patch = json!({
            "status": &target,
            "version": request.version + 1,
            "updated_at": Utc::now(),
        });
        if let (Some(patch_obj), Some(extra_obj)) = (patch.as_object_mut(), extra.as_object()) {
            for (key, value) in extra_obj {
                patch_obj.insert(key.clone(), value.clone());
            }
        }

        let applied = self
            .store
            .update_if(
                CONSULTATION_REQUESTS,
                &[("id", request_id.to_string())],
                request.version,
                patch,
            )
            .await
            .map_err(|e| QueueMatchingError::DatabaseError(e.to_string()))?;

        if !applied {
            return Err(QueueMatchingError::InvalidTransition {
                from: format!("{:?}", request.status),
                to: format!("{:?}", target),
            });
        }

        debug!("Request {} moved to {:?}", request_id, target);
        Ok(())
    }
}
