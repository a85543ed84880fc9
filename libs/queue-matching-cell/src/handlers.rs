use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SharedStore;
use shared_models::{auth::User, error::AppError};

use crate::error::QueueMatchingError;
use crate::models::{
    CancelPayload, OpenFacilityPayload, RequestEntryPayload, SubmitConsultationPayload,
};
use crate::services::{
    booking::BookingService, counter::FacilityCounterService,
    virtual_queue::ConsultationQueueService,
};

/// Shared state for the queue-matching routes. The counter service must be
/// long-lived: it owns the per-facility write locks.
pub struct QueueMatchingState {
    pub config: Arc<AppConfig>,
    pub counter: Arc<FacilityCounterService>,
    pub booking: Arc<BookingService>,
    pub consultations: Arc<ConsultationQueueService>,
}

impl QueueMatchingState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn SharedStore>) -> Self {
        let counter = Arc::new(FacilityCounterService::new(store.clone()));
        let booking = Arc::new(BookingService::new(store.clone(), counter.clone()));
        let consultations = Arc::new(ConsultationQueueService::new(store));

        Self {
            config,
            counter,
            booking,
            consultations,
        }
    }
}

/// Patient requests a slot in a facility's waiting list.
pub async fn request_queue_entry(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<RequestEntryPayload>,
) -> Result<Json<Value>, AppError> {
    let patient_id = parse_actor_id(&user)?;
    info!(
        "Queue entry request from patient {} for facility {}",
        patient_id, payload.facility_id
    );

    let response = state
        .booking
        .request_entry(patient_id, payload.facility_id)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "entry": response.entry,
        "people_ahead": response.people_ahead,
        "estimated_wait_minutes": response.estimated_wait_minutes,
    })))
}

/// Entry status with derived position; this is the patient's poll fallback.
pub async fn get_entry_status(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let response = state
        .booking
        .entry_status(entry_id)
        .await
        .map_err(map_queue_error)?;

    verify_entry_access(&user, response.entry.patient_id)?;

    Ok(Json(json!({
        "entry": response.entry,
        "people_ahead": response.people_ahead,
        "estimated_wait_minutes": response.estimated_wait_minutes,
    })))
}

pub async fn cancel_queue_entry(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
    Json(payload): Json<CancelPayload>,
) -> Result<Json<Value>, AppError> {
    let current = state
        .booking
        .entry_status(entry_id)
        .await
        .map_err(map_queue_error)?;
    verify_entry_access(&user, current.entry.patient_id)?;

    let entry = state
        .booking
        .cancel_entry(entry_id, &payload.reason)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
    })))
}

pub async fn list_waiting_entries(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_operator(&user)?;

    let entries = state
        .booking
        .list_waiting(facility_id)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "facility_id": facility_id,
        "waiting": entries,
    })))
}

/// Operator calls the head-of-line entry and advances the serving pointer.
pub async fn call_next(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_operator(&user)?;
    let operator_id = parse_actor_id(&user)?;

    let entry = state
        .booking
        .call_next(facility_id, operator_id)
        .await
        .map_err(map_queue_error)?;

    info!(
        "Operator {} called position {} at facility {}",
        operator_id, entry.position, facility_id
    );

    Ok(Json(json!({
        "success": true,
        "entry": entry,
    })))
}

pub async fn open_facility(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(facility_id): Path<Uuid>,
    Json(payload): Json<OpenFacilityPayload>,
) -> Result<Json<Value>, AppError> {
    require_operator(&user)?;
    let operator_id = parse_actor_id(&user)?;

    let counter = state
        .counter
        .open_facility(facility_id, operator_id, payload.average_service_minutes)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "facility": counter,
    })))
}

pub async fn close_facility(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_operator(&user)?;
    let operator_id = parse_actor_id(&user)?;

    state
        .counter
        .close_facility(facility_id, operator_id)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Facility closed",
    })))
}

pub async fn get_facility_state(
    State(state): State<Arc<QueueMatchingState>>,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let counter = state
        .counter
        .get_counter(facility_id)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "facility": counter,
    })))
}

/// Patient submits an on-demand consultation request (virtual queue).
pub async fn submit_consultation_request(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<SubmitConsultationPayload>,
) -> Result<Json<Value>, AppError> {
    let requester_id = parse_actor_id(&user)?;

    let request = state
        .consultations
        .submit_request(requester_id, payload.session_endpoint_token)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "request": request,
    })))
}

pub async fn get_consultation_position(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let response = state
        .consultations
        .position_of(request_id)
        .await
        .map_err(map_queue_error)?;

    verify_entry_access(&user, response.request.requester_id)?;

    Ok(Json(json!({
        "request": response.request,
        "people_ahead": response.people_ahead,
    })))
}

pub async fn cancel_consultation_request(
    State(state): State<Arc<QueueMatchingState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<CancelPayload>,
) -> Result<Json<Value>, AppError> {
    let current = state
        .consultations
        .get_request(request_id)
        .await
        .map_err(map_queue_error)?;
    verify_entry_access(&user, current.requester_id)?;

    state
        .consultations
        .cancel(request_id, &payload.reason)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Consultation request cancelled",
    })))
}

// Each error kind keeps a distinct user-visible message; remediation differs
// per kind, so nothing collapses into a generic failure.
pub(crate) fn map_queue_error(e: QueueMatchingError) -> AppError {
    match e {
        QueueMatchingError::AlreadyBooked(_) => AppError::Conflict(e.to_string()),
        QueueMatchingError::Conflict(_) => AppError::Conflict(e.to_string()),
        QueueMatchingError::FacilityClaimed { .. } => AppError::Conflict(e.to_string()),
        QueueMatchingError::FacilityClosed(_) => AppError::PreconditionFailed(e.to_string()),
        QueueMatchingError::FacilityNotFound(_)
        | QueueMatchingError::EntryNotFound(_)
        | QueueMatchingError::RequestNotFound(_)
        | QueueMatchingError::QueueEmpty(_)
        | QueueMatchingError::NoWaitingRequests => AppError::NotFound(e.to_string()),
        QueueMatchingError::InvalidTransition { .. }
        | QueueMatchingError::InvalidAdvance { .. } => AppError::BadRequest(e.to_string()),
        QueueMatchingError::DatabaseError(_) | QueueMatchingError::SerializationError(_) => {
            AppError::Database(e.to_string())
        }
    }
}

fn parse_actor_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::BadRequest("Invalid user ID format".to_string()))
}

fn require_operator(user: &User) -> Result<(), AppError> {
    if user.is_operator() {
        Ok(())
    } else {
        Err(AppError::Auth("Operator role required".to_string()))
    }
}

fn verify_entry_access(user: &User, owner: Uuid) -> Result<(), AppError> {
    if user.is_operator() || user.id == owner.to_string() {
        Ok(())
    } else {
        Err(AppError::Auth("Access denied".to_string()))
    }
}
