use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use queue_matching_cell::services::virtual_queue::ConsultationQueueService;
use queue_matching_cell::QueueMatchingError;
use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};

use crate::error::CallSessionError;
use crate::models::{CallRole, CallState, TeardownOutcome};
use crate::services::media::{CaptureDevices, LoopbackCaptureDevices, MediaAcquisitionService};
use crate::services::orchestrator::CallOrchestrator;
use crate::services::signaling::SignalingTransport;

type DeviceFactory = dyn Fn() -> Box<dyn CaptureDevices> + Send + Sync;

/// Shared state for the call routes. One orchestrator per actor, created
/// lazily; the signaling transport is shared.
pub struct CallSessionState {
    pub config: Arc<AppConfig>,
    pub signaling: Arc<dyn SignalingTransport>,
    pub consultations: Arc<ConsultationQueueService>,
    devices: Arc<DeviceFactory>,
    orchestrators: Mutex<HashMap<Uuid, Arc<Mutex<CallOrchestrator>>>>,
}

impl CallSessionState {
    pub fn new(
        config: Arc<AppConfig>,
        signaling: Arc<dyn SignalingTransport>,
        consultations: Arc<ConsultationQueueService>,
    ) -> Self {
        Self::with_devices(config, signaling, consultations, Arc::new(|| {
            Box::new(LoopbackCaptureDevices)
        }))
    }

    pub fn with_devices(
        config: Arc<AppConfig>,
        signaling: Arc<dyn SignalingTransport>,
        consultations: Arc<ConsultationQueueService>,
        devices: Arc<DeviceFactory>,
    ) -> Self {
        Self {
            config,
            signaling,
            consultations,
            devices,
            orchestrators: Mutex::new(HashMap::new()),
        }
    }

    /// One orchestrator per actor. An idle orchestrator is replaced when the
    /// requested role differs (an operator can answer a call and later dial
    /// out); a non-idle one is pinned to its call and returned as-is, so the
    /// in-flight call decides what the follow-up operation is allowed to do.
    pub async fn orchestrator_for(
        &self,
        actor_id: Uuid,
        role: CallRole,
    ) -> Arc<Mutex<CallOrchestrator>> {
        let mut orchestrators = self.orchestrators.lock().await;

        if let Some(existing) = orchestrators.get(&actor_id) {
            let existing = existing.clone();
            let (cached_role, state) = {
                let guard = existing.lock().await;
                (guard.session.role, guard.session.state)
            };
            if cached_role == role || state != CallState::Idle {
                return existing;
            }
        }

        let media = MediaAcquisitionService::new((self.devices)());
        let fresh = Arc::new(Mutex::new(CallOrchestrator::new(
            role,
            media,
            self.signaling.clone(),
            self.consultations.clone(),
            self.config.connect_timeout_seconds,
            self.config.short_drop_seconds,
        )));
        orchestrators.insert(actor_id, fresh.clone());
        fresh
    }
}

/// Operator claims the head-of-line consultation request and dials its
/// requester. A claim whose dial fails is returned to the Waiting pool by
/// the orchestrator, so the requester keeps their spot.
pub async fn dial_next(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_operator(&user)?;
    let operator_id = parse_actor_id(&user)?;

    let request = state
        .consultations
        .claim_next(operator_id)
        .await
        .map_err(map_queue_error)?;

    let orchestrator = state.orchestrator_for(operator_id, CallRole::Caller).await;
    let mut orchestrator = orchestrator.lock().await;
    orchestrator.dial(&request).await.map_err(map_call_error)?;

    info!(
        "Operator {} dialing consultation {}",
        operator_id, request.id
    );

    Ok(Json(json!({
        "success": true,
        "request": request,
        "session": orchestrator.session,
    })))
}

/// Callee answers a pending incoming call.
pub async fn accept_call(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = state.orchestrator_for(actor_id, CallRole::Callee).await;
    let mut orchestrator = orchestrator.lock().await;
    orchestrator
        .accept_incoming(None)
        .await
        .map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "session": orchestrator.session,
    })))
}

pub async fn hang_up(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = existing_orchestrator(&state, actor_id).await?;
    let mut orchestrator = orchestrator.lock().await;
    let outcome = orchestrator.hang_up().await.map_err(map_call_error)?;

    Ok(Json(teardown_response(outcome, &orchestrator)))
}

pub async fn get_session(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = existing_orchestrator(&state, actor_id).await?;
    let mut orchestrator = orchestrator.lock().await;

    // The poll doubles as the timeout driver for the Connecting phase.
    let outcome = orchestrator
        .enforce_connect_timeout(Utc::now())
        .await
        .map_err(map_call_error)?;

    Ok(Json(teardown_response(outcome, &orchestrator)))
}

pub async fn acknowledge_summary(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = existing_orchestrator(&state, actor_id).await?;
    let mut orchestrator = orchestrator.lock().await;
    let summary = orchestrator.acknowledge_summary().map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "summary": summary,
        "session": orchestrator.session,
    })))
}

pub async fn toggle_microphone(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = existing_orchestrator(&state, actor_id).await?;
    let mut orchestrator = orchestrator.lock().await;
    let enabled = orchestrator.toggle_microphone().map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "microphone_enabled": enabled,
    })))
}

pub async fn toggle_camera(
    State(state): State<Arc<CallSessionState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor_id = parse_actor_id(&user)?;

    let orchestrator = existing_orchestrator(&state, actor_id).await?;
    let mut orchestrator = orchestrator.lock().await;
    let enabled = orchestrator.toggle_camera().map_err(map_call_error)?;

    Ok(Json(json!({
        "success": true,
        "camera_enabled": enabled,
    })))
}

async fn existing_orchestrator(
    state: &CallSessionState,
    actor_id: Uuid,
) -> Result<Arc<Mutex<CallOrchestrator>>, AppError> {
    let orchestrators = state.orchestrators.lock().await;
    orchestrators
        .get(&actor_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound("No call session for this user".to_string()))
}

fn teardown_response(outcome: Option<TeardownOutcome>, orchestrator: &CallOrchestrator) -> Value {
    match outcome {
        Some(TeardownOutcome::Summary(summary)) => json!({
            "success": true,
            "session": orchestrator.session,
            "summary": summary,
        }),
        Some(TeardownOutcome::TransientDrop) => json!({
            "success": true,
            "session": orchestrator.session,
            "transient_drop": true,
        }),
        None => json!({
            "success": true,
            "session": orchestrator.session,
        }),
    }
}

pub(crate) fn map_call_error(e: CallSessionError) -> AppError {
    match e {
        CallSessionError::NotAddressable
        | CallSessionError::PermissionDenied
        | CallSessionError::DeviceUnavailable(_) => AppError::PreconditionFailed(e.to_string()),
        CallSessionError::InvalidState(_) => AppError::BadRequest(e.to_string()),
        CallSessionError::TransientDrop | CallSessionError::ConnectTimeout(_) => {
            AppError::Conflict(e.to_string())
        }
        CallSessionError::Signaling(_) => AppError::ExternalService(e.to_string()),
        CallSessionError::Queue(inner) => map_queue_error(inner),
    }
}

fn map_queue_error(e: QueueMatchingError) -> AppError {
    match e {
        QueueMatchingError::NoWaitingRequests | QueueMatchingError::RequestNotFound(_) => {
            AppError::NotFound(e.to_string())
        }
        QueueMatchingError::DatabaseError(_) | QueueMatchingError::SerializationError(_) => {
            AppError::Database(e.to_string())
        }
        other => AppError::BadRequest(other.to_string()),
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
