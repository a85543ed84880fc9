use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tracing::info;
use uuid::Uuid;

use queue_matching_cell::services::{
    booking::BookingService, virtual_queue::ConsultationQueueService,
};
use queue_matching_cell::QueueMatchingError;
use shared_config::AppConfig;
use shared_database::SharedStore;
use shared_models::{auth::User, error::AppError};

use crate::error::NotificationError;
use crate::models::{RegisterWatchPayload, WatchTarget};
use crate::services::delivery::{AlertDispatcher, DeliveryChannel, TracingDeliveryChannel};
use crate::services::watcher::{AlertStateRegistry, QueueWatcher};

/// Shared state for the notification routes. The registry is the single
/// source of last-fired markers, shared between the server-side watchers and
/// the client poll endpoints.
pub struct NotificationState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SharedStore>,
    pub booking: Arc<BookingService>,
    pub consultations: Arc<ConsultationQueueService>,
    pub registry: Arc<AlertStateRegistry>,
    pub dispatcher: Arc<AlertDispatcher>,
    watchers: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl NotificationState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn SharedStore>,
        booking: Arc<BookingService>,
        consultations: Arc<ConsultationQueueService>,
    ) -> Self {
        Self::with_channel(
            config,
            store,
            booking,
            consultations,
            Arc::new(TracingDeliveryChannel),
        )
    }

    pub fn with_channel(
        config: Arc<AppConfig>,
        store: Arc<dyn SharedStore>,
        booking: Arc<BookingService>,
        consultations: Arc<ConsultationQueueService>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            config,
            store,
            booking,
            consultations,
            registry: Arc::new(AlertStateRegistry::new()),
            dispatcher: Arc::new(AlertDispatcher::new(channel)),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    /// Spawns a background watcher for the target unless one is already
    /// running. Returns the watch id.
    pub async fn start_watch(&self, target: WatchTarget) -> Result<Uuid, NotificationError> {
        let watch_id = target.watch_id();

        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(&watch_id) {
            return Err(NotificationError::WatchAlreadyRegistered(watch_id));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = QueueWatcher::new(
            target,
            self.store.clone(),
            self.booking.clone(),
            self.consultations.clone(),
            self.registry.clone(),
            self.dispatcher.clone(),
            self.poll_interval(),
        );
        tokio::spawn(worker.run(shutdown_rx));
        watchers.insert(watch_id, shutdown_tx);
        Ok(watch_id)
    }

    pub async fn stop_watch(&self, watch_id: Uuid) -> Result<(), NotificationError> {
        let mut watchers = self.watchers.lock().await;
        match watchers.remove(&watch_id) {
            Some(shutdown) => {
                let _ = shutdown.send(true);
                Ok(())
            }
            None => Err(NotificationError::WatchNotFound(watch_id)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    pub surface_visible: bool,
}

/// Registers a server-side watcher for a queue position.
pub async fn register_watch(
    State(state): State<Arc<NotificationState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<RegisterWatchPayload>,
) -> Result<Json<Value>, AppError> {
    verify_target_access(&state, &user, payload.target).await?;

    let watch_id = state
        .start_watch(payload.target)
        .await
        .map_err(map_notification_error)?;

    info!("Watch registered: {}", watch_id);

    Ok(Json(json!({
        "success": true,
        "watch_id": watch_id,
    })))
}

pub async fn unregister_watch(
    State(state): State<Arc<NotificationState>>,
    Path(watch_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state
        .stop_watch(watch_id)
        .await
        .map_err(map_notification_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Watch removed",
    })))
}

/// Poll fallback for a facility entry. Runs through the same registry as the
/// push path, so a position already alerted over push does not alert again
/// here. Push-style delivery is suppressed when the caller reports its
/// surface visible.
pub async fn poll_entry_alert(
    State(state): State<Arc<NotificationState>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, AppError> {
    let status = state
        .booking
        .entry_status(entry_id)
        .await
        .map_err(map_queue_error)?;
    verify_owner_access(&user, status.entry.patient_id)?;

    let alert = state
        .registry
        .evaluate(entry_id, status.people_ahead)
        .await;
    if let Some(alert) = &alert {
        state.dispatcher.dispatch(alert, query.surface_visible).await;
    }

    Ok(Json(json!({
        "entry": status.entry,
        "people_ahead": status.people_ahead,
        "estimated_wait_minutes": status.estimated_wait_minutes,
        "alert": alert,
    })))
}

/// Poll fallback for an on-demand consultation request.
pub async fn poll_consultation_alert(
    State(state): State<Arc<NotificationState>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, AppError> {
    let position = state
        .consultations
        .position_of(request_id)
        .await
        .map_err(map_queue_error)?;
    verify_owner_access(&user, position.request.requester_id)?;

    let alert = state
        .registry
        .evaluate(request_id, position.people_ahead)
        .await;
    if let Some(alert) = &alert {
        state.dispatcher.dispatch(alert, query.surface_visible).await;
    }

    Ok(Json(json!({
        "request": position.request,
        "people_ahead": position.people_ahead,
        "alert": alert,
    })))
}

async fn verify_target_access(
    state: &NotificationState,
    user: &User,
    target: WatchTarget,
) -> Result<(), AppError> {
    let owner = match target {
        WatchTarget::FacilityEntry { entry_id } => {
            state
                .booking
                .entry_status(entry_id)
                .await
                .map_err(map_queue_error)?
                .entry
                .patient_id
        }
        WatchTarget::ConsultationRequest { request_id } => {
            state
                .consultations
                .get_request(request_id)
                .await
                .map_err(map_queue_error)?
                .requester_id
        }
    };
    verify_owner_access(user, owner)
}

fn verify_owner_access(user: &User, owner: Uuid) -> Result<(), AppError> {
    if user.is_operator() || user.id == owner.to_string() {
        Ok(())
    } else {
        Err(AppError::Auth("Access denied".to_string()))
    }
}

fn map_notification_error(e: NotificationError) -> AppError {
    match e {
        NotificationError::WatchNotFound(_) => AppError::NotFound(e.to_string()),
        NotificationError::WatchAlreadyRegistered(_) => AppError::Conflict(e.to_string()),
        NotificationError::Queue(inner) => map_queue_error(inner),
        NotificationError::SerializationError(_) => AppError::Database(e.to_string()),
    }
}

fn map_queue_error(e: QueueMatchingError) -> AppError {
    match e {
        QueueMatchingError::EntryNotFound(_)
        | QueueMatchingError::RequestNotFound(_)
        | QueueMatchingError::FacilityNotFound(_) => AppError::NotFound(e.to_string()),
        QueueMatchingError::DatabaseError(_) | QueueMatchingError::SerializationError(_) => {
            AppError::Database(e.to_string())
        }
        other => AppError::BadRequest(other.to_string()),
    }
}
