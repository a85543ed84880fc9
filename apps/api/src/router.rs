use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::{info, warn};

use call_session_cell::{create_call_session_router, CallSessionState, HttpSignalingClient};
use notification_cell::{create_notification_router, NotificationState};
use queue_matching_cell::{create_queue_matching_router, QueueMatchingState};
use shared_config::AppConfig;
use shared_database::{HttpStore, MemoryStore, SharedStore};

pub fn create_router() -> Router {
    let config = Arc::new(AppConfig::from_env());

    // Shared store backs every cell; local runs fall back to the in-memory
    // store so the service works without a backing database.
    let store: Arc<dyn SharedStore> = if config.is_configured() {
        Arc::new(HttpStore::new(&config))
    } else {
        warn!("Store not configured, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let queue_state = Arc::new(QueueMatchingState::new(config.clone(), store.clone()));

    let notification_state = Arc::new(NotificationState::new(
        config.clone(),
        store.clone(),
        queue_state.booking.clone(),
        queue_state.consultations.clone(),
    ));

    let mut app = Router::new()
        .route("/", get(|| async { "Clinic Live API is running!" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/queue", create_queue_matching_router(queue_state.clone()))
        .nest("/alerts", create_notification_router(notification_state));

    // Calls need the realtime gateway; without one the rest of the service
    // still runs.
    match HttpSignalingClient::new(&config) {
        Ok(signaling) => {
            let call_state = Arc::new(CallSessionState::new(
                config,
                Arc::new(signaling),
                queue_state.consultations.clone(),
            ));
            app = app.nest("/calls", create_call_session_router(call_state));
            info!("Call routes mounted");
        }
        Err(e) => {
            warn!("Signaling unavailable, call routes disabled: {}", e);
        }
    }

    app
}
