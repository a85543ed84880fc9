use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    poll_consultation_alert, poll_entry_alert, register_watch, unregister_watch, NotificationState,
};

pub fn create_notification_router(state: Arc<NotificationState>) -> Router {
    let protected_routes = Router::new()
        .route("/watches", post(register_watch))
        .route("/watches/{watch_id}", delete(unregister_watch))
        .route("/entries/{entry_id}", get(poll_entry_alert))
        .route("/consultations/{request_id}", get(poll_consultation_alert))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
