use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    accept_call, acknowledge_summary, dial_next, get_session, hang_up, toggle_camera,
    toggle_microphone, CallSessionState,
};

pub fn create_call_session_router(state: Arc<CallSessionState>) -> Router {
    let protected_routes = Router::new()
        .route("/dial-next", post(dial_next))
        .route("/accept", post(accept_call))
        .route("/hang-up", post(hang_up))
        .route("/session", get(get_session))
        .route("/summary/ack", post(acknowledge_summary))
        .route("/microphone/toggle", post(toggle_microphone))
        .route("/camera/toggle", post(toggle_camera))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
