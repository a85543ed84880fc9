use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{
    call_next, cancel_consultation_request, cancel_queue_entry, close_facility,
    get_consultation_position, get_entry_status, get_facility_state, list_waiting_entries,
    open_facility, request_queue_entry, submit_consultation_request, QueueMatchingState,
};

pub fn create_queue_matching_router(state: Arc<QueueMatchingState>) -> Router {
    let protected_routes = Router::new()
        .route("/entries", post(request_queue_entry))
        .route("/entries/{entry_id}", get(get_entry_status))
        .route("/entries/{entry_id}/cancel", post(cancel_queue_entry))
        .route("/facilities/{facility_id}", get(get_facility_state))
        .route("/facilities/{facility_id}/waiting", get(list_waiting_entries))
        .route("/facilities/{facility_id}/call-next", post(call_next))
        .route("/facilities/{facility_id}/open", post(open_facility))
        .route("/facilities/{facility_id}/close", post(close_facility))
        .route("/consultations", post(submit_consultation_request))
        .route(
            "/consultations/{request_id}/position",
            get(get_consultation_position),
        )
        .route(
            "/consultations/{request_id}/cancel",
            post(cancel_consultation_request),
        )
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}
