use std::sync::Arc;

use uuid::Uuid;

use call_session_cell::handlers::CallSessionState;
use call_session_cell::models::{CallRole, CallState};
use call_session_cell::services::signaling::HttpSignalingClient;
use queue_matching_cell::services::virtual_queue::ConsultationQueueService;
use shared_database::{MemoryStore, SharedStore};
use shared_utils::test_utils::TestConfig;

fn state() -> Arc<CallSessionState> {
    let config = TestConfig::default().to_arc();
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let consultations = Arc::new(ConsultationQueueService::new(store));
    let signaling = Arc::new(HttpSignalingClient::new(&config).unwrap());
    Arc::new(CallSessionState::new(config, signaling, consultations))
}

#[tokio::test]
async fn the_same_role_reuses_the_cached_orchestrator() {
    let state = state();
    let actor_id = Uuid::new_v4();

    let first = state.orchestrator_for(actor_id, CallRole::Caller).await;
    let second = state.orchestrator_for(actor_id, CallRole::Caller).await;
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn an_idle_orchestrator_switches_roles_on_demand() {
    let state = state();
    let actor_id = Uuid::new_v4();

    // The actor answered a call earlier, then turns around to dial out.
    let callee = state.orchestrator_for(actor_id, CallRole::Callee).await;
    assert_eq!(callee.lock().await.session.role, CallRole::Callee);

    let caller = state.orchestrator_for(actor_id, CallRole::Caller).await;
    assert_eq!(caller.lock().await.session.role, CallRole::Caller);
    assert!(!Arc::ptr_eq(&callee, &caller));
}

#[tokio::test]
async fn an_active_call_pins_the_orchestrator_to_its_role() {
    let state = state();
    let actor_id = Uuid::new_v4();

    let callee = state.orchestrator_for(actor_id, CallRole::Callee).await;
    callee.lock().await.session.state = CallState::Connecting;

    let same = state.orchestrator_for(actor_id, CallRole::Caller).await;
    assert!(Arc::ptr_eq(&callee, &same));
    assert_eq!(same.lock().await.session.role, CallRole::Callee);
}
