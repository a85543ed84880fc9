use std::collections::VecDeque;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use call_session_cell::error::CallSessionError;
use call_session_cell::models::{
    CallEndReason, CallRole, CallState, MediaKind, TeardownOutcome,
};
use call_session_cell::services::media::{
    CaptureDevices, CaptureHandle, MediaAcquireError, MediaAcquisitionService,
};
use call_session_cell::services::orchestrator::CallOrchestrator;
use call_session_cell::services::signaling::{
    NegotiatedSession, PeerAddress, SignalingEvent, SignalingTransport,
};
use queue_matching_cell::services::virtual_queue::ConsultationQueueService;
use queue_matching_cell::ConsultationStatus;
use shared_database::{MemoryStore, SharedStore};

/// Devices that fail according to a script, then succeed.
#[derive(Default)]
struct ScriptedDevices {
    failures: Mutex<VecDeque<MediaAcquireError>>,
    acquired: Mutex<Vec<Uuid>>,
    released: Mutex<Vec<Uuid>>,
}

impl ScriptedDevices {
    fn failing_with(failures: Vec<MediaAcquireError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CaptureDevices for ScriptedDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<CaptureHandle, MediaAcquireError> {
        if let Some(failure) = self.failures.lock().await.pop_front() {
            return Err(failure);
        }
        let handle = CaptureHandle {
            id: Uuid::new_v4(),
            kind,
        };
        self.acquired.lock().await.push(handle.id);
        Ok(handle)
    }

    async fn release(&self, handle: CaptureHandle) {
        self.released.lock().await.push(handle.id);
    }
}

struct FakeSignaling {
    address: RwLock<Option<PeerAddress>>,
    events: broadcast::Sender<SignalingEvent>,
    closed: Mutex<Vec<String>>,
}

impl FakeSignaling {
    fn online() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: RwLock::new(Some(PeerAddress("local-peer".to_string()))),
            events,
            closed: Mutex::new(Vec::new()),
        }
    }

    fn offline() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            address: RwLock::new(None),
            events,
            closed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SignalingTransport for FakeSignaling {
    async fn open(&self) -> Result<PeerAddress, CallSessionError> {
        let address = PeerAddress("local-peer".to_string());
        *self.address.write().await = Some(address.clone());
        Ok(address)
    }

    async fn local_address(&self) -> Option<PeerAddress> {
        self.address.read().await.clone()
    }

    async fn dial(
        &self,
        remote: &PeerAddress,
        _offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError> {
        Ok(NegotiatedSession {
            session_id: format!("session-to-{}", remote.0),
            answer_sdp: "answer".to_string(),
        })
    }

    async fn accept(
        &self,
        from: &PeerAddress,
        _offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError> {
        Ok(NegotiatedSession {
            session_id: format!("session-from-{}", from.0),
            answer_sdp: "answer".to_string(),
        })
    }

    async fn close(&self, session: &NegotiatedSession) -> Result<(), CallSessionError> {
        self.closed.lock().await.push(session.session_id.clone());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

struct Fixture {
    consultations: Arc<ConsultationQueueService>,
    signaling: Arc<FakeSignaling>,
    devices: Arc<ScriptedDevices>,
}

fn fixture_with(signaling: FakeSignaling, devices: ScriptedDevices) -> Fixture {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    Fixture {
        consultations: Arc::new(ConsultationQueueService::new(store)),
        signaling: Arc::new(signaling),
        devices: Arc::new(devices),
    }
}

/// Devices shared with the fixture so tests can count releases.
struct SharedDevices(Arc<ScriptedDevices>);

#[async_trait]
impl CaptureDevices for SharedDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<CaptureHandle, MediaAcquireError> {
        self.0.acquire(kind).await
    }

    async fn release(&self, handle: CaptureHandle) {
        self.0.release(handle).await
    }
}

impl Fixture {
    fn orchestrator(&self, role: CallRole) -> CallOrchestrator {
        let media = MediaAcquisitionService::new(Box::new(SharedDevices(self.devices.clone())));
        CallOrchestrator::new(
            role,
            media,
            self.signaling.clone(),
            self.consultations.clone(),
            30,
            5,
        )
    }

    async fn claimed_request(&self, operator_id: Uuid) -> queue_matching_cell::ConsultationRequest {
        self.consultations
            .submit_request(Uuid::new_v4(), "patient-peer".to_string())
            .await
            .unwrap();
        self.consultations.claim_next(operator_id).await.unwrap()
    }
}

// Media acquisition

#[tokio::test]
async fn busy_camera_falls_back_to_audio_only() {
    let devices = ScriptedDevices::failing_with(vec![MediaAcquireError::DeviceBusy]);
    let mut media = MediaAcquisitionService::new(Box::new(devices));

    let handle = media.acquire_for_call().await.unwrap();
    assert_eq!(handle.kind, MediaKind::AudioOnly);
}

#[tokio::test]
async fn permission_denied_is_terminal() {
    let devices = ScriptedDevices::failing_with(vec![MediaAcquireError::PermissionDenied]);
    let mut media = MediaAcquisitionService::new(Box::new(devices));

    let result = media.acquire_for_call().await;
    assert_matches!(result, Err(MediaAcquireError::PermissionDenied));
    assert!(!media.has_handle());
}

#[tokio::test]
async fn reacquiring_releases_the_previous_handle() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let mut media =
        MediaAcquisitionService::new(Box::new(SharedDevices(fixture.devices.clone())));

    media.acquire_for_call().await.unwrap();
    media.acquire_for_call().await.unwrap();
    media.release_held().await;

    let acquired = fixture.devices.acquired.lock().await.clone();
    let released = fixture.devices.released.lock().await.clone();
    assert_eq!(acquired.len(), 2);
    assert_eq!(released, acquired);
    assert!(!media.has_handle());
}

// Dialing

#[tokio::test]
async fn dial_fails_fast_when_not_addressable() {
    let fixture = fixture_with(FakeSignaling::offline(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    let result = orchestrator.dial(&request).await;

    assert_matches!(result, Err(CallSessionError::NotAddressable));
    assert_eq!(orchestrator.session.state, CallState::Idle);
    // Nothing was acquired before the addressability check.
    assert!(fixture.devices.acquired.lock().await.is_empty());

    // The claim went back; the requester keeps their spot.
    let restored = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(restored.status, ConsultationStatus::Waiting);
    assert_eq!(restored.assigned_operator_id, None);
}

#[tokio::test]
async fn denied_permissions_release_the_claimed_request() {
    let fixture = fixture_with(
        FakeSignaling::online(),
        ScriptedDevices::failing_with(vec![MediaAcquireError::PermissionDenied]),
    );
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    let result = orchestrator.dial(&request).await;

    assert_matches!(result, Err(CallSessionError::PermissionDenied));
    assert_eq!(orchestrator.session.state, CallState::Idle);

    let restored = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(restored.status, ConsultationStatus::Waiting);
    assert_eq!(restored.assigned_operator_id, None);
}

#[tokio::test]
async fn dial_moves_to_connecting_then_connected() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    assert_eq!(orchestrator.session.state, CallState::Connecting);
    assert_eq!(orchestrator.session.local_media, MediaKind::AudioVideo);

    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();
    assert_eq!(orchestrator.session.state, CallState::Connected);
}

#[tokio::test]
async fn a_second_dial_is_rejected_mid_call() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let first = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&first).await.unwrap();

    let second = fixture.claimed_request(operator_id).await;
    let result = orchestrator.dial(&second).await;
    assert_matches!(
        result,
        Err(CallSessionError::InvalidState(CallState::Connecting))
    );

    // The rejected claim is released; the in-flight one is untouched.
    let released = fixture
        .consultations
        .get_request(second.id)
        .await
        .unwrap();
    assert_eq!(released.status, ConsultationStatus::Waiting);
    let in_flight = fixture.consultations.get_request(first.id).await.unwrap();
    assert_eq!(in_flight.status, ConsultationStatus::InProgress);
}

// Teardown policy

#[tokio::test]
async fn short_unintentional_drop_returns_the_request_to_waiting() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();

    // The connection dies almost immediately.
    let outcome = orchestrator
        .handle_event(SignalingEvent::RemoteClosed)
        .await
        .unwrap();
    assert_matches!(outcome, Some(TeardownOutcome::TransientDrop));
    assert_eq!(orchestrator.session.state, CallState::Idle);

    let restored = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(restored.status, ConsultationStatus::Waiting);
    assert_eq!(restored.assigned_operator_id, None);
}

#[tokio::test]
async fn short_intentional_hangup_still_ends_the_call() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();

    let outcome = orchestrator.hang_up().await.unwrap();
    assert_matches!(
        outcome,
        Some(TeardownOutcome::Summary(ref summary)) if summary.reason == CallEndReason::LocalHangup
    );
    assert_eq!(orchestrator.session.state, CallState::Summary);

    let completed = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(completed.status, ConsultationStatus::Completed);
}

#[tokio::test]
async fn long_call_ends_in_a_summary_whatever_the_reason() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();
    orchestrator.session.connected_at = Some(Utc::now() - Duration::seconds(60));

    let outcome = orchestrator
        .teardown(CallEndReason::RemoteClosed)
        .await
        .unwrap();
    assert_matches!(
        outcome,
        Some(TeardownOutcome::Summary(ref summary)) if summary.connected_seconds >= 60
    );
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();
    orchestrator.session.connected_at = Some(Utc::now() - Duration::seconds(60));

    let first = orchestrator.hang_up().await.unwrap();
    assert_matches!(first, Some(TeardownOutcome::Summary(_)));

    // A remote-closed event races the local hangup; the second teardown is
    // a no-op and the request stays Completed.
    let second = orchestrator
        .handle_event(SignalingEvent::RemoteClosed)
        .await
        .unwrap();
    assert!(second.is_none());

    let completed = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(completed.status, ConsultationStatus::Completed);
    assert_eq!(fixture.devices.released.lock().await.len(), 1);
    assert_eq!(fixture.signaling.closed.lock().await.len(), 1);
}

#[tokio::test]
async fn connect_timeout_tears_down_as_a_transient_drop() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();

    // Before the deadline nothing happens.
    let outcome = orchestrator
        .enforce_connect_timeout(Utc::now())
        .await
        .unwrap();
    assert!(outcome.is_none());

    let outcome = orchestrator
        .enforce_connect_timeout(Utc::now() + Duration::seconds(31))
        .await
        .unwrap();
    assert_matches!(outcome, Some(TeardownOutcome::TransientDrop));

    let restored = fixture
        .consultations
        .get_request(request.id)
        .await
        .unwrap();
    assert_eq!(restored.status, ConsultationStatus::Waiting);
}

// Post-call and in-call controls

#[tokio::test]
async fn summary_must_be_acknowledged_to_return_to_idle() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    orchestrator.on_connected(MediaKind::AudioVideo).unwrap();
    orchestrator.hang_up().await.unwrap();

    assert_eq!(orchestrator.session.state, CallState::Summary);
    let summary = orchestrator.acknowledge_summary().unwrap();
    assert_eq!(summary.reason, CallEndReason::LocalHangup);
    assert_eq!(orchestrator.session.state, CallState::Idle);

    // Nothing left to acknowledge.
    assert_matches!(
        orchestrator.acknowledge_summary(),
        Err(CallSessionError::InvalidState(CallState::Idle))
    );
}

#[tokio::test]
async fn camera_toggle_needs_a_video_capture() {
    let fixture = fixture_with(
        FakeSignaling::online(),
        ScriptedDevices::failing_with(vec![MediaAcquireError::DeviceBusy]),
    );
    let operator_id = Uuid::new_v4();
    let request = fixture.claimed_request(operator_id).await;

    let mut orchestrator = fixture.orchestrator(CallRole::Caller);
    orchestrator.dial(&request).await.unwrap();
    assert_eq!(orchestrator.session.local_media, MediaKind::AudioOnly);

    assert!(orchestrator.toggle_microphone().is_ok());
    assert_matches!(
        orchestrator.toggle_camera(),
        Err(CallSessionError::DeviceUnavailable(_))
    );
}

#[tokio::test]
async fn callee_accepts_a_pending_incoming_call() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());

    let mut orchestrator = fixture.orchestrator(CallRole::Callee);
    orchestrator
        .handle_event(SignalingEvent::IncomingCall {
            from: PeerAddress("operator-peer".to_string()),
            offer_sdp: "offer".to_string(),
        })
        .await
        .unwrap();

    orchestrator.accept_incoming(None).await.unwrap();
    assert_eq!(orchestrator.session.state, CallState::Connecting);

    orchestrator.on_connected(MediaKind::AudioOnly).unwrap();
    assert_eq!(orchestrator.session.remote_media, MediaKind::AudioOnly);
}

#[tokio::test]
async fn accept_without_a_pending_offer_is_invalid() {
    let fixture = fixture_with(FakeSignaling::online(), ScriptedDevices::default());

    let mut orchestrator = fixture.orchestrator(CallRole::Callee);
    let result = orchestrator.accept_incoming(None).await;
    assert_matches!(result, Err(CallSessionError::InvalidState(CallState::Idle)));
}
