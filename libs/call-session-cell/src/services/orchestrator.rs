use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use queue_matching_cell::services::virtual_queue::ConsultationQueueService;
use queue_matching_cell::ConsultationRequest;

use crate::error::CallSessionError;
use crate::models::{
    CallEndReason, CallRole, CallSession, CallState, CallSummary, MediaKind, TeardownOutcome,
};
use crate::services::media::MediaAcquisitionService;
use crate::services::signaling::{
    reconnect_transport, NegotiatedSession, PeerAddress, SignalingEvent, SignalingTransport,
};

/// Drives one actor's call lifecycle. Exclusive owner of that actor's media
/// handles and negotiated session; every exit path funnels through
/// `teardown`, which is safe to hit more than once.
pub struct CallOrchestrator {
    pub session: CallSession,
    media: MediaAcquisitionService,
    signaling: Arc<dyn SignalingTransport>,
    consultations: Arc<ConsultationQueueService>,
    negotiated: Option<NegotiatedSession>,
    pending_incoming: Option<(PeerAddress, String)>,
    last_summary: Option<CallSummary>,
    connect_deadline: Option<DateTime<Utc>>,
    connect_timeout_seconds: u64,
    short_drop_seconds: u64,
}

impl CallOrchestrator {
    pub fn new(
        role: CallRole,
        media: MediaAcquisitionService,
        signaling: Arc<dyn SignalingTransport>,
        consultations: Arc<ConsultationQueueService>,
        connect_timeout_seconds: u64,
        short_drop_seconds: u64,
    ) -> Self {
        Self {
            session: CallSession::idle(role),
            media,
            signaling,
            consultations,
            negotiated: None,
            pending_incoming: None,
            last_summary: None,
            connect_deadline: None,
            connect_timeout_seconds,
            short_drop_seconds,
        }
    }

    /// Idle → Waiting, the pre-call queue phase.
    pub fn enter_waiting(&mut self) -> Result<(), CallSessionError> {
        if self.session.state != CallState::Idle {
            return Err(CallSessionError::InvalidState(self.session.state));
        }
        self.session.state = CallState::Waiting;
        Ok(())
    }

    /// Places a call to the requester behind a claimed consultation request.
    /// Addressability is checked before anything is acquired, so an offline
    /// transport fails fast without touching devices. The claim never
    /// outlives a dial that did not open: every failure path returns the
    /// request to the Waiting pool.
    pub async fn dial(
        &mut self,
        request: &ConsultationRequest,
    ) -> Result<(), CallSessionError> {
        if !matches!(self.session.state, CallState::Idle | CallState::Waiting) {
            self.release_claim(request.id).await;
            return Err(CallSessionError::InvalidState(self.session.state));
        }

        if self.signaling.local_address().await.is_none() {
            self.release_claim(request.id).await;
            return Err(CallSessionError::NotAddressable);
        }

        let handle = match self.media.acquire_for_call().await {
            Ok(handle) => handle,
            Err(e) => {
                self.release_claim(request.id).await;
                return Err(e.into());
            }
        };
        self.session.local_media = handle.kind;
        self.session.consultation_request_id = Some(request.id);
        self.session.state = CallState::Connecting;
        self.session.started_at = Some(Utc::now());
        self.arm_connect_deadline();

        info!(
            "Dialing requester for consultation {} with {:?}",
            request.id, handle.kind
        );

        let remote = PeerAddress(request.session_endpoint_token.clone());
        match self
            .signaling
            .dial(&remote, self.local_offer())
            .await
        {
            Ok(negotiated) => {
                self.negotiated = Some(negotiated);
                Ok(())
            }
            Err(e) => {
                warn!("Dial failed: {}", e);
                self.teardown(CallEndReason::NegotiationFailed).await?;
                Err(e)
            }
        }
    }

    /// Returns a claimed request to the Waiting pool. Best-effort: the dial
    /// failure being reported matters more than a release race.
    async fn release_claim(&self, request_id: Uuid) {
        if let Err(e) = self.consultations.release(request_id).await {
            warn!(
                "Could not return consultation {} to the queue: {}",
                request_id, e
            );
        }
    }

    /// Callee mirror of `dial`: answers the stored or supplied offer.
    pub async fn accept_incoming(
        &mut self,
        offer: Option<(PeerAddress, String)>,
    ) -> Result<(), CallSessionError> {
        if !matches!(self.session.state, CallState::Idle | CallState::Waiting) {
            return Err(CallSessionError::InvalidState(self.session.state));
        }

        let (from, offer_sdp) = match offer.or_else(|| self.pending_incoming.take()) {
            Some(incoming) => incoming,
            None => return Err(CallSessionError::InvalidState(self.session.state)),
        };

        if self.signaling.local_address().await.is_none() {
            return Err(CallSessionError::NotAddressable);
        }

        let handle = self.media.acquire_for_call().await?;
        self.session.local_media = handle.kind;
        self.session.state = CallState::Connecting;
        self.session.started_at = Some(Utc::now());
        self.arm_connect_deadline();

        info!("Accepting call from {} with {:?}", from.0, handle.kind);

        match self.signaling.accept(&from, offer_sdp).await {
            Ok(negotiated) => {
                self.negotiated = Some(negotiated);
                Ok(())
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                self.teardown(CallEndReason::NegotiationFailed).await?;
                Err(e)
            }
        }
    }

    /// Connecting → Connected, once the remote stream is flowing.
    pub fn on_connected(&mut self, remote_kind: MediaKind) -> Result<(), CallSessionError> {
        if self.session.state != CallState::Connecting {
            return Err(CallSessionError::InvalidState(self.session.state));
        }
        self.session.state = CallState::Connected;
        self.session.remote_media = remote_kind;
        self.session.connected_at = Some(Utc::now());
        self.connect_deadline = None;
        info!("Call connected with remote {:?}", remote_kind);
        Ok(())
    }

    pub async fn hang_up(&mut self) -> Result<Option<TeardownOutcome>, CallSessionError> {
        self.teardown(CallEndReason::LocalHangup).await
    }

    /// Tears down the Connecting phase if its budget has expired.
    pub async fn enforce_connect_timeout(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<TeardownOutcome>, CallSessionError> {
        if self.session.state != CallState::Connecting {
            return Ok(None);
        }
        match self.connect_deadline {
            Some(deadline) if now >= deadline => {
                warn!(
                    "Call did not connect within {}s, tearing down",
                    self.connect_timeout_seconds
                );
                self.teardown(CallEndReason::ConnectTimeout).await
            }
            _ => Ok(None),
        }
    }

    pub async fn handle_event(
        &mut self,
        event: SignalingEvent,
    ) -> Result<Option<TeardownOutcome>, CallSessionError> {
        match event {
            SignalingEvent::IncomingCall { from, offer_sdp } => {
                debug!("Incoming call from {}", from.0);
                self.pending_incoming = Some((from, offer_sdp));
                Ok(None)
            }
            SignalingEvent::RemoteStream { kind } => {
                self.on_connected(kind)?;
                Ok(None)
            }
            SignalingEvent::RemoteClosed => self.teardown(CallEndReason::RemoteClosed).await,
            SignalingEvent::NegotiationError { message } => {
                warn!("Negotiation error: {}", message);
                self.teardown(CallEndReason::NegotiationFailed).await
            }
            SignalingEvent::TransportDisconnected => {
                // Addressability is restored out-of-band; the call itself
                // only ends if the session dies (RemoteClosed follows).
                reconnect_transport(self.signaling.as_ref()).await?;
                Ok(None)
            }
            SignalingEvent::TransportReconnected => {
                debug!("Transport reconnected");
                Ok(None)
            }
        }
    }

    /// Deterministic teardown. Releases capture, closes the negotiated
    /// session, then decides: a drop shorter than the short-drop window that
    /// the party did not ask for is transient, so the consultation request
    /// goes back to Waiting and the actor returns to Idle. Anything else is
    /// a finished call with a summary; the caller side marks the request
    /// Completed. Calling this with nothing to tear down is a no-op.
    pub async fn teardown(
        &mut self,
        reason: CallEndReason,
    ) -> Result<Option<TeardownOutcome>, CallSessionError> {
        if matches!(self.session.state, CallState::Idle | CallState::Summary) {
            return Ok(None);
        }

        let now = Utc::now();
        let connected = self.session.connected_duration(now);
        let request_id = self.session.consultation_request_id;

        self.media.release_held().await;
        if let Some(negotiated) = self.negotiated.take() {
            if let Err(e) = self.signaling.close(&negotiated).await {
                warn!("Session close failed: {}", e);
            }
        }
        self.connect_deadline = None;

        let short_drop = connected < Duration::seconds(self.short_drop_seconds as i64)
            && !reason.is_intentional();

        if short_drop {
            info!(
                "Transient drop after {}s ({:?}), returning to queue",
                connected.num_seconds(),
                reason
            );
            if self.session.role == CallRole::Caller {
                if let Some(request_id) = request_id {
                    self.consultations.release(request_id).await?;
                }
            }
            self.reset_to_idle();
            return Ok(Some(TeardownOutcome::TransientDrop));
        }

        let summary = CallSummary {
            session_id: self.session.id,
            role: self.session.role,
            reason,
            consultation_request_id: request_id,
            connected_seconds: connected.num_seconds(),
            ended_at: now,
        };

        if self.session.role == CallRole::Caller {
            if let Some(request_id) = request_id {
                self.consultations.complete(request_id).await?;
            }
        }

        info!(
            "Call ended after {}s ({:?})",
            summary.connected_seconds, reason
        );

        self.session.state = CallState::Summary;
        self.last_summary = Some(summary.clone());
        Ok(Some(TeardownOutcome::Summary(summary)))
    }

    /// Summary → Idle, ready for the next call.
    pub fn acknowledge_summary(&mut self) -> Result<CallSummary, CallSessionError> {
        if self.session.state != CallState::Summary {
            return Err(CallSessionError::InvalidState(self.session.state));
        }
        let summary = self
            .last_summary
            .take()
            .ok_or(CallSessionError::InvalidState(self.session.state))?;
        self.reset_to_idle();
        Ok(summary)
    }

    pub fn toggle_microphone(&mut self) -> Result<bool, CallSessionError> {
        if !matches!(
            self.session.state,
            CallState::Connecting | CallState::Connected
        ) {
            return Err(CallSessionError::InvalidState(self.session.state));
        }
        self.session.microphone_enabled = !self.session.microphone_enabled;
        Ok(self.session.microphone_enabled)
    }

    pub fn toggle_camera(&mut self) -> Result<bool, CallSessionError> {
        if !matches!(
            self.session.state,
            CallState::Connecting | CallState::Connected
        ) {
            return Err(CallSessionError::InvalidState(self.session.state));
        }
        if self.session.local_media != MediaKind::AudioVideo {
            return Err(CallSessionError::DeviceUnavailable(
                "No camera in the current capture".to_string(),
            ));
        }
        self.session.camera_enabled = !self.session.camera_enabled;
        Ok(self.session.camera_enabled)
    }

    pub fn last_summary(&self) -> Option<&CallSummary> {
        self.last_summary.as_ref()
    }

    pub fn holds_media(&self) -> bool {
        self.media.has_handle()
    }

    fn arm_connect_deadline(&mut self) {
        self.connect_deadline =
            Some(Utc::now() + Duration::seconds(self.connect_timeout_seconds as i64));
    }

    fn reset_to_idle(&mut self) {
        let role = self.session.role;
        self.session = CallSession::idle(role);
        self.negotiated = None;
        self.connect_deadline = None;
    }

    // Placeholder offer; the browser peer supplies the real SDP and the
    // gateway rewrites it during negotiation.
    fn local_offer(&self) -> String {
        format!("v=0 o=- {} media={:?}", self.session.id, self.session.local_media)
    }
}
