use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::error::CallSessionError;
use crate::models::MediaKind;

const EVENT_CAPACITY: usize = 64;
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Routable identity on the signaling plane. A party without one cannot
/// place or receive calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress(pub String);

/// One negotiated media session between two peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatedSession {
    pub session_id: String,
    pub answer_sdp: String,
}

#[derive(Debug, Clone)]
pub enum SignalingEvent {
    IncomingCall {
        from: PeerAddress,
        offer_sdp: String,
    },
    RemoteStream {
        kind: MediaKind,
    },
    RemoteClosed,
    NegotiationError {
        message: String,
    },
    TransportDisconnected,
    TransportReconnected,
}

/// Signaling plane seam. The orchestrator drives calls through this trait;
/// transport failures surface as events, not call-state changes.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Registers this party and returns its routable address.
    async fn open(&self) -> Result<PeerAddress, CallSessionError>;

    async fn local_address(&self) -> Option<PeerAddress>;

    async fn dial(
        &self,
        remote: &PeerAddress,
        offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError>;

    async fn accept(
        &self,
        from: &PeerAddress,
        offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError>;

    async fn close(&self, session: &NegotiatedSession) -> Result<(), CallSessionError>;

    fn events(&self) -> broadcast::Receiver<SignalingEvent>;
}

#[derive(Debug, Serialize)]
struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: String,
    sdp: String,
}

#[derive(Debug, Deserialize)]
struct OpenPeerResponse {
    peer_address: String,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NegotiateResponse {
    session_id: String,
    answer_sdp: String,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// HTTP signaling client against the realtime gateway.
pub struct HttpSignalingClient {
    client: Client,
    base_url: String,
    api_token: String,
    address: RwLock<Option<PeerAddress>>,
    events: broadcast::Sender<SignalingEvent>,
}

impl HttpSignalingClient {
    pub fn new(config: &AppConfig) -> Result<Self, CallSessionError> {
        if !config.is_signaling_configured() {
            return Err(CallSessionError::Signaling(
                "Signaling gateway not configured".to_string(),
            ));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client: Client::new(),
            base_url: config.signaling_base_url.clone(),
            api_token: config.signaling_api_token.clone(),
            address: RwLock::new(None),
            events,
        })
    }

    pub fn get_ice_servers(&self) -> Vec<IceServer> {
        vec![IceServer {
            urls: vec!["stun:stun.cloudflare.com:3478".to_string()],
            username: None,
            credential: None,
        }]
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T, CallSessionError> {
        debug!("Signaling request to {}", url);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| CallSessionError::Signaling(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| CallSessionError::Signaling(e.to_string()))?;

        if !status.is_success() {
            error!("Signaling request failed: {} - {}", status, response_text);
            return Err(CallSessionError::Signaling(format!(
                "HTTP {}: {}",
                status, response_text
            )));
        }

        serde_json::from_str(&response_text).map_err(|e| {
            CallSessionError::Signaling(format!("Failed to parse response: {}", e))
        })
    }
}

fn check_gateway_error(
    error_code: Option<String>,
    error_description: Option<String>,
) -> Result<(), CallSessionError> {
    if let Some(code) = error_code {
        let message = error_description.unwrap_or_else(|| "Unknown error".to_string());
        error!("Signaling gateway error: {} - {}", code, message);
        return Err(CallSessionError::Signaling(format!("{}: {}", code, message)));
    }
    Ok(())
}

#[async_trait]
impl SignalingTransport for HttpSignalingClient {
    async fn open(&self) -> Result<PeerAddress, CallSessionError> {
        info!("Opening signaling transport");

        let url = format!("{}/peers/new", self.base_url);
        let response: OpenPeerResponse = self.post_json(&url, &serde_json::json!({})).await?;
        check_gateway_error(response.error_code, response.error_description)?;

        let address = PeerAddress(response.peer_address);
        *self.address.write().await = Some(address.clone());

        info!("Signaling transport open as {}", address.0);
        Ok(address)
    }

    async fn local_address(&self) -> Option<PeerAddress> {
        self.address.read().await.clone()
    }

    async fn dial(
        &self,
        remote: &PeerAddress,
        offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError> {
        let local = self
            .local_address()
            .await
            .ok_or(CallSessionError::NotAddressable)?;

        info!("Dialing {} from {}", remote.0, local.0);

        let url = format!("{}/peers/{}/dial", self.base_url, remote.0);
        let body = serde_json::json!({
            "from": local.0,
            "session_description": SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: offer_sdp,
            },
        });

        let response: NegotiateResponse = self.post_json(&url, &body).await?;
        check_gateway_error(response.error_code, response.error_description)?;

        Ok(NegotiatedSession {
            session_id: response.session_id,
            answer_sdp: response.answer_sdp,
        })
    }

    async fn accept(
        &self,
        from: &PeerAddress,
        offer_sdp: String,
    ) -> Result<NegotiatedSession, CallSessionError> {
        let local = self
            .local_address()
            .await
            .ok_or(CallSessionError::NotAddressable)?;

        info!("Accepting call from {} at {}", from.0, local.0);

        let url = format!("{}/peers/{}/accept", self.base_url, local.0);
        let body = serde_json::json!({
            "from": from.0,
            "session_description": SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: offer_sdp,
            },
        });

        let response: NegotiateResponse = self.post_json(&url, &body).await?;
        check_gateway_error(response.error_code, response.error_description)?;

        Ok(NegotiatedSession {
            session_id: response.session_id,
            answer_sdp: response.answer_sdp,
        })
    }

    async fn close(&self, session: &NegotiatedSession) -> Result<(), CallSessionError> {
        info!("Closing signaling session {}", session.session_id);

        let url = format!("{}/sessions/{}/close", self.base_url, session.session_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await
            .map_err(|e| CallSessionError::Signaling(e.to_string()))?;

        // Close is best-effort: gateway sessions expire on their own.
        if !response.status().is_success() {
            warn!(
                "Session close returned {}; relying on gateway expiry",
                response.status()
            );
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

/// Re-opens the transport after a disconnect, with bounded exponential
/// backoff. Runs independently of any call: a reconnect during an active
/// call restores addressability without touching the call state.
pub async fn reconnect_transport(
    transport: &dyn SignalingTransport,
) -> Result<PeerAddress, CallSessionError> {
    let mut delay = Duration::from_millis(RECONNECT_BASE_DELAY_MS);

    for attempt in 1..=RECONNECT_ATTEMPTS {
        match transport.open().await {
            Ok(address) => {
                info!("Transport reconnected on attempt {}", attempt);
                return Ok(address);
            }
            Err(e) if attempt < RECONNECT_ATTEMPTS => {
                warn!("Reconnect attempt {} failed: {}", attempt, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("reconnect loop returns on the final attempt")
}
