use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{AlertSeverity, PermissionState, QueueAlert};

/// Outbound delivery surface: system notifications, haptics, audio. The
/// engine treats this as a sink; it never decides *whether* to alert.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn request_permission(&self) -> PermissionState;

    async fn deliver(&self, title: &str, body: &str, severity: AlertSeverity);

    async fn vibrate(&self, pattern: &[u64]);

    async fn play_tone(&self, severity: AlertSeverity);
}

/// Default channel: everything lands in the log. Deployments plug a real
/// push/haptics channel in through the trait.
pub struct TracingDeliveryChannel;

#[async_trait]
impl DeliveryChannel for TracingDeliveryChannel {
    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn deliver(&self, title: &str, body: &str, severity: AlertSeverity) {
        info!("Notification [{:?}] {}: {}", severity, title, body);
    }

    async fn vibrate(&self, pattern: &[u64]) {
        debug!("Vibration pattern: {:?}", pattern);
    }

    async fn play_tone(&self, severity: AlertSeverity) {
        debug!("Alert tone for severity {:?}", severity);
    }
}

/// Escalation behaviour per severity.
pub fn vibration_pattern(severity: AlertSeverity) -> &'static [u64] {
    match severity {
        AlertSeverity::Normal => &[200],
        AlertSeverity::Urgent => &[200, 100, 200],
        AlertSeverity::Critical => &[400, 100, 400, 100, 400],
    }
}

/// Critical alerts stay on screen until explicitly acknowledged.
pub fn requires_interaction(severity: AlertSeverity) -> bool {
    matches!(severity, AlertSeverity::Critical)
}

/// Fans one fired alert out to the delivery side effects. Runs once per
/// logical alert; the push-style delivery is suppressed while the consuming
/// surface is visible because the in-app banner already covers it.
pub struct AlertDispatcher {
    channel: Arc<dyn DeliveryChannel>,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn DeliveryChannel>) -> Self {
        Self { channel }
    }

    pub async fn dispatch(&self, alert: &QueueAlert, surface_visible: bool) {
        if surface_visible {
            debug!(
                "Surface visible, suppressing push delivery for {:?}",
                alert.threshold
            );
        } else {
            self.channel
                .deliver(&alert.title, &alert.body, alert.severity)
                .await;
        }

        self.channel
            .vibrate(vibration_pattern(alert.severity))
            .await;
        self.channel.play_tone(alert.severity).await;
    }
}
