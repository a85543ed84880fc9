use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Threshold ladder a waiting party crosses on the way to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertThreshold {
    Soon,
    Almost,
    Next,
    YourTurn,
}

impl AlertThreshold {
    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertThreshold::Soon => AlertSeverity::Normal,
            AlertThreshold::Almost => AlertSeverity::Urgent,
            AlertThreshold::Next | AlertThreshold::YourTurn => AlertSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Normal,
    Urgent,
    Critical,
}

/// One logical alert. The evaluator emits at most one of these per
/// evaluation; every delivery channel is a sink fed from the same event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAlert {
    pub threshold: AlertThreshold,
    pub severity: AlertSeverity,
    pub title: String,
    pub body: String,
    pub people_ahead: i64,
    pub fired_at: DateTime<Utc>,
}

impl QueueAlert {
    pub fn new(threshold: AlertThreshold, people_ahead: i64) -> Self {
        let (title, body) = match threshold {
            AlertThreshold::Soon => (
                "Your turn is coming up",
                "Fewer than six people are ahead of you.",
            ),
            AlertThreshold::Almost => (
                "Almost there",
                "Three or fewer people are ahead of you. Please stay nearby.",
            ),
            AlertThreshold::Next => (
                "You are next",
                "One person is ahead of you. Please be ready.",
            ),
            AlertThreshold::YourTurn => ("It's your turn", "Please proceed now."),
        };

        Self {
            threshold,
            severity: threshold.severity(),
            title: title.to_string(),
            body: body.to_string(),
            people_ahead,
            fired_at: Utc::now(),
        }
    }
}

/// Result of one evaluation: the threshold now in effect (the new last-fired
/// marker) and the alert to deliver, if the threshold changed.
#[derive(Debug, Clone)]
pub struct ThresholdDecision {
    pub threshold: Option<AlertThreshold>,
    pub alert: Option<QueueAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Default,
}

/// What a watcher observes: a facility waiting-list entry or an on-demand
/// consultation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchTarget {
    FacilityEntry { entry_id: Uuid },
    ConsultationRequest { request_id: Uuid },
}

impl WatchTarget {
    pub fn watch_id(&self) -> Uuid {
        match self {
            WatchTarget::FacilityEntry { entry_id } => *entry_id,
            WatchTarget::ConsultationRequest { request_id } => *request_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterWatchPayload {
    pub target: WatchTarget,
}
