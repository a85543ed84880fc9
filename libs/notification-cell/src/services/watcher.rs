use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast::error::RecvError, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use queue_matching_cell::services::{
    booking::BookingService, virtual_queue::ConsultationQueueService,
};
use queue_matching_cell::{
    ConsultationStatus, QueueEntryStatus, CONSULTATION_REQUESTS, FACILITY_COUNTERS,
};
use shared_database::SharedStore;

use crate::models::{AlertThreshold, QueueAlert, WatchTarget};
use crate::services::delivery::AlertDispatcher;
use crate::services::threshold::evaluate;

/// Last-fired markers, one per watch. Both delivery paths evaluate through
/// this registry, so a position update arriving over the change feed and the
/// same update fetched by a poll cannot double-fire.
#[derive(Default)]
pub struct AlertStateRegistry {
    states: RwLock<HashMap<Uuid, Option<AlertThreshold>>>,
}

impl AlertStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the threshold evaluator against the stored marker and advances
    /// it. At most one alert per distinct threshold crossing.
    pub async fn evaluate(&self, watch_id: Uuid, people_ahead: i64) -> Option<QueueAlert> {
        let mut states = self.states.write().await;
        let last_fired = states.get(&watch_id).copied().flatten();
        let decision = evaluate(people_ahead, last_fired);
        states.insert(watch_id, decision.threshold);
        decision.alert
    }

    pub async fn last_fired(&self, watch_id: Uuid) -> Option<AlertThreshold> {
        self.states.read().await.get(&watch_id).copied().flatten()
    }

    pub async fn forget(&self, watch_id: Uuid) {
        self.states.write().await.remove(&watch_id);
    }
}

/// Server-side reactive loop for one waiting party: the store's change feed
/// is raced against a fixed-interval poll, and both inputs converge on the
/// same snapshot recomputation. Applying the same snapshot twice is a no-op.
pub struct QueueWatcher {
    target: WatchTarget,
    store: Arc<dyn SharedStore>,
    booking: Arc<BookingService>,
    consultations: Arc<ConsultationQueueService>,
    registry: Arc<AlertStateRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    poll_interval: Duration,
}

impl QueueWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: WatchTarget,
        store: Arc<dyn SharedStore>,
        booking: Arc<BookingService>,
        consultations: Arc<ConsultationQueueService>,
        registry: Arc<AlertStateRegistry>,
        dispatcher: Arc<AlertDispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            target,
            store,
            booking,
            consultations,
            registry,
            dispatcher,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let collection = match self.target {
            WatchTarget::FacilityEntry { .. } => FACILITY_COUNTERS,
            WatchTarget::ConsultationRequest { .. } => CONSULTATION_REQUESTS,
        };
        let mut feed = self.store.subscribe(collection);
        let mut poll = tokio::time::interval(self.poll_interval);

        info!("Watcher started for {:?}", self.target);

        loop {
            tokio::select! {
                event = feed.recv() => match event {
                    // A lagged feed is fine: the refresh reads a fresh
                    // snapshot rather than replaying the missed deltas.
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if self.refresh(false).await.is_none() && self.target_finished().await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = poll.tick() => {
                    if self.refresh(false).await.is_none() && self.target_finished().await {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.registry.forget(self.target.watch_id()).await;
        info!("Watcher stopped for {:?}", self.target);
    }

    /// Recomputes people-ahead from the current snapshot and feeds it through
    /// the shared evaluator, dispatching the alert when one fires.
    pub async fn refresh(&self, surface_visible: bool) -> Option<QueueAlert> {
        let people_ahead = match self.fetch_people_ahead().await {
            Ok(Some(people_ahead)) => people_ahead,
            Ok(None) => return None,
            Err(e) => {
                warn!("Watcher refresh failed for {:?}: {}", self.target, e);
                return None;
            }
        };

        let alert = self
            .registry
            .evaluate(self.target.watch_id(), people_ahead)
            .await;

        if let Some(alert) = &alert {
            debug!(
                "Threshold {:?} crossed for {:?} ({} ahead)",
                alert.threshold, self.target, people_ahead
            );
            self.dispatcher.dispatch(alert, surface_visible).await;
        }
        alert
    }

    /// None when the watched party is no longer waiting.
    async fn fetch_people_ahead(
        &self,
    ) -> Result<Option<i64>, queue_matching_cell::QueueMatchingError> {
        match self.target {
            WatchTarget::FacilityEntry { entry_id } => {
                let status = self.booking.entry_status(entry_id).await?;
                match status.entry.status {
                    QueueEntryStatus::Waiting | QueueEntryStatus::Called => {
                        Ok(Some(status.people_ahead))
                    }
                    _ => Ok(None),
                }
            }
            WatchTarget::ConsultationRequest { request_id } => {
                let position = self.consultations.position_of(request_id).await?;
                match position.request.status {
                    ConsultationStatus::Waiting => Ok(Some(position.people_ahead)),
                    _ => Ok(None),
                }
            }
        }
    }

    async fn target_finished(&self) -> bool {
        matches!(self.fetch_people_ahead().await, Ok(None))
    }
}
