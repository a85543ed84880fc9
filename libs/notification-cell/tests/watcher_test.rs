use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use notification_cell::models::{AlertSeverity, AlertThreshold, PermissionState, WatchTarget};
use notification_cell::services::delivery::{AlertDispatcher, DeliveryChannel};
use notification_cell::services::watcher::{AlertStateRegistry, QueueWatcher};
use queue_matching_cell::services::{
    booking::BookingService, counter::FacilityCounterService,
    virtual_queue::ConsultationQueueService,
};
use shared_database::{MemoryStore, SharedStore};

#[derive(Default)]
struct RecordingChannel {
    delivered: Mutex<Vec<(String, AlertSeverity)>>,
    vibrations: Mutex<Vec<Vec<u64>>>,
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn request_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn deliver(&self, title: &str, _body: &str, severity: AlertSeverity) {
        self.delivered
            .lock()
            .await
            .push((title.to_string(), severity));
    }

    async fn vibrate(&self, pattern: &[u64]) {
        self.vibrations.lock().await.push(pattern.to_vec());
    }

    async fn play_tone(&self, _severity: AlertSeverity) {}
}

struct Fixture {
    store: Arc<dyn SharedStore>,
    booking: Arc<BookingService>,
    consultations: Arc<ConsultationQueueService>,
    counter: Arc<FacilityCounterService>,
    registry: Arc<AlertStateRegistry>,
    channel: Arc<RecordingChannel>,
    dispatcher: Arc<AlertDispatcher>,
}

fn fixture() -> Fixture {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(FacilityCounterService::new(store.clone()));
    let booking = Arc::new(BookingService::new(store.clone(), counter.clone()));
    let consultations = Arc::new(ConsultationQueueService::new(store.clone()));
    let registry = Arc::new(AlertStateRegistry::new());
    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = Arc::new(AlertDispatcher::new(channel.clone()));

    Fixture {
        store,
        booking,
        consultations,
        counter,
        registry,
        channel,
        dispatcher,
    }
}

impl Fixture {
    fn watcher_for(&self, target: WatchTarget) -> QueueWatcher {
        QueueWatcher::new(
            target,
            self.store.clone(),
            self.booking.clone(),
            self.consultations.clone(),
            self.registry.clone(),
            self.dispatcher.clone(),
            std::time::Duration::from_secs(60),
        )
    }
}

#[tokio::test]
async fn watcher_alerts_as_the_line_shrinks() {
    let f = fixture();
    let facility_id = Uuid::new_v4();
    let operator_id = Uuid::new_v4();
    f.counter
        .open_facility(facility_id, operator_id, Some(10))
        .await
        .unwrap();

    // Two ahead of the watched patient.
    f.booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap();
    f.booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap();
    let entry = f
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;

    let watcher = f.watcher_for(WatchTarget::FacilityEntry { entry_id: entry.id });

    let alert = watcher.refresh(false).await.unwrap();
    assert_eq!(alert.threshold, AlertThreshold::Almost);

    // Same snapshot again: nothing new fires.
    assert!(watcher.refresh(false).await.is_none());

    f.booking.call_next(facility_id, operator_id).await.unwrap();
    f.booking.call_next(facility_id, operator_id).await.unwrap();

    let alert = watcher.refresh(false).await.unwrap();
    assert_eq!(alert.threshold, AlertThreshold::Next);

    let delivered = f.channel.delivered.lock().await;
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].1, AlertSeverity::Critical);
}

#[tokio::test]
async fn push_and_poll_paths_share_one_marker() {
    let f = fixture();
    let request = f
        .consultations
        .submit_request(Uuid::new_v4(), "peer-a".to_string())
        .await
        .unwrap();

    let target = WatchTarget::ConsultationRequest {
        request_id: request.id,
    };
    let watcher = f.watcher_for(target);

    // The server-side watcher fires first.
    let alert = watcher.refresh(false).await.unwrap();
    assert_eq!(alert.threshold, AlertThreshold::YourTurn);

    // The client poll runs through the same registry and stays quiet.
    let polled = f.registry.evaluate(request.id, 0).await;
    assert!(polled.is_none());

    assert_eq!(f.channel.delivered.lock().await.len(), 1);
}

#[tokio::test]
async fn visible_surface_suppresses_push_but_not_haptics() {
    let f = fixture();
    let request = f
        .consultations
        .submit_request(Uuid::new_v4(), "peer-a".to_string())
        .await
        .unwrap();

    let watcher = f.watcher_for(WatchTarget::ConsultationRequest {
        request_id: request.id,
    });

    let alert = watcher.refresh(true).await.unwrap();
    assert_eq!(alert.threshold, AlertThreshold::YourTurn);

    assert!(f.channel.delivered.lock().await.is_empty());
    // Critical alerts still escalate through vibration.
    assert_eq!(
        f.channel.vibrations.lock().await.as_slice(),
        &[vec![400, 100, 400, 100, 400]]
    );
}

#[tokio::test]
async fn finished_targets_stop_alerting() {
    let f = fixture();
    let request = f
        .consultations
        .submit_request(Uuid::new_v4(), "peer-a".to_string())
        .await
        .unwrap();

    let watcher = f.watcher_for(WatchTarget::ConsultationRequest {
        request_id: request.id,
    });
    watcher.refresh(false).await.unwrap();

    f.consultations
        .cancel(request.id, "gave up waiting")
        .await
        .unwrap();

    assert!(watcher.refresh(false).await.is_none());
    assert_eq!(f.channel.delivered.lock().await.len(), 1);
}
