use std::sync::Arc;

use shared_database::{MemoryStore, SharedStore};

use queue_matching_cell::services::{
    booking::BookingService, counter::FacilityCounterService,
    virtual_queue::ConsultationQueueService,
};

// Not every test file touches every service.
#[allow(dead_code)]
pub struct TestCell {
    pub store: Arc<dyn SharedStore>,
    pub counter: Arc<FacilityCounterService>,
    pub booking: Arc<BookingService>,
    pub consultations: Arc<ConsultationQueueService>,
}

pub fn test_cell() -> TestCell {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let counter = Arc::new(FacilityCounterService::new(store.clone()));
    let booking = Arc::new(BookingService::new(store.clone(), counter.clone()));
    let consultations = Arc::new(ConsultationQueueService::new(store.clone()));

    TestCell {
        store,
        counter,
        booking,
        consultations,
    }
}
