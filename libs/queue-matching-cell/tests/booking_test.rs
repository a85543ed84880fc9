use assert_matches::assert_matches;
use uuid::Uuid;

use queue_matching_cell::{QueueEntryStatus, QueueMatchingError};

mod common;
use common::{test_cell, TestCell};

async fn open_facility(cell: &TestCell, average_service_minutes: i64) -> (Uuid, Uuid) {
    let facility_id = Uuid::new_v4();
    let operator_id = Uuid::new_v4();
    cell.counter
        .open_facility(facility_id, operator_id, Some(average_service_minutes))
        .await
        .unwrap();
    (facility_id, operator_id)
}

#[tokio::test]
async fn entry_gets_the_next_position_and_a_wait_estimate() {
    let cell = test_cell();
    let (facility_id, _) = open_facility(&cell, 15).await;

    // Seven entries already in line.
    for _ in 0..7 {
        cell.booking
            .request_entry(Uuid::new_v4(), facility_id)
            .await
            .unwrap();
    }

    let response = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap();

    assert_eq!(response.entry.position, 8);
    assert_eq!(response.people_ahead, 8);
    // 8 ahead at 15 minutes each, rounded to the next 5-minute step.
    assert_eq!(response.estimated_wait_minutes, 120);
}

#[tokio::test]
async fn wait_estimate_rounds_up_to_five_minutes() {
    let cell = test_cell();
    let (facility_id, operator_id) = open_facility(&cell, 15).await;

    for _ in 0..7 {
        cell.booking
            .request_entry(Uuid::new_v4(), facility_id)
            .await
            .unwrap();
    }
    let response = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap();

    // Serve the first person: 7 ahead at 15 minutes each is exactly 105.
    cell.booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();
    let status = cell.booking.entry_status(response.entry.id).await.unwrap();
    assert_eq!(status.people_ahead, 7);
    assert_eq!(status.estimated_wait_minutes, 105);
}

#[tokio::test]
async fn a_patient_cannot_hold_two_active_entries() {
    let cell = test_cell();
    let (facility_id, _) = open_facility(&cell, 10).await;
    let patient_id = Uuid::new_v4();

    cell.booking
        .request_entry(patient_id, facility_id)
        .await
        .unwrap();

    let second = cell.booking.request_entry(patient_id, facility_id).await;
    assert_matches!(second, Err(QueueMatchingError::AlreadyBooked(id)) if id == patient_id);

    // The rejected request must not have consumed a position.
    let counter = cell.counter.get_counter(facility_id).await.unwrap();
    assert_eq!(counter.total_issued, 1);
}

#[tokio::test]
async fn cancelling_frees_the_patient_but_not_the_position() {
    let cell = test_cell();
    let (facility_id, _) = open_facility(&cell, 10).await;
    let patient_id = Uuid::new_v4();

    let first = cell
        .booking
        .request_entry(patient_id, facility_id)
        .await
        .unwrap();
    let cancelled = cell
        .booking
        .cancel_entry(first.entry.id, "changed plans")
        .await
        .unwrap();
    assert_eq!(cancelled.status, QueueEntryStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("changed plans"));

    // Positions are never renumbered; the re-entry gets a fresh one.
    let second = cell
        .booking
        .request_entry(patient_id, facility_id)
        .await
        .unwrap();
    assert_eq!(second.entry.position, 2);
}

#[tokio::test]
async fn cancelling_a_completed_entry_is_rejected() {
    let cell = test_cell();
    let (facility_id, operator_id) = open_facility(&cell, 10).await;

    let entry = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;
    cell.booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();

    let result = cell.booking.cancel_entry(entry.id, "too late").await;
    assert_matches!(result, Err(QueueMatchingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn call_next_serves_the_head_and_skips_cancelled_positions() {
    let cell = test_cell();
    let (facility_id, operator_id) = open_facility(&cell, 10).await;

    let first = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;
    let second = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;
    let third = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;

    cell.booking
        .cancel_entry(second.id, "left the building")
        .await
        .unwrap();

    let served = cell
        .booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();
    assert_eq!(served.id, first.id);
    assert_eq!(served.status, QueueEntryStatus::Completed);

    // Position 2 is cancelled, so the pointer jumps straight to 3.
    let served = cell
        .booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();
    assert_eq!(served.id, third.id);

    let counter = cell.counter.get_counter(facility_id).await.unwrap();
    assert_eq!(counter.serving_pointer, 3);
}

#[tokio::test]
async fn call_next_requires_the_facility_claim() {
    let cell = test_cell();
    let (facility_id, holder) = open_facility(&cell, 10).await;
    let intruder = Uuid::new_v4();

    cell.booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap();

    assert_matches!(
        cell.booking.call_next(facility_id, intruder).await,
        Err(QueueMatchingError::FacilityClaimed { operator_id, .. }) if operator_id == holder
    );
}

#[tokio::test]
async fn call_next_on_an_empty_queue_reports_empty() {
    let cell = test_cell();
    let (facility_id, operator_id) = open_facility(&cell, 10).await;

    let result = cell.booking.call_next(facility_id, operator_id).await;
    assert_matches!(result, Err(QueueMatchingError::QueueEmpty(_)));
}

#[tokio::test]
async fn terminal_entries_report_nobody_ahead() {
    let cell = test_cell();
    let (facility_id, _) = open_facility(&cell, 10).await;

    let entry = cell
        .booking
        .request_entry(Uuid::new_v4(), facility_id)
        .await
        .unwrap()
        .entry;
    cell.booking
        .cancel_entry(entry.id, "no longer needed")
        .await
        .unwrap();

    let status = cell.booking.entry_status(entry.id).await.unwrap();
    assert_eq!(status.people_ahead, 0);
    assert_eq!(status.estimated_wait_minutes, 0);
}

// A morning at the clinic: open, fill the line, serve through it with a
// cancellation in the middle, close.
#[tokio::test]
async fn full_clinic_morning_scenario() {
    let cell = test_cell();
    let facility_id = Uuid::new_v4();
    let operator_id = Uuid::new_v4();

    cell.counter
        .open_facility(facility_id, operator_id, Some(10))
        .await
        .unwrap();

    let patients: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let mut entries = Vec::new();
    for patient in &patients {
        entries.push(
            cell.booking
                .request_entry(*patient, facility_id)
                .await
                .unwrap()
                .entry,
        );
    }

    let waiting = cell.booking.list_waiting(facility_id).await.unwrap();
    assert_eq!(
        waiting.iter().map(|e| e.position).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    cell.booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();
    cell.booking
        .cancel_entry(entries[2].id, "had to leave")
        .await
        .unwrap();
    cell.booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();

    // Pointer sits at 2; positions are never renumbered, so the derived
    // count still spans the cancelled position 3.
    let status = cell.booking.entry_status(entries[3].id).await.unwrap();
    assert_eq!(status.people_ahead, 2);

    let served = cell
        .booking
        .call_next(facility_id, operator_id)
        .await
        .unwrap();
    assert_eq!(served.id, entries[3].id);

    cell.counter
        .close_facility(facility_id, operator_id)
        .await
        .unwrap();
    assert_matches!(
        cell.booking.request_entry(Uuid::new_v4(), facility_id).await,
        Err(QueueMatchingError::FacilityClosed(_))
    );
}
