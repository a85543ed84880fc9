use crate::models::{AlertThreshold, QueueAlert, ThresholdDecision};

/// Threshold for a people-ahead count, evaluated in precedence order.
pub fn threshold_for(people_ahead: i64) -> Option<AlertThreshold> {
    if people_ahead <= 0 {
        Some(AlertThreshold::YourTurn)
    } else if people_ahead == 1 {
        Some(AlertThreshold::Next)
    } else if people_ahead <= 3 {
        Some(AlertThreshold::Almost)
    } else if people_ahead <= 5 {
        Some(AlertThreshold::Soon)
    } else {
        None
    }
}

/// The one decision function both delivery paths (push feed and poll
/// fallback) run through. Pure: derives the next action solely from the
/// current snapshot and the last-fired marker, so redundant or out-of-order
/// snapshots converge on the same outcome.
///
/// An alert fires only when the computed threshold differs from the last
/// fired one. No monotonicity is assumed: a jump back above the ladder
/// clears the marker, so re-entering a threshold later fires again.
pub fn evaluate(people_ahead: i64, last_fired: Option<AlertThreshold>) -> ThresholdDecision {
    let threshold = threshold_for(people_ahead);

    let alert = match threshold {
        Some(current) if last_fired != Some(current) => {
            Some(QueueAlert::new(current, people_ahead))
        }
        _ => None,
    };

    ThresholdDecision { threshold, alert }
}
