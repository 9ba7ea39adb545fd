use crate::tracking::model::{HistoryUpdate, PlayingStatus};
use std::time::Duration;

pub const COMPLETION_THRESHOLD: f64 = 0.95;
pub const SYNC_DEBOUNCE: Duration = Duration::from_secs(5);
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);
pub const LISTEN_INTERVAL: Duration = Duration::from_secs(1);

pub fn is_completed(position: f64, duration: Option<f64>) -> bool {
    match duration {
        Some(d) if d > 0.0 => position >= d * COMPLETION_THRESHOLD,
        _ => false,
    }
}

/// Full-state payload for a position sync, or `None` when there is nothing worth reporting.
pub fn sync_payload(position: f64, duration: Option<f64>, last_status: PlayingStatus) -> Option<HistoryUpdate> {
    let duration = duration.filter(|d| *d > 0.0);
    if position <= 0.0 && duration.is_none() {
        return None;
    }

    let playing_status = if is_completed(position, duration) {
        PlayingStatus::Completed
    } else {
        last_status
    };

    Some(HistoryUpdate { played_up_to: position, duration, playing_status })
}
