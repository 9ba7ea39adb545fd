use crate::tracking::model::PlaybackHistory;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// `Some` carries the record returned by the backend; `None` asks the caller to refetch.
    HistoryUpdated(Option<PlaybackHistory>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    Ready,
    Tick,
    Seeked,
    Play,
    Pause,
    Ended,
}
