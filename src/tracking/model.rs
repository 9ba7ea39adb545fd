use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EpisodeId = String;
pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", from = "i64")]
pub enum PlayingStatus {
    #[default]
    NotPlayed,
    InProgress,
    Completed,
}

impl PlayingStatus {
    pub fn code(self) -> u8 {
        match self {
            PlayingStatus::NotPlayed => 1,
            PlayingStatus::InProgress => 2,
            PlayingStatus::Completed => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlayingStatus::NotPlayed => "not played",
            PlayingStatus::InProgress => "in progress",
            PlayingStatus::Completed => "completed",
        }
    }
}

impl From<PlayingStatus> for u8 {
    fn from(s: PlayingStatus) -> u8 {
        s.code()
    }
}

// The backend defaults the column to 0, so anything outside 1..=3 reads as not played.
impl From<i64> for PlayingStatus {
    fn from(v: i64) -> Self {
        match v {
            2 => PlayingStatus::InProgress,
            3 => PlayingStatus::Completed,
            _ => PlayingStatus::NotPlayed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub uuid: EpisodeId,
    #[serde(default)]
    pub podcast_uuid: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub published_date: Option<f64>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

impl Episode {
    /// Duration in seconds, only when the backend knows a positive value.
    pub fn known_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn audio_source(&self) -> Option<&str> {
        self.file_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackHistory {
    #[serde(default)]
    pub episode_uuid: EpisodeId,
    #[serde(default)]
    pub played_up_to: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub playing_status: PlayingStatus,
    #[serde(default)]
    pub episode_status: Option<i64>,
    #[serde(default)]
    pub completion_percentage: Option<f64>,
    #[serde(default)]
    pub first_played_at: Option<String>,
    #[serde(default)]
    pub last_played_at: Option<String>,
    #[serde(default)]
    pub play_count: Option<i64>,
}

/// Body of `PUT /episodes/{id}/history`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryUpdate {
    pub played_up_to: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub playing_status: PlayingStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaySession {
    pub started_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub played_from: f64,
    #[serde(default)]
    pub played_to: f64,
}
