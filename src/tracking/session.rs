use crate::tracking::events::MediaEvent;
use crate::tracking::tracker::PlaybackTracker;
use std::future::Future;
use tokio::sync::broadcast::{self, error::{RecvError, TryRecvError}};
use tracing::{debug, info, warn};

/// Routes media events into the tracker until the event stream closes or `shutdown` resolves,
/// then ends the session.
///
/// Events already queued when `shutdown` resolves are dispatched before the session ends.
/// `events` should be subscribed before the media element is started so `Ready` is not missed.
pub async fn drive<S>(tracker: &PlaybackTracker, mut events: broadcast::Receiver<MediaEvent>, shutdown: S)
where
    S: Future<Output = ()>,
{
    let session = tracker.session_id();
    info!(%session, episode = tracker.episode_id(), "playback session started");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            ev = events.recv() => match ev {
                Ok(ev) => dispatch(tracker, ev),
                Err(RecvError::Lagged(n)) => {
                    warn!(%session, skipped = n, "media events lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => {
                debug!(%session, "shutdown requested");
                break;
            }
        }
    }

    // events queued before shutdown (typically the final pause) still count
    loop {
        match events.try_recv() {
            Ok(ev) => dispatch(tracker, ev),
            Err(TryRecvError::Lagged(n)) => {
                warn!(%session, skipped = n, "media events lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    tracker.on_session_end();
    info!(%session, position = tracker.position(), "playback session ended");
}

pub fn dispatch(tracker: &PlaybackTracker, ev: MediaEvent) {
    let media = tracker.media();
    match ev {
        MediaEvent::Ready => tracker.on_media_ready(media.current_time()),
        MediaEvent::Tick => tracker.on_time_observed(media.current_time()),
        MediaEvent::Seeked => tracker.on_seek(media.current_time()),
        MediaEvent::Play => tracker.on_play_started(),
        MediaEvent::Pause => tracker.on_paused(),
        MediaEvent::Ended => tracker.on_ended(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::events::TrackerEvent;
    use crate::tracking::model::{Episode, HistoryUpdate, PlaybackHistory, PlayingStatus};
    use crate::tracking::tracker::Binding;
    use crate::plugins::media::simulated::SimulatedAudio;
    use crate::plugins::registry::{HistoryApi, MediaElement};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<HistoryUpdate>>,
    }

    #[async_trait]
    impl HistoryApi for RecordingApi {
        async fn update_history(&self, episode_id: &str, update: &HistoryUpdate) -> anyhow::Result<PlaybackHistory> {
            self.calls.lock().unwrap().push(update.clone());
            Ok(PlaybackHistory {
                episode_uuid: episode_id.to_string(),
                played_up_to: update.played_up_to,
                duration: update.duration,
                playing_status: update.playing_status,
                episode_status: None,
                completion_percentage: None,
                first_played_at: None,
                last_played_at: None,
                play_count: None,
            })
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drives_simulated_audio_and_flushes_on_shutdown() {
        let api = Arc::new(RecordingApi::default());
        let episode = Episode {
            uuid: "ep-9".into(),
            podcast_uuid: "pod".into(),
            title: None,
            file_url: Some("https://cdn.example/ep-9.mp3".into()),
            duration: Some(600.0),
            published_date: None,
            file_type: None,
            size_bytes: None,
        };
        let saved = PlaybackHistory {
            episode_uuid: "ep-9".into(),
            played_up_to: 100.0,
            duration: Some(600.0),
            playing_status: PlayingStatus::InProgress,
            episode_status: None,
            completion_percentage: None,
            first_played_at: None,
            last_played_at: None,
            play_count: Some(1),
        };

        let mut audio_slot: Option<Arc<SimulatedAudio>> = None;
        let binding = PlaybackTracker::bind(&episode, Some(saved), api.clone(), |src, d| {
            let audio = Arc::new(SimulatedAudio::new(src, d));
            audio_slot = Some(audio.clone());
            audio as Arc<dyn MediaElement>
        });
        let Binding::Tracker(tracker) = binding else { panic!("expected tracker") };
        let audio = audio_slot.unwrap();
        let tracker = Arc::new(tracker);

        let events = audio.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let driver = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                drive(&tracker, events, async {
                    let _ = stop_rx.await;
                })
                .await;
            })
        };

        audio.start();
        settle().await;
        assert_eq!(audio.current_time(), 100.0);

        audio.play();
        settle().await;
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
        assert!(tracker.has_pending_sync());

        let _ = stop_tx.send(());
        driver.await.unwrap();
        settle().await;

        assert!(tracker.is_ended());
        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].played_up_to, 100.0);
        assert_eq!(calls[0].playing_status, PlayingStatus::InProgress);
        assert_eq!(calls[1].played_up_to, 103.0);
        assert!(!tracker.has_pending_sync());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_right_before_stop_is_synced() {
        let api = Arc::new(RecordingApi::default());
        let episode = Episode {
            uuid: "ep-3".into(),
            podcast_uuid: "pod".into(),
            title: None,
            file_url: Some("https://cdn.example/ep-3.mp3".into()),
            duration: Some(600.0),
            published_date: None,
            file_type: None,
            size_bytes: None,
        };

        let mut audio_slot: Option<Arc<SimulatedAudio>> = None;
        let binding = PlaybackTracker::bind(&episode, None, api.clone(), |src, d| {
            let audio = Arc::new(SimulatedAudio::new(src, d));
            audio_slot = Some(audio.clone());
            audio as Arc<dyn MediaElement>
        });
        let Binding::Tracker(tracker) = binding else { panic!("expected tracker") };
        let audio = audio_slot.unwrap();
        let tracker = Arc::new(tracker);
        let mut notes = tracker.subscribe();

        let events = audio.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let driver = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                drive(&tracker, events, async {
                    let _ = stop_rx.await;
                })
                .await;
            })
        };

        audio.start();
        audio.play();
        settle().await;
        for step in [1000, 1000, 900] {
            tokio::time::advance(Duration::from_millis(step)).await;
            settle().await;
        }

        audio.pause();
        let _ = stop_tx.send(());
        driver.await.unwrap();
        settle().await;

        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].playing_status, PlayingStatus::InProgress);
        assert!((calls[1].played_up_to - 2.9).abs() < 1e-9);

        let mut saw_refetch = false;
        while let Ok(ev) = notes.try_recv() {
            saw_refetch |= ev == TrackerEvent::HistoryUpdated(None);
        }
        assert!(saw_refetch);
    }
}
