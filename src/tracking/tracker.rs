use crate::tracking::events::TrackerEvent;
use crate::tracking::model::{Episode, EpisodeId, HistoryUpdate, PlaybackHistory, PlayingStatus, SessionId};
use crate::tracking::policy::{self, MIN_SYNC_INTERVAL, SYNC_DEBOUNCE};
use crate::plugins::registry::{HistoryApi, MediaElement};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::trace;
use uuid::Uuid;

/// Outcome of binding an episode: either a live tracker or the "no playable source" sentinel.
pub enum Binding {
    Tracker(PlaybackTracker),
    NoAudio,
}

struct TrackerState {
    position: f64,
    duration: Option<f64>,
    history: Option<PlaybackHistory>,
    // set once this session has sent a COMPLETED payload
    sent_completed: bool,
    has_applied_initial_seek: bool,
    last_sync: Option<Instant>,
    pending_sync: Option<JoinHandle<()>>,
    in_flight: Vec<JoinHandle<()>>,
    ended: bool,
}

impl TrackerState {
    fn status(&self) -> PlayingStatus {
        if self.sent_completed {
            return PlayingStatus::Completed;
        }
        self.history.as_ref().map(|h| h.playing_status).unwrap_or_default()
    }
}

struct Inner {
    session_id: SessionId,
    episode_id: EpisodeId,
    saved_position: f64,
    media: Arc<dyn MediaElement>,
    api: Arc<dyn HistoryApi>,
    event_tx: broadcast::Sender<TrackerEvent>,
    state: Mutex<TrackerState>,
}

/// Keeps one episode's remote history in step with a live audio element.
///
/// Every entry point is synchronous and returns immediately; remote updates run as
/// detached tasks on the ambient tokio runtime and their failures are discarded.
/// Dropping the tracker ends the session exactly like [`PlaybackTracker::on_session_end`].
pub struct PlaybackTracker {
    inner: Arc<Inner>,
}

fn spawn_detached<F>(fut: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    Handle::try_current().ok().map(|h| h.spawn(fut))
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, history: Option<PlaybackHistory>) {
        let _ = self.event_tx.send(TrackerEvent::HistoryUpdated(history));
    }

    fn issue(&self, st: &mut TrackerState, update: HistoryUpdate) {
        let api = self.api.clone();
        let episode_id = self.episode_id.clone();
        trace!(session = %self.session_id, played_up_to = update.played_up_to, status = ?update.playing_status, "issuing history update");
        if update.playing_status == PlayingStatus::Completed {
            st.sent_completed = true;
        }
        let task = spawn_detached(async move {
            let _ = api.update_history(&episode_id, &update).await;
        });
        st.in_flight.retain(|h| !h.is_finished());
        st.in_flight.extend(task);
    }

    /// Rate-limited full-state sync.
    fn sync_now(&self, st: &mut TrackerState) {
        if self.episode_id.is_empty() {
            return;
        }
        let Some(update) = policy::sync_payload(st.position, st.duration, st.status()) else {
            return;
        };

        let now = Instant::now();
        if let Some(last) = st.last_sync {
            if now.duration_since(last) < MIN_SYNC_INTERVAL {
                trace!(session = %self.session_id, "sync dropped by rate limit");
                return;
            }
        }
        st.last_sync = Some(now);
        self.issue(st, update);
    }

    fn schedule_sync(self: &Arc<Self>, st: &mut TrackerState) {
        if st.pending_sync.is_some() {
            return;
        }
        let inner = Arc::clone(self);
        let deadline = Instant::now() + SYNC_DEBOUNCE;
        st.pending_sync = spawn_detached(async move {
            tokio::time::sleep_until(deadline).await;
            let mut st = inner.state();
            st.pending_sync = None;
            if st.ended {
                return;
            }
            inner.sync_now(&mut st);
        });
    }

    fn finish(&self) {
        let mut st = self.state();
        if st.ended {
            return;
        }
        st.ended = true;
        if let Some(timer) = st.pending_sync.take() {
            timer.abort();
        }
        self.sync_now(&mut st);
    }
}

impl PlaybackTracker {
    /// Binds a tracker to `episode`. `make_media` is only called when the episode has an audio source.
    pub fn bind<F>(
        episode: &Episode,
        initial_history: Option<PlaybackHistory>,
        api: Arc<dyn HistoryApi>,
        make_media: F,
    ) -> Binding
    where
        F: FnOnce(&str, Option<f64>) -> Arc<dyn MediaElement>,
    {
        let Some(src) = episode.audio_source() else {
            return Binding::NoAudio;
        };
        let duration = episode.known_duration();
        let media = make_media(src, duration);

        let saved_position = initial_history
            .as_ref()
            .map(|h| h.played_up_to)
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(0.0);

        let (event_tx, _) = broadcast::channel(32);
        let inner = Inner {
            session_id: Uuid::new_v4(),
            episode_id: episode.uuid.clone(),
            saved_position,
            media,
            api,
            event_tx,
            state: Mutex::new(TrackerState {
                position: saved_position,
                duration,
                history: initial_history,
                sent_completed: false,
                has_applied_initial_seek: false,
                last_sync: None,
                pending_sync: None,
                in_flight: Vec::new(),
                ended: false,
            }),
        };
        Binding::Tracker(Self { inner: Arc::new(inner) })
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn episode_id(&self) -> &str {
        &self.inner.episode_id
    }

    pub fn media(&self) -> &Arc<dyn MediaElement> {
        &self.inner.media
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn position(&self) -> f64 {
        self.inner.state().position
    }

    pub fn status(&self) -> PlayingStatus {
        self.inner.state().status()
    }

    pub fn has_pending_sync(&self) -> bool {
        self.inner.state().pending_sync.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.state().ended
    }

    /// Replaces the cached record with one the caller refetched. Never moves the position.
    pub fn apply_history(&self, history: PlaybackHistory) {
        let mut st = self.inner.state();
        if !st.ended {
            st.history = Some(history);
        }
    }

    pub fn on_media_ready(&self, current_audio_time: f64) {
        let mut st = self.inner.state();
        if st.ended {
            return;
        }
        if st.duration.is_none() {
            st.duration = self.inner.media.duration().filter(|d| d.is_finite() && *d > 0.0);
        }
        trace!(session = %self.inner.session_id, current_audio_time, saved = self.inner.saved_position, "media ready");
        if self.inner.saved_position > 0.0 && !st.has_applied_initial_seek {
            st.has_applied_initial_seek = true;
            self.inner.media.set_current_time(self.inner.saved_position);
            st.position = self.inner.saved_position;
        }
    }

    pub fn on_time_observed(&self, audio_time: f64) {
        let mut st = self.inner.state();
        if st.ended {
            return;
        }
        st.position = audio_time;
        self.inner.schedule_sync(&mut st);
    }

    pub fn on_seek(&self, audio_time: f64) {
        let mut st = self.inner.state();
        if st.ended {
            return;
        }
        st.position = audio_time;
        self.inner.sync_now(&mut st);
    }

    /// Marks the episode in progress unless it is already completed.
    pub fn on_play_started(&self) {
        let mut st = self.inner.state();
        if st.ended || self.inner.episode_id.is_empty() || st.status() == PlayingStatus::Completed {
            return;
        }
        let update = HistoryUpdate {
            played_up_to: st.position,
            duration: st.duration,
            playing_status: PlayingStatus::InProgress,
        };

        let inner = Arc::clone(&self.inner);
        let task = spawn_detached(async move {
            if let Ok(history) = inner.api.update_history(&inner.episode_id, &update).await {
                {
                    let mut st = inner.state();
                    if !st.ended {
                        st.history = Some(history.clone());
                    }
                }
                inner.notify(Some(history));
            }
        });
        st.in_flight.retain(|h| !h.is_finished());
        st.in_flight.extend(task);
    }

    pub fn on_paused(&self) {
        {
            let mut st = self.inner.state();
            if st.ended {
                return;
            }
            self.inner.sync_now(&mut st);
        }
        self.inner.notify(None);
    }

    pub fn on_ended(&self) {
        {
            let mut st = self.inner.state();
            if st.ended {
                return;
            }
            if let Some(d) = st.duration {
                st.position = d;
            }
            self.inner.sync_now(&mut st);
        }
        self.inner.notify(None);
    }

    /// Cancels the debounce timer and issues the final sync. Later events are ignored.
    pub fn on_session_end(&self) {
        self.inner.finish();
    }

    /// Waits up to `limit` for updates issued so far. Meant for hosts that are about to exit.
    pub async fn drain(&self, limit: Duration) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.inner.state().in_flight);
        let _ = tokio::time::timeout(limit, async {
            for h in handles {
                let _ = h.await;
            }
        })
        .await;
    }
}

impl Drop for PlaybackTracker {
    fn drop(&mut self) {
        self.inner.finish();
    }
}
