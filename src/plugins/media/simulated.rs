use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::tracking::events::MediaEvent;
use crate::tracking::policy::LISTEN_INTERVAL;
use crate::plugins::registry::MediaElement;

pub const PLAYBACK_SPEEDS: [f64; 8] = [1.0, 1.15, 1.25, 1.5, 1.75, 2.0, 2.5, 3.0];
pub const JUMP_STEP_SECS: f64 = 30.0;

const MIN_RATE: f64 = 0.25;
const MAX_RATE: f64 = 4.0;

struct AudioState {
    position: f64,
    rate: f64,
    playing: bool,
    // wall-clock point `position` was last folded at, while playing
    anchor: Option<Instant>,
    ended: bool,
    ticker: Option<JoinHandle<()>>,
}

/// Clock-driven stand-in for an audio element: position advances in real time
/// scaled by the playback rate while playing, and a tick fires every listen interval.
pub struct SimulatedAudio {
    src: String,
    duration: Option<f64>,
    state: Mutex<AudioState>,
    event_tx: broadcast::Sender<MediaEvent>,
}

impl SimulatedAudio {
    pub fn new(src: &str, duration: Option<f64>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            src: src.to_string(),
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
            state: Mutex::new(AudioState {
                position: 0.0,
                rate: 1.0,
                playing: false,
                anchor: None,
                ended: false,
                ticker: None,
            }),
            event_tx,
        }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    fn state(&self) -> MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, ev: MediaEvent) {
        let _ = self.event_tx.send(ev);
    }

    fn clamp(&self, secs: f64) -> f64 {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        match self.duration {
            Some(d) => secs.min(d),
            None => secs,
        }
    }

    /// Folds elapsed playing time into `position` and re-anchors at `now`.
    fn settle(&self, st: &mut AudioState) {
        if let (true, Some(anchor)) = (st.playing, st.anchor) {
            let now = Instant::now();
            let elapsed = now.duration_since(anchor).as_secs_f64();
            st.position = self.clamp(st.position + elapsed * st.rate);
            st.anchor = Some(now);
        }
    }

    /// Loads metadata (emits `Ready`) and starts the listen ticker.
    pub fn start(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let first = Instant::now() + LISTEN_INTERVAL;
        let ticker = tokio::spawn(async move {
            let mut iv = interval_at(first, LISTEN_INTERVAL);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                iv.tick().await;
                match weak.upgrade() {
                    Some(audio) => audio.tick(),
                    None => break,
                }
            }
        });
        let previous = self.state().ticker.replace(ticker);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.emit(MediaEvent::Ready);
    }

    fn tick(&self) {
        let mut events = Vec::new();
        {
            let mut st = self.state();
            if !st.playing {
                return;
            }
            self.settle(&mut st);
            events.push(MediaEvent::Tick);
            if let Some(d) = self.duration {
                if st.position >= d && !st.ended {
                    st.playing = false;
                    st.anchor = None;
                    st.ended = true;
                    events.push(MediaEvent::Ended);
                }
            }
        }
        for ev in events {
            self.emit(ev);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state().playing
    }

    pub fn play(&self) {
        {
            let mut st = self.state();
            if st.playing {
                return;
            }
            if st.ended {
                st.position = 0.0;
                st.ended = false;
            }
            st.playing = true;
            st.anchor = Some(Instant::now());
        }
        self.emit(MediaEvent::Play);
    }

    pub fn pause(&self) {
        {
            let mut st = self.state();
            if !st.playing {
                return;
            }
            self.settle(&mut st);
            st.playing = false;
            st.anchor = None;
        }
        // final time update so listeners see the paused position
        self.emit(MediaEvent::Tick);
        self.emit(MediaEvent::Pause);
    }

    pub fn toggle(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// User scrub: moves the position and emits `Seeked`.
    pub fn seek(&self, secs: f64) {
        self.move_to(secs);
        self.emit(MediaEvent::Seeked);
    }

    pub fn jump(&self, delta: f64) {
        let target = self.current_time() + delta;
        self.seek(target);
    }

    fn move_to(&self, secs: f64) {
        let mut st = self.state();
        self.settle(&mut st);
        st.position = self.clamp(secs);
        if self.duration.map_or(true, |d| st.position < d) {
            st.ended = false;
        }
    }

    /// Stops the ticker; the element stays readable.
    pub fn close(&self) {
        let mut st = self.state();
        self.settle(&mut st);
        st.playing = false;
        st.anchor = None;
        if let Some(t) = st.ticker.take() {
            t.abort();
        }
    }
}

impl Drop for SimulatedAudio {
    fn drop(&mut self) {
        if let Some(t) = self.state().ticker.take() {
            t.abort();
        }
    }
}

impl MediaElement for SimulatedAudio {
    fn current_time(&self) -> f64 {
        let mut st = self.state();
        self.settle(&mut st);
        st.position
    }

    fn set_current_time(&self, secs: f64) {
        self.move_to(secs);
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn playback_rate(&self) -> f64 {
        self.state().rate
    }

    fn set_playback_rate(&self, rate: f64) {
        let mut st = self.state();
        self.settle(&mut st);
        st.rate = if rate.is_finite() { rate.clamp(MIN_RATE, MAX_RATE) } else { 1.0 };
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.event_tx.subscribe()
    }
}
