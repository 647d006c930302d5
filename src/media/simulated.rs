//! Deterministic in-memory media source driven by a shared virtual clock.
//!
//! Used by the demo binary and every scheduler test: the playhead advances
//! lazily from [`SimClock`] time, so a test controls the passage of time
//! exactly and can inject load failures, play rejections and stalls through
//! the [`SimHandle`] returned alongside each source.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::Rc,
};

use super::{MediaEvent, MediaSource};
use crate::{
    audio::clock::{AudioClock, WallClock},
    error::MediaError,
};

/// `MEDIA_ERR_SRC_NOT_SUPPORTED`-style code raised for failing URIs.
pub const SIM_LOAD_ERROR_CODE: i32 = 4;

// ── SimClock ──────────────────────────────────────────────────────────────────

/// Shared virtual time in seconds. Cloning shares the same counter.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<f64>>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.0.get()
    }

    pub fn advance(&self, secs: f64) {
        self.0.set(self.0.get() + secs.max(0.0));
    }

    pub fn set(&self, secs: f64) {
        self.0.set(secs);
    }
}

impl AudioClock for SimClock {
    fn current_time(&self) -> f64 {
        self.now()
    }
}

impl WallClock for SimClock {
    fn now(&self) -> f64 {
        self.0.get()
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimState {
    uri: Option<String>,
    loaded_at: f64,
    ready: bool,
    errored: bool,
    ended: bool,
    playing: bool,
    duration: Option<f64>,
    position: f64,
    rate: f64,
    volume: f32,
    last_sync: f64,
    pending: Vec<MediaEvent>,

    // Test knobs
    load_latency: f64,
    default_duration: f64,
    durations: HashMap<String, f64>,
    failing: HashSet<String>,
    reject_play: bool,
    play_calls: u32,
    load_calls: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            uri: None,
            loaded_at: 0.0,
            ready: false,
            errored: false,
            ended: false,
            playing: false,
            duration: None,
            position: 0.0,
            rate: 1.0,
            volume: 1.0,
            last_sync: 0.0,
            pending: Vec::new(),
            load_latency: 0.0,
            default_duration: 180.0,
            durations: HashMap::new(),
            failing: HashSet::new(),
            reject_play: false,
            play_calls: 0,
            load_calls: 0,
        }
    }

    /// Bring readiness and the playhead up to `now`.
    fn sync(&mut self, now: f64) {
        let ready_at = self.loaded_at + self.load_latency;
        if let Some(uri) = self.uri.clone() {
            if !self.ready && !self.errored && now >= ready_at {
                if self.failing.contains(&uri) {
                    self.errored = true;
                    self.playing = false;
                    self.pending.push(MediaEvent::Error { code: SIM_LOAD_ERROR_CODE });
                } else {
                    self.ready = true;
                    self.duration = Some(
                        self.durations.get(&uri).copied().unwrap_or(self.default_duration),
                    );
                    self.pending.push(MediaEvent::CanPlay);
                }
            }
        }

        if self.playing && self.ready {
            let from = self.last_sync.max(ready_at);
            let dt = (now - from).max(0.0);
            self.position += dt * self.rate;
            if let Some(duration) = self.duration {
                if self.position >= duration {
                    self.position = duration;
                    if self.rate > 0.0 {
                        self.playing = false;
                        if !self.ended {
                            self.ended = true;
                            self.pending.push(MediaEvent::Ended);
                        }
                    }
                }
            }
            if self.position < 0.0 {
                self.position = 0.0;
            }
        }
        self.last_sync = self.last_sync.max(now);
    }
}

// ── SimulatedSource ───────────────────────────────────────────────────────────

pub struct SimulatedSource {
    clock: SimClock,
    state: Rc<RefCell<SimState>>,
}

impl SimulatedSource {
    /// Create a source plus the handle a test keeps to inspect and steer it.
    pub fn new(clock: SimClock) -> (Self, SimHandle) {
        let state = Rc::new(RefCell::new(SimState::new()));
        let handle = SimHandle {
            clock: clock.clone(),
            state: Rc::clone(&state),
        };
        (Self { clock, state }, handle)
    }

    fn synced(&self) -> std::cell::RefMut<'_, SimState> {
        let mut st = self.state.borrow_mut();
        st.sync(self.clock.now());
        st
    }
}

impl MediaSource for SimulatedSource {
    fn load(&mut self, uri: &str) -> Result<(), MediaError> {
        if uri.is_empty() {
            return Err(MediaError::Load {
                uri: uri.to_string(),
                code: SIM_LOAD_ERROR_CODE,
            });
        }
        let now = self.clock.now();
        let mut st = self.state.borrow_mut();
        st.uri = Some(uri.to_string());
        st.loaded_at = now;
        st.last_sync = now;
        st.ready = false;
        st.errored = false;
        st.ended = false;
        st.playing = false;
        st.duration = None;
        st.position = 0.0;
        // Events of the previous track are stale once a new one is loading.
        st.pending.clear();
        st.load_calls += 1;
        drop(st);
        // Zero latency resolves immediately.
        self.synced();
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let mut st = self.synced();
        if st.uri.is_none() {
            return Err(MediaError::NotLoaded);
        }
        if st.errored {
            return Err(MediaError::PlayRejected("source is in error state".to_string()));
        }
        if st.reject_play {
            return Err(MediaError::PlayRejected("playback not allowed".to_string()));
        }
        st.playing = true;
        st.play_calls += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.synced().playing = false;
    }

    fn current_time(&self) -> f64 {
        self.synced().position
    }

    fn set_current_time(&mut self, secs: f64) {
        let mut st = self.synced();
        let upper = st.duration.unwrap_or(f64::MAX);
        st.position = secs.clamp(0.0, upper);
        if st.position < upper {
            st.ended = false;
        }
    }

    fn duration(&self) -> Option<f64> {
        self.synced().duration
    }

    fn playback_rate(&self) -> f64 {
        self.state.borrow().rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        let mut st = self.synced();
        if rate.is_finite() {
            st.rate = rate;
        }
    }

    fn volume(&self) -> f32 {
        self.state.borrow().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.borrow_mut().volume = volume.clamp(0.0, 1.0);
    }

    fn is_playing(&self) -> bool {
        let st = self.synced();
        st.playing && st.ready
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        let mut st = self.synced();
        if st.playing && st.ready {
            let position = st.position;
            st.pending.push(MediaEvent::TimeUpdate { position });
        }
        std::mem::take(&mut st.pending)
    }
}

// ── SimHandle ─────────────────────────────────────────────────────────────────

/// Test-side view of a [`SimulatedSource`].
#[derive(Clone)]
pub struct SimHandle {
    clock: SimClock,
    state: Rc<RefCell<SimState>>,
}

impl SimHandle {
    fn synced(&self) -> std::cell::RefMut<'_, SimState> {
        let mut st = self.state.borrow_mut();
        st.sync(self.clock.now());
        st
    }

    pub fn position(&self) -> f64 {
        self.synced().position
    }

    pub fn rate(&self) -> f64 {
        self.state.borrow().rate
    }

    pub fn volume(&self) -> f32 {
        self.state.borrow().volume
    }

    pub fn is_playing(&self) -> bool {
        let st = self.synced();
        st.playing && st.ready
    }

    pub fn uri(&self) -> Option<String> {
        self.state.borrow().uri.clone()
    }

    pub fn play_calls(&self) -> u32 {
        self.state.borrow().play_calls
    }

    pub fn load_calls(&self) -> u32 {
        self.state.borrow().load_calls
    }

    /// Every later load of `uri` raises [`MediaEvent::Error`].
    pub fn fail_uri(&self, uri: &str) {
        self.state.borrow_mut().failing.insert(uri.to_string());
    }

    pub fn set_duration(&self, uri: &str, secs: f64) {
        self.state.borrow_mut().durations.insert(uri.to_string(), secs);
    }

    pub fn set_default_duration(&self, secs: f64) {
        self.state.borrow_mut().default_duration = secs;
    }

    /// Delay between `load` and `CanPlay`.
    pub fn set_load_latency(&self, secs: f64) {
        self.state.borrow_mut().load_latency = secs.max(0.0);
    }

    pub fn set_reject_play(&self, reject: bool) {
        self.state.borrow_mut().reject_play = reject;
    }

    /// Simulate a decode failure on the currently loaded track.
    pub fn raise_error(&self, code: i32) {
        let mut st = self.synced();
        st.errored = true;
        st.playing = false;
        st.pending.push(MediaEvent::Error { code });
    }
}
