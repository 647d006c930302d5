use serde::{Deserialize, Serialize};

use super::emitter::{DeckEmitter, Listener};
use crate::{
    error::MediaError,
    media::{MediaEvent, MediaSource},
    queue::Track,
};

// ── DeckId / DeckRole ─────────────────────────────────────────────────────────

/// One of the two playback channels. Identities never change; roles swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckId {
    DeckA,
    DeckB,
}

impl DeckId {
    pub const ALL: [DeckId; 2] = [DeckId::DeckA, DeckId::DeckB];

    pub fn index(self) -> usize {
        match self {
            DeckId::DeckA => 0,
            DeckId::DeckB => 1,
        }
    }

    pub fn other(self) -> DeckId {
        match self {
            DeckId::DeckA => DeckId::DeckB,
            DeckId::DeckB => DeckId::DeckA,
        }
    }
}

impl std::fmt::Display for DeckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckId::DeckA => write!(f, "deck_a"),
            DeckId::DeckB => write!(f, "deck_b"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckRole {
    Active,
    Idle,
}

/// Deck playback states, exposed to the host in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckState {
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// Active loop region in track seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

// ── Deck ──────────────────────────────────────────────────────────────────────

/// One playback channel: a media source plus the track it holds.
///
/// Gain lives in the audio graph; the deck only owns transport.
pub struct Deck {
    pub id: DeckId,
    pub role: DeckRole,
    pub state: DeckState,
    pub track: Option<Track>,
    source: Box<dyn MediaSource>,
    loop_region: Option<LoopRegion>,
}

impl Deck {
    pub fn new(id: DeckId, role: DeckRole, source: Box<dyn MediaSource>) -> Self {
        Self {
            id,
            role,
            state: DeckState::Empty,
            track: None,
            source,
            loop_region: None,
        }
    }

    /// Request a load. Readiness arrives later as `CanPlay`.
    pub fn load(&mut self, track: Track) -> Result<(), MediaError> {
        self.loop_region = None;
        self.source.pause();
        match self.source.load(&track.uri) {
            Ok(()) => {
                log::debug!("[{}] loading {}", self.id, track.uri);
                self.track = Some(track);
                self.state = DeckState::Loading;
                Ok(())
            }
            Err(e) => {
                self.track = Some(track);
                self.state = DeckState::Error;
                Err(e)
            }
        }
    }

    pub fn play(&mut self) -> Result<(), MediaError> {
        self.source.play()?;
        self.state = DeckState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.source.pause();
        if self.state == DeckState::Playing {
            self.state = DeckState::Paused;
        }
    }

    /// Pause and rewind, keeping the loaded track.
    pub fn stop(&mut self) {
        self.source.pause();
        self.source.set_current_time(0.0);
        self.loop_region = None;
        if matches!(self.state, DeckState::Playing | DeckState::Paused) {
            self.state = DeckState::Stopped;
        }
    }

    /// Forget the loaded track entirely.
    pub fn eject(&mut self) {
        self.source.pause();
        self.track = None;
        self.loop_region = None;
        self.state = DeckState::Empty;
    }

    pub fn seek(&mut self, secs: f64) {
        let upper = self.duration().unwrap_or(f64::MAX);
        self.source.set_current_time(secs.clamp(0.0, upper));
    }

    pub fn position(&self) -> f64 {
        self.source.current_time()
    }

    /// Known duration: the source's once loaded, else the queue metadata.
    pub fn duration(&self) -> Option<f64> {
        self.source
            .duration()
            .or_else(|| self.track.as_ref().and_then(|t| t.duration))
            .filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn rate(&self) -> f64 {
        self.source.playback_rate()
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.source.set_playback_rate(rate);
    }

    pub fn volume(&self) -> f32 {
        self.source.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.source.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn is_playing(&self) -> bool {
        self.source.is_playing()
    }

    /// True once the loaded track can start without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state,
            DeckState::Ready | DeckState::Playing | DeckState::Paused | DeckState::Stopped
        )
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.id.as_str())
    }

    pub fn set_loop(&mut self, region: LoopRegion) {
        self.loop_region = Some(region);
    }

    pub fn clear_loop(&mut self) {
        self.loop_region = None;
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    /// Seek back to the loop start once the playhead passes the loop end.
    /// Returns true when a jump happened.
    pub fn enforce_loop(&mut self) -> bool {
        let Some(region) = self.loop_region else {
            return false;
        };
        if self.source.current_time() >= region.end {
            self.source.set_current_time(region.start);
            return true;
        }
        false
    }

    /// Drain source events and fold them into the deck state.
    pub fn poll(&mut self) -> Vec<MediaEvent> {
        let events = self.source.poll_events();
        for event in &events {
            match event {
                MediaEvent::CanPlay if self.state == DeckState::Loading => {
                    self.state = DeckState::Ready;
                }
                MediaEvent::Ended => self.state = DeckState::Stopped,
                MediaEvent::Error { code } => {
                    log::warn!("[{}] media error code {code}", self.id);
                    self.state = DeckState::Error;
                }
                _ => {}
            }
        }
        events
    }
}

// ── Decks ─────────────────────────────────────────────────────────────────────

/// The fixed pair of decks plus role bookkeeping and per-deck subscriptions.
pub struct Decks {
    decks: [Deck; 2],
    active: DeckId,
    emitter: DeckEmitter,
}

impl Decks {
    pub fn new(source_a: Box<dyn MediaSource>, source_b: Box<dyn MediaSource>) -> Self {
        let mut emitter = DeckEmitter::new();
        for listener in Listener::ACTIVE {
            emitter.subscribe(DeckId::DeckA, listener);
        }
        emitter.subscribe(DeckId::DeckB, Listener::Preload);
        Self {
            decks: [
                Deck::new(DeckId::DeckA, DeckRole::Active, source_a),
                Deck::new(DeckId::DeckB, DeckRole::Idle, source_b),
            ],
            active: DeckId::DeckA,
            emitter,
        }
    }

    pub fn active_id(&self) -> DeckId {
        self.active
    }

    pub fn idle_id(&self) -> DeckId {
        self.active.other()
    }

    pub fn get(&self, id: DeckId) -> &Deck {
        &self.decks[id.index()]
    }

    pub fn get_mut(&mut self, id: DeckId) -> &mut Deck {
        &mut self.decks[id.index()]
    }

    pub fn active(&self) -> &Deck {
        self.get(self.active)
    }

    pub fn active_mut(&mut self) -> &mut Deck {
        let id = self.active;
        self.get_mut(id)
    }

    pub fn idle(&self) -> &Deck {
        self.get(self.idle_id())
    }

    pub fn idle_mut(&mut self) -> &mut Deck {
        let id = self.idle_id();
        self.get_mut(id)
    }

    pub fn emitter(&self) -> &DeckEmitter {
        &self.emitter
    }

    /// Exchange roles without touching playback, and move the listeners
    /// along: the audible-deck listeners follow the new active deck and
    /// preloading follows the new idle deck.
    pub fn swap_roles(&mut self) -> DeckId {
        let old_active = self.active;
        let new_active = old_active.other();

        for listener in Listener::ACTIVE {
            self.emitter.unsubscribe(old_active, listener);
            self.emitter.subscribe(new_active, listener);
        }
        self.emitter.unsubscribe(new_active, Listener::Preload);
        self.emitter.subscribe(old_active, Listener::Preload);

        self.decks[old_active.index()].role = DeckRole::Idle;
        self.decks[new_active.index()].role = DeckRole::Active;
        self.active = new_active;
        log::debug!("Deck roles swapped: {new_active} is now active");
        new_active
    }

    /// Role labels agree with the active pointer and exactly one deck is active.
    pub fn roles_consistent(&self) -> bool {
        let active = self
            .decks
            .iter()
            .filter(|d| d.role == DeckRole::Active)
            .count();
        active == 1 && self.get(self.active).role == DeckRole::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::simulated::{SimClock, SimulatedSource};

    fn track(id: &str) -> Track {
        Track::new(id, format!("{id}.mp3"))
    }

    fn decks(clock: &SimClock) -> Decks {
        let (a, _) = SimulatedSource::new(clock.clone());
        let (b, _) = SimulatedSource::new(clock.clone());
        Decks::new(Box::new(a), Box::new(b))
    }

    #[test]
    fn load_then_ready_on_can_play() {
        let clock = SimClock::new();
        let mut d = decks(&clock);
        d.active_mut().load(track("t1")).unwrap();
        assert_eq!(d.active().state, DeckState::Loading);
        let events = d.active_mut().poll();
        assert!(events.contains(&MediaEvent::CanPlay));
        assert_eq!(d.active().state, DeckState::Ready);
        assert!(d.active().is_ready());
    }

    #[test]
    fn swap_roles_moves_subscriptions() {
        let clock = SimClock::new();
        let mut d = decks(&clock);
        assert!(d.roles_consistent());
        assert!(d.emitter().is_subscribed(DeckId::DeckA, Listener::TransitionWatch));
        assert!(d.emitter().is_subscribed(DeckId::DeckB, Listener::Preload));

        let new_active = d.swap_roles();
        assert_eq!(new_active, DeckId::DeckB);
        assert!(d.roles_consistent());
        for listener in Listener::ACTIVE {
            assert!(d.emitter().is_subscribed(DeckId::DeckB, listener));
            assert!(!d.emitter().is_subscribed(DeckId::DeckA, listener));
        }
        assert!(d.emitter().is_subscribed(DeckId::DeckA, Listener::Preload));
        assert!(!d.emitter().is_subscribed(DeckId::DeckB, Listener::Preload));
    }

    #[test]
    fn swap_keeps_playback_running() {
        let clock = SimClock::new();
        let mut d = decks(&clock);
        d.idle_mut().load(track("next")).unwrap();
        d.idle_mut().poll();
        d.idle_mut().play().unwrap();
        d.swap_roles();
        clock.advance(1.0);
        assert!(d.active().is_playing());
        assert!((d.active().position() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn loop_region_seeks_back() {
        let clock = SimClock::new();
        let mut d = decks(&clock);
        let deck = d.active_mut();
        deck.load(track("t1")).unwrap();
        deck.poll();
        deck.play().unwrap();
        deck.seek(10.0);
        deck.set_loop(LoopRegion { start: 10.0, end: 12.0 });
        clock.advance(1.0);
        assert!(!deck.enforce_loop());
        clock.advance(1.5);
        assert!(deck.enforce_loop());
        assert!((deck.position() - 10.0).abs() < 1e-9);
        deck.clear_loop();
        clock.advance(3.0);
        assert!(!deck.enforce_loop());
    }

    #[test]
    fn duration_falls_back_to_metadata() {
        let clock = SimClock::new();
        let (src, handle) = SimulatedSource::new(clock.clone());
        handle.set_load_latency(1.0);
        let (other, _) = SimulatedSource::new(clock);
        let mut d = Decks::new(Box::new(src), Box::new(other));
        let mut t = track("meta");
        t.duration = Some(200.0);
        d.active_mut().load(t).unwrap();
        assert_eq!(d.active().duration(), Some(200.0));
    }
}
