//! Two-deck automix engine.
//!
//! [`MixEngine`] owns the session, both decks, the optional audio graph and
//! the timer queue. It is single-threaded: the host (or [`crate::driver`])
//! calls [`MixEngine::tick`] on a fixed cadence and applies commands between
//! ticks. Transition logic lives in `transition.rs`.

mod transition;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::{
    audio::{
        bpm_sync::{BpmSync, SyncOutcome},
        clock::WallClock,
        crossfade::{select_crossfader, CrossfadeStrategy},
        deck::{DeckId, DeckRole, DeckState, Decks},
        effects::{ActiveEffectInfo, Effect, EffectCtx, EffectKind, EffectsEngine, TriggerOutcome},
        emitter::Listener,
        graph::{AudioGraph, GAIN_FLOOR},
    },
    config::{MixConfig, MixMode},
    cues::{HotCue, HotCueStore, NewHotCue},
    error::{EngineError, EngineResult, GraphError},
    history::{TransitionHistory, TransitionOutcome},
    media::{MediaEvent, MediaSource},
    queue::{PlayQueue, RepeatMode, Track},
    scheduler::{EngineTask, TaskQueue, TransitionPlanner, TriggerReason},
    state::{SessionState, TransitionPhase},
};

use transition::InFlight;

// ── Events ───────────────────────────────────────────────────────────────────

/// Everything the host can observe, drained with [`MixEngine::drain_events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TransitionStarted {
        id: u64,
        reason: TriggerReason,
        from_track: Option<String>,
        to_track: String,
    },
    TransitionProgress { id: u64, progress: f64 },
    TransitionCompleted {
        id: u64,
        active_deck: DeckId,
        track_id: Option<String>,
    },
    TransitionAbandoned { id: u64, reason: String },
    TransitionCancelled { id: u64, cause: String },
    BpmSync { outcome: SyncOutcome },
    TrackError {
        deck: DeckId,
        track_id: Option<String>,
        message: String,
    },
    Position {
        deck: DeckId,
        position: f64,
        duration: Option<f64>,
    },
    EffectStarted { kind: EffectKind, deck: DeckId },
    EffectEnded { kind: EffectKind },
    QueueAdvanced { index: usize, track_id: String },
    DegradedMode { reason: String },
    PlaybackStopped,
}

// ── Snapshots ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSnapshot {
    pub id: DeckId,
    pub role: DeckRole,
    pub state: DeckState,
    pub track_id: Option<String>,
    pub position: f64,
    pub duration: Option<f64>,
    pub rate: f64,
    /// Audible level: element volume times graph gain.
    pub level: f32,
    pub connected: bool,
}

/// Read-only engine state for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub current_track: Option<Track>,
    pub next_track: Option<Track>,
    pub queue: Vec<Track>,
    pub current_index: Option<usize>,
    pub next_index: Option<usize>,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub is_playing: bool,
    pub is_transitioning: bool,
    pub phase: TransitionPhase,
    pub transition_progress: f64,
    pub time_until_transition: Option<f64>,
    pub dj_enabled: bool,
    pub mix_mode: MixMode,
    pub hot_cues: Vec<HotCue>,
    pub current_effects: Vec<ActiveEffectInfo>,
    pub source_bpm: Option<f64>,
    pub target_bpm: Option<f64>,
    pub bpm_ratio: f64,
    /// Strategy the next crossfade would use.
    pub strategy: CrossfadeStrategy,
    pub degraded: bool,
    pub decks: Vec<DeckSnapshot>,
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct MixEngine {
    session: SessionState,
    decks: Decks,
    /// `None` in degraded mode.
    graph: Option<AudioGraph>,
    wall: Box<dyn WallClock>,
    tasks: TaskQueue<EngineTask>,
    effects: EffectsEngine,
    bpm: BpmSync,
    cues: HotCueStore,
    planner: TransitionPlanner,
    history: TransitionHistory,
    events: Vec<EngineEvent>,

    playing: bool,
    /// Start the active deck as soon as it reports `CanPlay`.
    pending_play: bool,
    /// Queue index loaded on the idle deck.
    staged: Option<usize>,
    /// Queue revision the staging decision was made for.
    staged_revision: Option<u64>,
    /// Where listening of the active track started.
    active_entry: f64,
    fired_boundary: Option<f64>,
    transition: Option<InFlight>,
    next_transition_id: u64,
    last_position_report: Option<f64>,
    time_until_transition: Option<f64>,
}

impl MixEngine {
    /// Build the engine. A failed graph is not an error: the engine runs in
    /// degraded mode with element-volume crossfades and reports it once.
    pub fn new(
        config: MixConfig,
        deck_a: Box<dyn MediaSource>,
        deck_b: Box<dyn MediaSource>,
        graph: Result<AudioGraph, GraphError>,
        wall: Box<dyn WallClock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let mut events = Vec::new();
        let graph = match graph {
            Ok(g) => Some(g),
            Err(e) => {
                log::warn!(
                    "Audio graph unavailable, falling back to element-volume crossfades: {e}"
                );
                events.push(EngineEvent::DegradedMode { reason: e.to_string() });
                None
            }
        };
        Ok(Self {
            effects: EffectsEngine::new(config.effects.clone()),
            bpm: BpmSync::new(config.bpm_sync),
            planner: TransitionPlanner::new(config.planner.clone()),
            session: SessionState::new(config, PlayQueue::new()),
            decks: Decks::new(deck_a, deck_b),
            graph,
            wall,
            tasks: TaskQueue::new(),
            cues: HotCueStore::new(),
            history: TransitionHistory::new(),
            events,
            playing: false,
            pending_play: false,
            staged: None,
            staged_revision: None,
            active_entry: 0.0,
            fired_boundary: None,
            transition: None,
            next_transition_id: 0,
            last_position_report: None,
            time_until_transition: None,
        })
    }

    /// Replace the queue (e.g. a seeded one for deterministic shuffle).
    pub fn with_queue(mut self, queue: PlayQueue) -> Self {
        self.session.queue = queue;
        self.staged_revision = None;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn config(&self) -> &MixConfig {
        &self.session.config
    }

    pub fn phase(&self) -> TransitionPhase {
        self.session.phase()
    }

    pub fn is_transitioning(&self) -> bool {
        self.session.is_transitioning()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_degraded(&self) -> bool {
        self.graph.is_none()
    }

    pub fn queue(&self) -> &PlayQueue {
        &self.session.queue
    }

    pub fn decks(&self) -> &Decks {
        &self.decks
    }

    pub fn graph(&self) -> Option<&AudioGraph> {
        self.graph.as_ref()
    }

    pub fn cues(&self) -> &HotCueStore {
        &self.cues
    }

    /// Direct store access for bulk import/export.
    pub fn cues_mut(&mut self) -> &mut HotCueStore {
        &mut self.cues
    }

    pub fn history(&self) -> &TransitionHistory {
        &self.history
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Wall time of the next pending timer task.
    pub fn next_deadline(&self) -> Option<f64> {
        self.tasks.next_due()
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// One scheduler pass: run due timers, route deck events, enforce loops
    /// and restage the idle deck if the queue changed.
    pub fn tick(&mut self) {
        let now = self.wall.now();
        while let Some((_, task)) = self.tasks.pop_due(now) {
            self.handle_task(task);
        }

        for id in DeckId::ALL {
            let events = self.decks.get_mut(id).poll();
            for event in events {
                for listener in self.decks.emitter().route(id, &event) {
                    self.dispatch(listener, id, &event);
                }
            }
        }

        for id in DeckId::ALL {
            if self.decks.get_mut(id).enforce_loop() {
                log::debug!("[{id}] loop wrapped");
            }
        }

        if !self.session.is_transitioning()
            && self.staged_revision != Some(self.session.queue.revision())
        {
            self.stage_next();
        }

        if let Some(graph) = self.graph.as_mut() {
            graph.prune_automation();
        }
    }

    fn dispatch(&mut self, listener: Listener, deck: DeckId, event: &MediaEvent) {
        match (listener, event) {
            (Listener::TransitionWatch, MediaEvent::TimeUpdate { position }) => {
                self.evaluate_trigger(*position)
            }
            (Listener::PositionReporter, MediaEvent::TimeUpdate { position }) => {
                self.report_position(deck, *position)
            }
            (Listener::Playback, MediaEvent::CanPlay) => self.on_active_ready(),
            (Listener::Playback, MediaEvent::Ended) => self.on_active_ended(),
            (Listener::Playback, MediaEvent::Error { code }) => self.on_active_error(deck, *code),
            (Listener::Preload, MediaEvent::CanPlay) => self.on_incoming_ready(deck),
            (Listener::Preload, MediaEvent::Error { code }) => self.on_incoming_error(deck, *code),
            _ => {}
        }
    }

    fn report_position(&mut self, deck: DeckId, position: f64) {
        let now = self.wall.now();
        let period = 1.0 / self.session.config.position_update_hz;
        if self.last_position_report.is_some_and(|t| now - t < period) {
            return;
        }
        self.last_position_report = Some(now);
        self.events.push(EngineEvent::Position {
            deck,
            position,
            duration: self.decks.get(deck).duration(),
        });
    }

    fn on_active_ready(&mut self) {
        if !self.pending_play {
            return;
        }
        self.pending_play = false;
        let id = self.decks.active_id();
        match self.decks.get_mut(id).play() {
            Ok(()) => {
                self.playing = true;
                let level = self.session.config.master_volume;
                self.set_level(id, level);
            }
            Err(e) => {
                self.playing = false;
                self.track_error(id, e.to_string());
            }
        }
    }

    fn track_error(&mut self, deck: DeckId, message: String) {
        let track_id = self.decks.get(deck).track_id().map(str::to_string);
        log::warn!("[{deck}] track {track_id:?} failed: {message}");
        self.events.push(EngineEvent::TrackError {
            deck,
            track_id,
            message,
        });
    }

    fn stopped(&mut self) {
        if self.playing || self.pending_play {
            log::info!("Playback stopped: nothing left to play");
        }
        self.playing = false;
        self.pending_play = false;
        self.time_until_transition = None;
        self.events.push(EngineEvent::PlaybackStopped);
    }

    /// Set a deck's audible level on whichever stage carries it.
    fn set_level(&mut self, id: DeckId, level: f32) {
        let level = level.clamp(GAIN_FLOOR, 1.0);
        match self.graph.as_mut() {
            Some(g) if g.deck(id).is_connected() => {
                g.deck_mut(id).gain.set_value(level);
                self.decks.get_mut(id).set_volume(1.0);
            }
            _ => self.decks.get_mut(id).set_volume(level),
        }
    }

    fn level(&self, id: DeckId) -> f32 {
        let volume = self.decks.get(id).volume();
        match self.graph.as_ref() {
            Some(g) if g.deck(id).is_connected() => volume * g.gain_now(id),
            _ => volume,
        }
    }

    // ── Transport ────────────────────────────────────────────────────────

    /// Start (or resume) the current queue entry on the active deck.
    pub fn play(&mut self) -> EngineResult<()> {
        let current = self
            .session
            .queue
            .current()
            .cloned()
            .ok_or(EngineError::EmptyQueue)?;
        let id = self.decks.active_id();
        let level = self.session.config.master_volume;
        let deck = self.decks.get_mut(id);

        if deck.track_id() != Some(current.id.as_str()) || deck.state == DeckState::Error {
            deck.load(current)?;
            self.active_entry = 0.0;
            self.fired_boundary = None;
            self.pending_play = true;
            self.set_level(id, level);
            return Ok(());
        }
        if deck.state == DeckState::Stopped {
            deck.seek(0.0);
            self.active_entry = 0.0;
            self.fired_boundary = None;
        }
        if deck.is_ready() {
            deck.play()?;
            self.playing = true;
        } else {
            self.pending_play = true;
        }
        Ok(())
    }

    /// Pausing abandons any transition in flight first.
    pub fn pause(&mut self) {
        if self.session.is_transitioning() {
            self.cancel_transition("paused");
        }
        self.decks.active_mut().pause();
        self.playing = false;
        self.pending_play = false;
        self.time_until_transition = None;
    }

    pub fn seek(&mut self, secs: f64) -> EngineResult<()> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(EngineError::InvalidConfig(format!("seek position {secs} is invalid")));
        }
        self.decks.active_mut().seek(secs);
        self.fired_boundary = None;
        Ok(())
    }

    /// Target level of the audible deck (0.0 – 1.0).
    pub fn set_volume(&mut self, volume: f32) -> EngineResult<()> {
        self.update_config(|c| c.master_volume = volume)?;
        if !self.session.is_transitioning() {
            let id = self.decks.active_id();
            self.set_level(id, volume);
        }
        Ok(())
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Replace the whole configuration.
    pub fn set_config(&mut self, config: MixConfig) -> EngineResult<()> {
        self.update_config(|c| *c = config)
    }

    /// Validate a modified copy, then commit. Turning DJ mode off or
    /// switching mix mode cancels an in-flight transition.
    pub fn update_config(&mut self, change: impl FnOnce(&mut MixConfig)) -> EngineResult<()> {
        let mut next = self.session.config.clone();
        change(&mut next);
        next.validate()?;

        let old_mode = self.session.config.mix_mode;
        let mode_changed = old_mode != next.mix_mode;
        let dj_off = self.session.config.auto_transition && !next.auto_transition;
        if self.session.is_transitioning() && (mode_changed || dj_off) {
            let cause = if dj_off { "dj mode disabled" } else { "mix mode changed" };
            self.cancel_transition(cause);
        }
        if mode_changed {
            self.fired_boundary = None;
            log::info!("Mix mode: {} -> {}", old_mode.as_str(), next.mix_mode.as_str());
        }

        self.effects.set_limits(next.effects.clone());
        self.planner.set_config(next.planner.clone());
        self.bpm.set_enabled(next.bpm_sync);
        self.session.set_armed(self.staged.is_some() && next.auto_transition);
        if !next.auto_transition {
            self.time_until_transition = None;
        }
        self.session.config = next;
        Ok(())
    }

    pub fn set_dj_mode(&mut self, enabled: bool) -> EngineResult<()> {
        self.update_config(|c| c.auto_transition = enabled)
    }

    pub fn set_mix_mode(&mut self, mode: MixMode) -> EngineResult<()> {
        self.update_config(|c| c.mix_mode = mode)
    }

    pub fn set_mix_interval(&mut self, secs: f64) -> EngineResult<()> {
        self.update_config(|c| c.mix_interval_secs = secs)
    }

    pub fn set_transition_lead(&mut self, secs: f64) -> EngineResult<()> {
        self.update_config(|c| c.transition_lead_secs = secs)
    }

    pub fn set_crossfade_secs(&mut self, secs: f64) -> EngineResult<()> {
        self.update_config(|c| c.crossfade_secs = secs)
    }

    // ── Queue ────────────────────────────────────────────────────────────

    /// Queue edits cancel an in-flight transition and restage the idle deck.
    fn edit_queue<T>(
        &mut self,
        edit: impl FnOnce(&mut PlayQueue) -> EngineResult<T>,
    ) -> EngineResult<T> {
        if self.session.is_transitioning() {
            self.cancel_transition("queue changed");
        }
        let out = edit(&mut self.session.queue)?;
        self.stage_next();
        Ok(out)
    }

    pub fn set_queue(&mut self, tracks: Vec<Track>) -> EngineResult<()> {
        self.edit_queue(|q| {
            q.set_tracks(tracks);
            Ok(())
        })
    }

    pub fn enqueue(&mut self, track: Track) -> EngineResult<()> {
        self.edit_queue(|q| {
            q.enqueue(track);
            Ok(())
        })
    }

    pub fn insert_track(&mut self, index: usize, track: Track) -> EngineResult<()> {
        self.edit_queue(|q| q.insert(index, track))
    }

    pub fn remove_track(&mut self, index: usize) -> EngineResult<Track> {
        self.edit_queue(|q| q.remove(index))
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) -> EngineResult<()> {
        self.edit_queue(|q| {
            q.set_repeat(repeat);
            Ok(())
        })
    }

    pub fn set_shuffle(&mut self, shuffle: bool) -> EngineResult<()> {
        self.edit_queue(|q| {
            q.set_shuffle(shuffle);
            Ok(())
        })
    }

    /// Make `index` current and start it on the active deck right away if
    /// the engine is playing.
    pub fn jump_to(&mut self, index: usize) -> EngineResult<()> {
        if self.session.is_transitioning() {
            self.cancel_transition("queue changed");
        }
        self.session.queue.jump_to(index)?;
        let was_playing = self.playing || self.pending_play;
        self.decks.active_mut().stop();
        self.playing = false;
        self.pending_play = false;
        let started = if was_playing { self.play() } else { Ok(()) };
        self.stage_next();
        started
    }

    // ── Hot cues ─────────────────────────────────────────────────────────

    fn track_duration(&self, track_id: &str) -> Option<Option<f64>> {
        if let Some(deck) = DeckId::ALL
            .iter()
            .map(|id| self.decks.get(*id))
            .find(|d| d.track_id() == Some(track_id))
        {
            return Some(deck.duration());
        }
        self.session
            .queue
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| t.duration)
    }

    pub fn add_hot_cue(&mut self, track_id: &str, cue: NewHotCue) -> EngineResult<HotCue> {
        let duration = self
            .track_duration(track_id)
            .ok_or_else(|| EngineError::UnknownTrack(track_id.to_string()))?;
        self.cues.add(track_id, cue, duration)
    }

    pub fn remove_hot_cue(&mut self, track_id: &str, cue_id: u64) -> EngineResult<HotCue> {
        self.cues.remove(track_id, cue_id)
    }

    pub fn move_hot_cue(&mut self, track_id: &str, cue_id: u64, time: f64) -> EngineResult<()> {
        let duration = self.track_duration(track_id).flatten();
        self.cues.move_cue(track_id, cue_id, time, duration)
    }

    // ── Effects ──────────────────────────────────────────────────────────

    /// Fire an effect on the active deck.
    pub fn trigger_effect(&mut self, effect: Effect) -> TriggerOutcome {
        let deck = self.decks.active_id();
        self.start_effect(effect, deck)
    }

    fn start_effect(&mut self, effect: Effect, deck: DeckId) -> TriggerOutcome {
        let bpm = self.decks.get(deck).track.as_ref().and_then(Track::valid_bpm);
        let mut ctx = EffectCtx {
            decks: &mut self.decks,
            graph: self.graph.as_mut(),
            tasks: &mut self.tasks,
            now: self.wall.now(),
        };
        let outcome = self.effects.trigger(effect, deck, bpm, &mut ctx);
        if outcome == TriggerOutcome::Started {
            self.events.push(EngineEvent::EffectStarted {
                kind: effect.kind,
                deck,
            });
        }
        outcome
    }

    fn cancel_effects(&mut self) {
        let mut ctx = EffectCtx {
            decks: &mut self.decks,
            graph: self.graph.as_mut(),
            tasks: &mut self.tasks,
            now: self.wall.now(),
        };
        for kind in self.effects.cancel_all(&mut ctx) {
            self.events.push(EngineEvent::EffectEnded { kind });
        }
    }

    // ── Routing ──────────────────────────────────────────────────────────

    /// Route a deck through the graph. Its level moves from element volume
    /// onto the gain stage.
    pub fn connect_deck(&mut self, id: DeckId) -> EngineResult<()> {
        self.reroute(id, true)
    }

    /// Bypass the graph for a deck; the next crossfade uses element volume.
    pub fn disconnect_deck(&mut self, id: DeckId) -> EngineResult<()> {
        self.reroute(id, false)
    }

    fn reroute(&mut self, id: DeckId, connect: bool) -> EngineResult<()> {
        if self.graph.is_none() {
            return Err(GraphError::Unavailable("engine is in degraded mode".to_string()).into());
        }
        if self.session.is_transitioning() {
            self.cancel_transition("deck routing changed");
        }
        let level = self.level(id);
        if let Some(graph) = self.graph.as_mut() {
            if connect {
                graph.connect(id);
            } else {
                graph.disconnect(id);
            }
        }
        self.set_level(id, level);
        let how = if connect { "routed through" } else { "bypassing" };
        log::info!("[{id}] {how} the audio graph");
        Ok(())
    }

    // ── Output ───────────────────────────────────────────────────────────

    /// Mix one block of interleaved stereo deck audio. Without a graph the
    /// decks are summed (their element volumes already applied).
    pub fn render_output(&mut self, deck_a: &[f32], deck_b: &[f32], out: &mut [f32]) {
        match self.graph.as_mut() {
            Some(graph) => graph.render(deck_a, deck_b, out),
            None => {
                for (i, sample) in out.iter_mut().enumerate() {
                    let a = deck_a.get(i).copied().unwrap_or(0.0);
                    let b = deck_b.get(i).copied().unwrap_or(0.0);
                    *sample = (a + b).clamp(-1.0, 1.0);
                }
            }
        }
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> EngineSnapshot {
        let active = self.decks.active();
        let current_track = active
            .track
            .clone()
            .or_else(|| self.session.queue.current().cloned());
        let hot_cues = current_track
            .as_ref()
            .map(|t| self.cues.cues(&t.id).to_vec())
            .unwrap_or_default();
        let decks = DeckId::ALL
            .iter()
            .map(|&id| {
                let d = self.decks.get(id);
                DeckSnapshot {
                    id,
                    role: d.role,
                    state: d.state,
                    track_id: d.track_id().map(str::to_string),
                    position: d.position(),
                    duration: d.duration(),
                    rate: d.rate(),
                    level: self.level(id),
                    connected: self.graph.as_ref().is_some_and(|g| g.deck(id).is_connected()),
                }
            })
            .collect();

        EngineSnapshot {
            current_track,
            next_track: self.staged.and_then(|i| self.session.queue.get(i).cloned()),
            queue: self.session.queue.tracks().to_vec(),
            current_index: self.session.queue.current_index(),
            next_index: self.staged,
            repeat: self.session.queue.repeat(),
            shuffle: self.session.queue.shuffle(),
            is_playing: self.playing,
            is_transitioning: self.session.is_transitioning(),
            phase: self.session.phase(),
            transition_progress: self.session.progress(),
            time_until_transition: self.time_until_transition,
            dj_enabled: self.session.config.auto_transition,
            mix_mode: self.session.config.mix_mode,
            hot_cues,
            current_effects: self.effects.active_effects(),
            source_bpm: self.bpm.source_bpm(),
            target_bpm: self.bpm.target_bpm(),
            bpm_ratio: self.bpm.ratio(),
            strategy: select_crossfader(self.graph.as_ref()).strategy(),
            degraded: self.graph.is_none(),
            decks,
        }
    }

    fn finish_record(&mut self, id: u64, outcome: TransitionOutcome) {
        if !self.history.finish(id, outcome) {
            log::debug!("Transition {id} no longer in history");
        }
    }
}
