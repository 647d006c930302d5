use serde::{Deserialize, Serialize};

use super::{
    deck::{DeckId, Decks},
    graph::{AudioGraph, GAIN_FLOOR},
};

/// Delay between "now" and the start of the approach ramps, so automation
/// never races the incoming deck's playback start.
pub const RAMP_START_OFFSET: f64 = 0.05;

/// Share of the fade covered by the terminal linear correction.
pub const TERMINAL_RAMP_FRACTION: f64 = 0.2;

/// Host progress updates per crossfade.
pub const PROGRESS_STEPS: u32 = 20;

/// Volume steps of the element-volume fallback.
pub const FALLBACK_STEPS: u32 = 30;

/// Extra wall time before the deck swap runs.
pub const COMPLETION_BUFFER: f64 = 0.1;

// ── Strategy ──────────────────────────────────────────────────────────────────

/// How a crossfade is carried out. Callers never branch on it; it is
/// reported for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeStrategy {
    /// Gain automation on the audio clock.
    Graph,
    /// Stepped element-volume changes on the timer queue.
    ElementVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FadeRequest {
    pub outgoing: DeckId,
    pub incoming: DeckId,
    /// Seconds.
    pub duration: f64,
    /// Level the incoming deck ends at (0.0 – 1.0).
    pub target_volume: f32,
}

/// Captured at schedule time and handed back on every later call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    pub request: FadeRequest,
    /// Actual outgoing level when the fade began.
    pub outgoing_from: f32,
    pub incoming_from: f32,
    /// Timer steps the fader wants (0 when automation runs on its own).
    pub steps: u32,
}

/// Mutable view over the resources a crossfade drives.
pub struct MixIo<'a> {
    pub decks: &'a mut Decks,
    pub graph: Option<&'a mut AudioGraph>,
}

impl MixIo<'_> {
    /// Audible level of a deck: element volume times graph gain when routed.
    pub fn level(&self, id: DeckId) -> f32 {
        let volume = self.decks.get(id).volume();
        match self.graph.as_deref() {
            Some(g) if g.deck(id).is_connected() => volume * g.gain_now(id),
            _ => volume,
        }
    }
}

// ── Crossfader trait ──────────────────────────────────────────────────────────

pub trait Crossfader {
    fn strategy(&self) -> CrossfadeStrategy;

    /// Bring the incoming deck to the floor level before it starts playing.
    fn prime_incoming(&self, io: &mut MixIo<'_>, incoming: DeckId);

    /// Start the fade. Both levels start from their actual current values.
    fn schedule(&self, io: &mut MixIo<'_>, request: FadeRequest) -> FadeState;

    /// Timer step `step` of `state.steps` (1-based).
    fn apply_step(&self, io: &mut MixIo<'_>, state: &FadeState, step: u32);

    /// Force exact terminal levels: outgoing at the floor, incoming at target.
    fn settle(&self, io: &mut MixIo<'_>, state: &FadeState);

    /// Return to neutral: outgoing audible at target, incoming at the floor.
    fn abort(&self, io: &mut MixIo<'_>, state: &FadeState);
}

/// Graph automation when the graph exists and both decks are routed through
/// it, element volume otherwise.
pub fn select_crossfader(graph: Option<&AudioGraph>) -> Box<dyn Crossfader> {
    match graph {
        Some(g) if g.both_connected() => Box::new(GraphCrossfader),
        _ => Box::new(VolumeCrossfader),
    }
}

// ── Graph automation ──────────────────────────────────────────────────────────

/// Approach ramps (time constant = duration / 5) with a terminal linear
/// segment that lands exactly on the end values at `now + duration`.
pub struct GraphCrossfader;

impl Crossfader for GraphCrossfader {
    fn strategy(&self) -> CrossfadeStrategy {
        CrossfadeStrategy::Graph
    }

    fn prime_incoming(&self, io: &mut MixIo<'_>, incoming: DeckId) {
        io.decks.get_mut(incoming).set_volume(1.0);
        if let Some(graph) = io.graph.as_deref_mut() {
            graph.deck_mut(incoming).gain.set_value(GAIN_FLOOR);
        }
    }

    fn schedule(&self, io: &mut MixIo<'_>, request: FadeRequest) -> FadeState {
        let outgoing_from = io.level(request.outgoing);
        let incoming_from = io.level(request.incoming);
        let state = FadeState {
            request,
            outgoing_from,
            incoming_from,
            steps: 0,
        };
        io.decks.get_mut(request.outgoing).set_volume(1.0);
        io.decks.get_mut(request.incoming).set_volume(1.0);

        let Some(graph) = io.graph.as_deref_mut() else {
            log::error!("Graph crossfade scheduled without a graph");
            return state;
        };

        let now = graph.current_time();
        let duration = request.duration.max(0.0);
        let start = now + RAMP_START_OFFSET.min(duration);
        let end = now + duration;
        let terminal_start = (end - TERMINAL_RAMP_FRACTION * duration).max(start);
        let tau = (duration / 5.0).max(1e-3);

        for (id, from, to) in [
            (request.outgoing, outgoing_from, GAIN_FLOOR),
            (request.incoming, incoming_from, request.target_volume),
        ] {
            let gain = &mut graph.deck_mut(id).gain;
            gain.cancel_and_hold(now);
            gain.set_value_at_time(from, now);
            gain.set_target_at_time(to, start, tau);
            gain.linear_ramp(to, terminal_start, end);
        }

        log::debug!(
            "Graph crossfade {} -> {} in {duration:.2}s, {outgoing_from:.4}/{incoming_from:.4}",
            request.outgoing,
            request.incoming
        );
        state
    }

    fn apply_step(&self, _io: &mut MixIo<'_>, _state: &FadeState, _step: u32) {}

    fn settle(&self, io: &mut MixIo<'_>, state: &FadeState) {
        if let Some(graph) = io.graph.as_deref_mut() {
            let r = state.request;
            graph.deck_mut(r.outgoing).gain.set_value(GAIN_FLOOR);
            graph.deck_mut(r.incoming).gain.set_value(r.target_volume);
        }
    }

    fn abort(&self, io: &mut MixIo<'_>, state: &FadeState) {
        if let Some(graph) = io.graph.as_deref_mut() {
            let r = state.request;
            graph.deck_mut(r.outgoing).gain.set_value(r.target_volume);
            graph.deck_mut(r.incoming).gain.set_value(GAIN_FLOOR);
        }
    }
}

// ── Element-volume fallback ───────────────────────────────────────────────────

/// Linear element-volume steps on the timer queue. Graph gains (when a graph
/// exists) are parked at unity so the element volume alone sets the level.
pub struct VolumeCrossfader;

impl VolumeCrossfader {
    fn unity_gains(io: &mut MixIo<'_>) {
        if let Some(graph) = io.graph.as_deref_mut() {
            for id in DeckId::ALL {
                graph.deck_mut(id).gain.set_value(1.0);
            }
        }
    }
}

impl Crossfader for VolumeCrossfader {
    fn strategy(&self) -> CrossfadeStrategy {
        CrossfadeStrategy::ElementVolume
    }

    fn prime_incoming(&self, io: &mut MixIo<'_>, incoming: DeckId) {
        if let Some(graph) = io.graph.as_deref_mut() {
            graph.deck_mut(incoming).gain.set_value(1.0);
        }
        io.decks.get_mut(incoming).set_volume(GAIN_FLOOR);
    }

    fn schedule(&self, io: &mut MixIo<'_>, request: FadeRequest) -> FadeState {
        let outgoing_from = io.level(request.outgoing);
        let incoming_from = io.level(request.incoming);
        Self::unity_gains(io);
        io.decks.get_mut(request.outgoing).set_volume(outgoing_from);
        io.decks.get_mut(request.incoming).set_volume(incoming_from);
        log::debug!(
            "Element-volume crossfade {} -> {} over {:.2}s in {FALLBACK_STEPS} steps",
            request.outgoing,
            request.incoming,
            request.duration
        );
        FadeState {
            request,
            outgoing_from,
            incoming_from,
            steps: FALLBACK_STEPS,
        }
    }

    fn apply_step(&self, io: &mut MixIo<'_>, state: &FadeState, step: u32) {
        let t = (step as f32 / state.steps.max(1) as f32).clamp(0.0, 1.0);
        let r = state.request;
        let out = state.outgoing_from + (GAIN_FLOOR - state.outgoing_from) * t;
        let inc = state.incoming_from + (r.target_volume - state.incoming_from) * t;
        io.decks.get_mut(r.outgoing).set_volume(out);
        io.decks.get_mut(r.incoming).set_volume(inc);
    }

    fn settle(&self, io: &mut MixIo<'_>, state: &FadeState) {
        let r = state.request;
        io.decks.get_mut(r.outgoing).set_volume(GAIN_FLOOR);
        io.decks.get_mut(r.incoming).set_volume(r.target_volume);
    }

    fn abort(&self, io: &mut MixIo<'_>, state: &FadeState) {
        Self::unity_gains(io);
        let r = state.request;
        io.decks.get_mut(r.outgoing).set_volume(r.target_volume);
        io.decks.get_mut(r.incoming).set_volume(GAIN_FLOOR);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
