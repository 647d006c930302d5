use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    deck::{DeckId, Decks, LoopRegion},
    dsp::FilterKind,
    graph::AudioGraph,
};
use crate::{
    config::EffectLimits,
    scheduler::{EngineTask, TaskHandle, TaskQueue},
};

/// Gain multipliers of the scratch stutter, one per equal time slice.
const SCRATCH_PATTERN: [f32; 8] = [1.0, 0.3, 1.0, 0.2, 0.9, 0.4, 1.0, 0.5];

/// Bottom of the scratch highpass sweep (Hz).
const SCRATCH_HIGHPASS_START_HZ: f32 = 20.0;

const ECHO_FADE_IN_SECS: f64 = 0.1;

/// Share of the effect after which filter and echo start returning.
const SWEEP_FRACTION: f64 = 0.8;
const ECHO_FADE_OUT_START: f64 = 0.7;

/// Tail after the nominal duration before filter and echo are torn down.
const TAIL_SECS: f64 = 1.0;

// ── Effect ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Filter,
    Echo,
    Scratch,
    Loop,
    Reverse,
}

impl EffectKind {
    /// Needs the audio graph's effects stage.
    pub fn needs_graph(self) -> bool {
        matches!(self, EffectKind::Filter | EffectKind::Echo | EffectKind::Scratch)
    }
}

impl std::fmt::Display for EffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EffectKind::Filter => "filter",
            EffectKind::Echo => "echo",
            EffectKind::Scratch => "scratch",
            EffectKind::Loop => "loop",
            EffectKind::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// A time-bounded effect request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub kind: EffectKind,
    /// 0.0 – 1.0
    pub intensity: f32,
    /// Seconds.
    pub duration: f64,
}

impl Effect {
    /// Clamps intensity into `[0, 1]` and duration to at least 100 ms.
    pub fn new(kind: EffectKind, intensity: f32, duration: f64) -> Self {
        let intensity = if intensity.is_finite() { intensity.clamp(0.0, 1.0) } else { 0.0 };
        let duration = if duration.is_finite() { duration.max(0.1) } else { 0.1 };
        Self { kind, intensity, duration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    /// An instance of this type is already running; nothing changed.
    AlreadyActive,
    /// The effect needs the audio graph and the engine is in degraded mode.
    Unsupported,
}

/// Host-facing view of a running effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveEffectInfo {
    pub kind: EffectKind,
    pub intensity: f32,
    pub duration: f64,
    pub deck: DeckId,
    /// Wall-clock start.
    pub started_at: f64,
}

/// State captured at trigger time and restored by the cleanup.
#[derive(Debug, Clone, Copy)]
enum Restore {
    Filter,
    Echo,
    Scratch {
        /// Deck gain before the stutter, if the stutter was applied.
        gain: Option<f32>,
        filter_kind: FilterKind,
        filter_freq: f32,
        /// Audio time the stutter ends.
        ends_at: f64,
    },
    Loop,
    Reverse {
        previous_rate: f64,
        reversed_rate: f64,
    },
}

struct ActiveEffect {
    info: ActiveEffectInfo,
    restore: Restore,
}

/// Resources an effect touches.
pub struct EffectCtx<'a> {
    pub decks: &'a mut Decks,
    pub graph: Option<&'a mut AudioGraph>,
    pub tasks: &'a mut TaskQueue<EngineTask>,
    /// Wall-clock seconds. Cleanups run on this clock; automation on the
    /// graph's audio clock.
    pub now: f64,
}

// ── EffectsEngine ─────────────────────────────────────────────────────────────

/// Runs at most one instance per effect type. Every effect tears itself
/// down through a cancellable cleanup task keyed by its type.
pub struct EffectsEngine {
    limits: EffectLimits,
    active: HashMap<EffectKind, ActiveEffect>,
    cleanups: HashMap<EffectKind, TaskHandle>,
}

impl EffectsEngine {
    pub fn new(limits: EffectLimits) -> Self {
        Self {
            limits,
            active: HashMap::new(),
            cleanups: HashMap::new(),
        }
    }

    pub fn set_limits(&mut self, limits: EffectLimits) {
        self.limits = limits;
    }

    pub fn is_active(&self, kind: EffectKind) -> bool {
        self.active.contains_key(&kind)
    }

    pub fn active_effects(&self) -> Vec<ActiveEffectInfo> {
        let mut list: Vec<ActiveEffectInfo> = self.active.values().map(|a| a.info).collect();
        list.sort_by(|a, b| a.started_at.total_cmp(&b.started_at));
        list
    }

    pub fn trigger(
        &mut self,
        effect: Effect,
        deck: DeckId,
        bpm: Option<f64>,
        ctx: &mut EffectCtx<'_>,
    ) -> TriggerOutcome {
        if self.active.contains_key(&effect.kind) {
            log::info!("Effect {} already active, ignoring trigger", effect.kind);
            return TriggerOutcome::AlreadyActive;
        }
        if effect.kind.needs_graph() && ctx.graph.is_none() {
            log::warn!("Effect {} unavailable without the audio graph", effect.kind);
            return TriggerOutcome::Unsupported;
        }

        let (restore, cleanup_after) = match effect.kind {
            EffectKind::Filter => self.start_filter(effect, ctx),
            EffectKind::Echo => self.start_echo(effect, bpm, ctx),
            EffectKind::Scratch => self.start_scratch(effect, deck, ctx),
            EffectKind::Loop => self.start_loop(effect, deck, ctx),
            EffectKind::Reverse => start_reverse(effect, deck, ctx),
        };

        let handle = ctx.tasks.schedule(
            ctx.now + cleanup_after,
            EngineTask::EffectCleanup { kind: effect.kind },
        );
        self.arm_cleanup(effect.kind, handle, ctx.tasks);
        self.active.insert(
            effect.kind,
            ActiveEffect {
                info: ActiveEffectInfo {
                    kind: effect.kind,
                    intensity: effect.intensity,
                    duration: effect.duration,
                    deck,
                    started_at: ctx.now,
                },
                restore,
            },
        );
        log::info!(
            "Effect {} on {deck}: intensity {:.2}, {:.2}s (cleanup in {cleanup_after:.2}s)",
            effect.kind,
            effect.intensity,
            effect.duration
        );
        TriggerOutcome::Started
    }

    /// Cleanup task fired. Returns whether an effect actually ended.
    pub fn finish(&mut self, kind: EffectKind, ctx: &mut EffectCtx<'_>) -> bool {
        self.cleanups.remove(&kind);
        match self.active.remove(&kind) {
            Some(active) => {
                run_cleanup(&active, ctx);
                log::debug!("Effect {kind} cleaned up");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending cleanup and run it right away.
    pub fn cancel_all(&mut self, ctx: &mut EffectCtx<'_>) -> Vec<EffectKind> {
        for (_, handle) in self.cleanups.drain() {
            ctx.tasks.cancel(handle);
        }
        let mut ended = Vec::with_capacity(self.active.len());
        for (kind, active) in self.active.drain() {
            run_cleanup(&active, ctx);
            ended.push(kind);
        }
        if !ended.is_empty() {
            log::info!("Cancelled {} running effect(s)", ended.len());
        }
        ended
    }

    /// Store the cleanup handle for `kind`, cancelling any previous one.
    fn arm_cleanup(
        &mut self,
        kind: EffectKind,
        handle: TaskHandle,
        tasks: &mut TaskQueue<EngineTask>,
    ) {
        if let Some(old) = self.cleanups.insert(kind, handle) {
            tasks.cancel(old);
        }
    }

    // ── Effect starters ───────────────────────────────────────────────────

    fn start_filter(&self, effect: Effect, ctx: &mut EffectCtx<'_>) -> (Restore, f64) {
        let d = effect.duration;
        let open = self.limits.filter_open_hz;
        let low = (open * (1.0 - effect.intensity)).max(self.limits.filter_floor_hz);
        if let Some(graph) = ctx.graph.as_deref_mut() {
            let t = graph.current_time();
            let bus = graph.effects_mut();
            bus.filter_kind = FilterKind::LowPass;
            let f = &mut bus.filter_freq;
            f.cancel_and_hold(t);
            f.set_value_at_time(open, t);
            f.exponential_ramp(low, t, t + SWEEP_FRACTION * d);
            f.exponential_ramp(open, t + d, t + d + TAIL_SECS);
        }
        (Restore::Filter, d + TAIL_SECS)
    }

    fn start_echo(
        &self,
        effect: Effect,
        bpm: Option<f64>,
        ctx: &mut EffectCtx<'_>,
    ) -> (Restore, f64) {
        let d = effect.duration;
        let delay = echo_delay_secs(bpm, self.limits.default_echo_delay_secs);
        let feedback = (0.4 * effect.intensity).min(self.limits.max_feedback);
        let wet = (0.35 * effect.intensity).min(self.limits.max_wet);
        if let Some(graph) = ctx.graph.as_deref_mut() {
            let t = graph.current_time();
            let bus = graph.effects_mut();
            bus.delay_time.set_value(delay as f32);
            bus.delay_feedback.set_value(feedback);
            bus.connect_delay();

            let fade_out = t + ECHO_FADE_OUT_START * d;
            let w = &mut bus.delay_wet;
            w.cancel_and_hold(t);
            w.set_value_at_time(0.0, t);
            w.linear_ramp(wet, t, t + ECHO_FADE_IN_SECS);
            w.linear_ramp(0.0, fade_out, t + d + TAIL_SECS);
            bus.delay_feedback.linear_ramp(0.0, fade_out, t + d + TAIL_SECS);
        }
        log::debug!("Echo delay {delay:.3}s, feedback {feedback:.2}, wet {wet:.2}");
        (Restore::Echo, d + TAIL_SECS)
    }

    fn start_scratch(
        &self,
        effect: Effect,
        deck: DeckId,
        ctx: &mut EffectCtx<'_>,
    ) -> (Restore, f64) {
        let d = effect.duration;
        let Some(graph) = ctx.graph.as_deref_mut() else {
            return (Restore::Filter, d);
        };
        let t = graph.current_time();
        let slice = d / SCRATCH_PATTERN.len() as f64;

        let gain = &mut graph.deck_mut(deck).gain;
        let saved_gain = if gain.has_automation_after(t) {
            log::debug!("Scratch on {deck}: gain is automated, skipping stutter");
            None
        } else {
            let base = gain.value_at(t);
            for (i, mult) in SCRATCH_PATTERN.iter().enumerate() {
                gain.set_value_at_time(base * mult, t + i as f64 * slice);
            }
            gain.set_value_at_time(base, t + d);
            Some(base)
        };

        let bus = graph.effects_mut();
        let filter_kind = bus.filter_kind;
        let filter_freq = bus.filter_freq.value_at(t);
        let peak = self.limits.scratch_highpass_hz * (0.25 + 0.75 * effect.intensity);
        bus.filter_kind = FilterKind::HighPass;
        let f = &mut bus.filter_freq;
        f.cancel_and_hold(t);
        f.set_value_at_time(SCRATCH_HIGHPASS_START_HZ, t);
        f.exponential_ramp(peak, t, t + d / 2.0);
        f.exponential_ramp(SCRATCH_HIGHPASS_START_HZ, t + d / 2.0, t + d);

        (
            Restore::Scratch {
                gain: saved_gain,
                filter_kind,
                filter_freq,
                ends_at: t + d,
            },
            d,
        )
    }

    fn start_loop(&self, effect: Effect, deck: DeckId, ctx: &mut EffectCtx<'_>) -> (Restore, f64) {
        let d = effect.duration;
        let target = ctx.decks.get_mut(deck);
        let start = target.position();
        target.set_loop(LoopRegion { start, end: start + d });
        let repeats = self.limits.loop_repeats.max(1) as f64;
        (Restore::Loop, d * repeats)
    }
}

fn start_reverse(effect: Effect, deck: DeckId, ctx: &mut EffectCtx<'_>) -> (Restore, f64) {
    let target = ctx.decks.get_mut(deck);
    let previous_rate = target.rate();
    let reversed_rate = -previous_rate.abs().max(0.25);
    target.set_rate(reversed_rate);
    (
        Restore::Reverse {
            previous_rate,
            reversed_rate,
        },
        effect.duration,
    )
}

fn run_cleanup(active: &ActiveEffect, ctx: &mut EffectCtx<'_>) {
    let deck = active.info.deck;
    match active.restore {
        Restore::Filter => {
            if let Some(graph) = ctx.graph.as_deref_mut() {
                graph.effects_mut().reset_filter();
            }
        }
        Restore::Echo => {
            if let Some(graph) = ctx.graph.as_deref_mut() {
                let bus = graph.effects_mut();
                bus.delay_wet.set_value(0.0);
                bus.delay_feedback.set_value(0.0);
                bus.disconnect_delay();
            }
        }
        Restore::Scratch {
            gain,
            filter_kind,
            filter_freq,
            ends_at,
        } => {
            if let Some(graph) = ctx.graph.as_deref_mut() {
                let t = graph.current_time();
                if let (Some(base), true) = (gain, t < ends_at) {
                    // Cut short: drop the remaining stutter steps.
                    let g = &mut graph.deck_mut(deck).gain;
                    g.cancel_scheduled_values(t);
                    g.set_value_at_time(base, t);
                }
                let bus = graph.effects_mut();
                bus.filter_kind = filter_kind;
                bus.filter_freq.set_value(filter_freq);
            }
        }
        Restore::Loop => ctx.decks.get_mut(deck).clear_loop(),
        Restore::Reverse {
            previous_rate,
            reversed_rate,
        } => {
            let target = ctx.decks.get_mut(deck);
            // Leave the rate alone if something (BPM sync) changed it since.
            if (target.rate() - reversed_rate).abs() < 1e-9 {
                target.set_rate(previous_rate);
            }
        }
    }
}

/// Eighth-note delay at `bpm`, or `default` when the tempo is unknown.
pub fn echo_delay_secs(bpm: Option<f64>, default: f64) -> f64 {
    match bpm.filter(|b| b.is_finite() && *b > 0.0) {
        Some(b) => (60.0 / b / 2.0).min(super::dsp::delay::MAX_DELAY_SECS as f64),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::graph::GraphSettings,
        media::simulated::{SimClock, SimHandle, SimulatedSource},
        queue::Track,
    };

    struct Rig {
        clock: SimClock,
        decks: Decks,
        graph: AudioGraph,
        tasks: TaskQueue<EngineTask>,
        fx: EffectsEngine,
        a: SimHandle,
    }

    impl Rig {
        fn new() -> Self {
            let clock = SimClock::new();
            let (sa, a) = SimulatedSource::new(clock.clone());
            let (sb, _) = SimulatedSource::new(clock.clone());
            let mut decks = Decks::new(Box::new(sa), Box::new(sb));
            decks.active_mut().load(Track::new("t", "t.mp3")).unwrap();
            decks.active_mut().poll();
            decks.active_mut().play().unwrap();
            let graph = AudioGraph::new(GraphSettings::default(), Box::new(clock.clone())).unwrap();
            Self {
                clock,
                decks,
                graph,
                tasks: TaskQueue::new(),
                fx: EffectsEngine::new(EffectLimits::default()),
                a,
            }
        }

        fn trigger(&mut self, effect: Effect) -> TriggerOutcome {
            let mut ctx = EffectCtx {
                decks: &mut self.decks,
                graph: Some(&mut self.graph),
                tasks: &mut self.tasks,
                now: self.clock.now(),
            };
            self.fx.trigger(effect, DeckId::DeckA, Some(120.0), &mut ctx)
        }

        /// Run due cleanup tasks the way the engine does.
        fn run_due(&mut self) -> Vec<EffectKind> {
            let mut ended = Vec::new();
            while let Some((_, task)) = self.tasks.pop_due(self.clock.now()) {
                if let EngineTask::EffectCleanup { kind } = task {
                    let mut ctx = EffectCtx {
                        decks: &mut self.decks,
                        graph: Some(&mut self.graph),
                        tasks: &mut self.tasks,
                        now: self.clock.now(),
                    };
                    if self.fx.finish(kind, &mut ctx) {
                        ended.push(kind);
                    }
                }
            }
            ended
        }
    }

    #[test]
    fn duplicate_trigger_is_noop() {
        let mut r = Rig::new();
        assert_eq!(r.trigger(Effect::new(EffectKind::Filter, 0.5, 4.0)), TriggerOutcome::Started);
        assert_eq!(
            r.trigger(Effect::new(EffectKind::Filter, 1.0, 8.0)),
            TriggerOutcome::AlreadyActive
        );
        assert_eq!(r.tasks.len(), 1, "no second cleanup stacked");
        assert_eq!(r.fx.active_effects().len(), 1);
        assert!((r.fx.active_effects()[0].intensity - 0.5).abs() < 1e-6);
    }

    #[test]
    fn filter_sweeps_down_and_reopens() {
        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Filter, 0.5, 4.0));
        let f = &r.graph.effects().filter_freq;
        assert!((f.value_at(0.0) - 20_000.0).abs() < 1.0);
        assert!((f.value_at(3.2) - 10_000.0).abs() < 1.0, "got {}", f.value_at(3.2));
        assert!((f.value_at(5.0) - 20_000.0).abs() < 1.0);

        r.clock.set(4.9);
        assert!(r.run_due().is_empty());
        r.clock.set(5.0);
        assert_eq!(r.run_due(), vec![EffectKind::Filter]);
        assert!(!r.fx.is_active(EffectKind::Filter));
        assert!(!r.graph.effects().filter_freq.has_events());
    }

    #[test]
    fn filter_floor_respected_at_full_intensity() {
        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Filter, 1.0, 2.0));
        let v = r.graph.effects().filter_freq.value_at(1.6);
        assert!((v - 200.0).abs() < 0.5, "got {v}");
    }

    #[test]
    fn echo_uses_eighth_note_and_caps() {
        assert!((echo_delay_secs(Some(120.0), 0.25) - 0.25).abs() < 1e-9);
        assert!((echo_delay_secs(Some(128.0), 0.25) - 0.234_375).abs() < 1e-9);
        assert_eq!(echo_delay_secs(None, 0.25), 0.25);
        assert_eq!(echo_delay_secs(Some(0.0), 0.3), 0.3);

        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Echo, 1.0, 4.0));
        let bus = r.graph.effects();
        assert!(bus.delay_connected());
        assert!(bus.delay_feedback.value_at(0.0) <= 0.3 + 1e-6);
        assert!((bus.delay_wet.value_at(0.1) - 0.25).abs() < 1e-6);
        assert!(bus.delay_wet.value_at(0.05) < 0.25, "fading in");
        assert!((bus.delay_wet.value_at(5.0)).abs() < 1e-6, "faded out after the tail");

        r.clock.set(5.0);
        assert_eq!(r.run_due(), vec![EffectKind::Echo]);
        assert!(!r.graph.effects().delay_connected());
    }

    #[test]
    fn scratch_restores_gain_and_filter() {
        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Scratch, 0.5, 1.6));
        let g = &r.graph.deck(DeckId::DeckA).gain;
        assert!((g.value_at(0.25) - 0.3).abs() < 1e-6, "second slice");
        assert!((g.value_at(1.7) - 1.0).abs() < 1e-6, "restored after the pattern");
        assert_eq!(r.graph.effects().filter_kind, FilterKind::HighPass);

        r.clock.set(1.6);
        assert_eq!(r.run_due(), vec![EffectKind::Scratch]);
        assert_eq!(r.graph.effects().filter_kind, FilterKind::LowPass);
        assert!((r.graph.effects().filter_freq.value_at(2.0) - 20_000.0).abs() < 1.0);
    }

    #[test]
    fn scratch_leaves_automated_gain_alone() {
        let mut r = Rig::new();
        r.graph.deck_mut(DeckId::DeckA).gain.linear_ramp(0.0, 0.0, 4.0);
        r.trigger(Effect::new(EffectKind::Scratch, 0.5, 1.6));
        let g = &r.graph.deck(DeckId::DeckA).gain;
        assert!((g.value_at(2.0) - 0.5).abs() < 1e-6, "crossfade ramp untouched");
    }

    #[test]
    fn loop_region_set_and_cleared() {
        let mut r = Rig::new();
        r.clock.set(10.0);
        r.trigger(Effect::new(EffectKind::Loop, 1.0, 2.0));
        let region = r.decks.active().loop_region().unwrap();
        assert!((region.start - 10.0).abs() < 1e-9);
        assert!((region.end - 12.0).abs() < 1e-9);
        r.clock.set(14.0);
        assert_eq!(r.run_due(), vec![EffectKind::Loop]);
        assert!(r.decks.active().loop_region().is_none());
    }

    #[test]
    fn reverse_restores_rate() {
        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Reverse, 1.0, 1.0));
        assert!(r.a.rate() < 0.0);
        r.clock.set(1.0);
        r.run_due();
        assert_eq!(r.a.rate(), 1.0);
    }

    #[test]
    fn graph_effects_unsupported_without_graph() {
        let mut r = Rig::new();
        let mut ctx = EffectCtx {
            decks: &mut r.decks,
            graph: None,
            tasks: &mut r.tasks,
            now: 0.0,
        };
        for kind in [EffectKind::Filter, EffectKind::Echo, EffectKind::Scratch] {
            assert_eq!(
                r.fx.trigger(Effect::new(kind, 0.5, 2.0), DeckId::DeckA, None, &mut ctx),
                TriggerOutcome::Unsupported
            );
        }
        assert_eq!(
            r.fx.trigger(Effect::new(EffectKind::Loop, 0.5, 2.0), DeckId::DeckA, None, &mut ctx),
            TriggerOutcome::Started
        );
    }

    #[test]
    fn cancel_all_runs_cleanups_now() {
        let mut r = Rig::new();
        r.trigger(Effect::new(EffectKind::Filter, 0.8, 4.0));
        r.trigger(Effect::new(EffectKind::Echo, 0.8, 4.0));
        r.trigger(Effect::new(EffectKind::Loop, 0.8, 4.0));
        r.clock.set(1.0);
        let mut ctx = EffectCtx {
            decks: &mut r.decks,
            graph: Some(&mut r.graph),
            tasks: &mut r.tasks,
            now: 1.0,
        };
        let mut ended = r.fx.cancel_all(&mut ctx);
        ended.sort_by_key(|k| k.to_string());
        assert_eq!(ended, vec![EffectKind::Echo, EffectKind::Filter, EffectKind::Loop]);
        assert!(r.tasks.is_empty(), "cleanup tasks cancelled");
        assert!(r.fx.active_effects().is_empty());
        assert!(!r.graph.effects().delay_connected());
        assert!(r.decks.active().loop_region().is_none());
        assert!((r.graph.effects().filter_freq.value_at(1.5) - 20_000.0).abs() < 1.0);
    }

    #[test]
    fn effect_new_clamps_inputs() {
        let e = Effect::new(EffectKind::Echo, 3.0, -1.0);
        assert_eq!(e.intensity, 1.0);
        assert!((e.duration - 0.1).abs() < 1e-12);
        assert_eq!(Effect::new(EffectKind::Echo, f32::NAN, 1.0).intensity, 0.0);
    }
}
