use serde::{Deserialize, Serialize};

use super::{
    clock::AudioClock,
    deck::DeckId,
    dsp::{Compressor, CompressorConfig, FeedbackDelay, FilterKind, SweepFilter},
    param::AudioParam,
};
use crate::error::GraphError;

/// Smallest gain a deck is ever automated to. Exponential approaches toward
/// literal zero are undefined and a hard zero clicks.
pub const GAIN_FLOOR: f32 = 1e-4;

/// Parameters are evaluated once per control block (k-rate).
const CONTROL_BLOCK: usize = 32;

const FILTER_OPEN_HZ: f32 = 20_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    pub sample_rate: u32,
    pub compressor: CompressorConfig,
    /// Output gain after the compressor (0.0 – 1.0).
    pub master_gain: f32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            compressor: CompressorConfig::default(),
            master_gain: 1.0,
        }
    }
}

// ── Deck strip ────────────────────────────────────────────────────────────────

/// Per-deck gain stage. A disconnected deck bypasses gain and effects and
/// reaches the output at its element volume only.
pub struct DeckStrip {
    pub gain: AudioParam,
    connected: bool,
}

impl DeckStrip {
    fn new() -> Self {
        Self {
            gain: AudioParam::new(1.0, 0.0, 1.0),
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

// ── Effects bus ───────────────────────────────────────────────────────────────

/// Shared effects stage: sweepable filter followed by a feedback delay.
pub struct EffectsBus {
    pub filter_kind: FilterKind,
    pub filter_freq: AudioParam,
    pub delay_time: AudioParam,
    pub delay_feedback: AudioParam,
    pub delay_wet: AudioParam,
    delay_enabled: bool,
    filter: SweepFilter,
    delay: FeedbackDelay,
}

impl EffectsBus {
    fn new(sample_rate: f32) -> Result<Self, GraphError> {
        Ok(Self {
            filter_kind: FilterKind::LowPass,
            filter_freq: AudioParam::new(FILTER_OPEN_HZ, 10.0, FILTER_OPEN_HZ),
            delay_time: AudioParam::new(0.25, 0.001, super::dsp::delay::MAX_DELAY_SECS),
            delay_feedback: AudioParam::new(0.0, 0.0, 0.95),
            delay_wet: AudioParam::new(0.0, 0.0, 1.0),
            delay_enabled: false,
            filter: SweepFilter::new(sample_rate, FilterKind::LowPass, FILTER_OPEN_HZ)?,
            delay: FeedbackDelay::new(sample_rate),
        })
    }

    /// Route the mix through the delay line.
    pub fn connect_delay(&mut self) {
        self.delay_enabled = true;
    }

    /// Take the delay out of the path and drop its tail.
    pub fn disconnect_delay(&mut self) {
        self.delay_enabled = false;
        self.delay.clear();
    }

    pub fn delay_connected(&self) -> bool {
        self.delay_enabled
    }

    /// Fully open lowpass, no automation.
    pub fn reset_filter(&mut self) {
        self.filter_kind = FilterKind::LowPass;
        self.filter_freq.set_value(FILTER_OPEN_HZ);
    }

    fn prune(&mut self, t: f64) {
        self.filter_freq.prune_before(t);
        self.delay_time.prune_before(t);
        self.delay_feedback.prune_before(t);
        self.delay_wet.prune_before(t);
    }
}

// ── AudioGraph ────────────────────────────────────────────────────────────────

/// Two deck strips → shared effects → compressor → master.
///
/// All automation is keyed to the graph's own [`AudioClock`], which advances
/// with rendered frames (or follows an external clock).
pub struct AudioGraph {
    sample_rate: u32,
    clock: Box<dyn AudioClock>,
    decks: [DeckStrip; 2],
    effects: EffectsBus,
    compressor: Compressor,
    pub master: AudioParam,
}

impl AudioGraph {
    pub fn new(settings: GraphSettings, clock: Box<dyn AudioClock>) -> Result<Self, GraphError> {
        if !(8_000..=192_000).contains(&settings.sample_rate) {
            return Err(GraphError::InvalidSampleRate(settings.sample_rate));
        }
        let sr = settings.sample_rate as f32;
        let effects = EffectsBus::new(sr)?;
        log::info!(
            "Audio graph ready: {} Hz, compressor {}",
            settings.sample_rate,
            if settings.compressor.enabled { "on" } else { "off" }
        );
        Ok(Self {
            sample_rate: settings.sample_rate,
            clock,
            decks: [DeckStrip::new(), DeckStrip::new()],
            effects,
            compressor: Compressor::new(sr, settings.compressor),
            master: AudioParam::new(settings.master_gain.clamp(0.0, 1.0), 0.0, 1.0),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Audio-clock time in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    pub fn deck(&self, id: DeckId) -> &DeckStrip {
        &self.decks[id.index()]
    }

    pub fn deck_mut(&mut self, id: DeckId) -> &mut DeckStrip {
        &mut self.decks[id.index()]
    }

    /// Actual gain of a deck right now (not a cached target).
    pub fn gain_now(&self, id: DeckId) -> f32 {
        self.decks[id.index()].gain.value_at(self.current_time())
    }

    pub fn connect(&mut self, id: DeckId) {
        self.decks[id.index()].connected = true;
    }

    pub fn disconnect(&mut self, id: DeckId) {
        self.decks[id.index()].connected = false;
    }

    pub fn both_connected(&self) -> bool {
        self.decks.iter().all(DeckStrip::is_connected)
    }

    pub fn effects(&self) -> &EffectsBus {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectsBus {
        &mut self.effects
    }

    /// Drop automation that finished in the past.
    pub fn prune_automation(&mut self) {
        let now = self.current_time();
        for strip in &mut self.decks {
            strip.gain.prune_before(now);
        }
        self.effects.prune(now);
        self.master.prune_before(now);
    }

    /// Advance the clock without producing audio.
    pub fn skip_frames(&mut self, frames: u64) {
        self.clock.advance(frames, self.sample_rate);
    }

    /// Mix two interleaved stereo deck buffers into `out`.
    ///
    /// Deck buffers arrive already scaled by their element volume. Missing
    /// samples count as silence.
    pub fn render(&mut self, deck_a: &[f32], deck_b: &[f32], out: &mut [f32]) {
        let frames = out.len() / 2;
        let t0 = self.current_time();
        let dt = 1.0 / self.sample_rate as f64;

        let mut gains = [0.0_f32; 2];
        let mut master = 1.0_f32;
        let (mut delay_time, mut feedback, mut wet) = (0.25_f32, 0.0_f32, 0.0_f32);

        for f in 0..frames {
            if f % CONTROL_BLOCK == 0 {
                let t = t0 + f as f64 * dt;
                gains = [
                    self.decks[0].gain.value_at(t),
                    self.decks[1].gain.value_at(t),
                ];
                master = self.master.value_at(t);
                let freq = self.effects.filter_freq.value_at(t);
                self.effects.filter.set(self.effects.filter_kind, freq);
                delay_time = self.effects.delay_time.value_at(t);
                feedback = self.effects.delay_feedback.value_at(t);
                wet = self.effects.delay_wet.value_at(t);
            }

            let a = frame(deck_a, f);
            let b = frame(deck_b, f);
            let (mut l, mut r) = (0.0_f32, 0.0_f32);
            let (mut direct_l, mut direct_r) = (0.0_f32, 0.0_f32);
            for (i, (sl, sr)) in [a, b].into_iter().enumerate() {
                if self.decks[i].connected {
                    l += sl * gains[i];
                    r += sr * gains[i];
                } else {
                    direct_l += sl;
                    direct_r += sr;
                }
            }

            self.effects.filter.process_stereo(&mut l, &mut r);
            if self.effects.delay_enabled {
                let (wl, wr) = self.effects.delay.process(l, r, delay_time, feedback, wet);
                l += wl;
                r += wr;
            }
            self.compressor.process_stereo(&mut l, &mut r);

            out[2 * f] = l * master + direct_l;
            out[2 * f + 1] = r * master + direct_r;
        }

        self.clock.advance(frames as u64, self.sample_rate);
    }
}

#[inline]
fn frame(buf: &[f32], f: usize) -> (f32, f32) {
    (
        buf.get(2 * f).copied().unwrap_or(0.0),
        buf.get(2 * f + 1).copied().unwrap_or(0.0),
    )
}
