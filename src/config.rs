use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ── Mix mode ──────────────────────────────────────────────────────────────────

/// Policy deciding *when* an automatic transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MixMode {
    /// Fire on every multiple of `mix_interval_secs` of listening time.
    Interval,
    /// Fire `transition_lead_secs` (or a phrase-aligned lead) before the end.
    #[default]
    TrackEnd,
    /// Fire one second before a late hot cue, falling back to `TrackEnd`.
    HotCue,
}

impl MixMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::TrackEnd => "track_end",
            Self::HotCue => "hot_cue",
        }
    }
}

/// Which crossfade length wins when the planner recommends one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadePrecedence {
    /// `crossfade_secs` set by the user always applies.
    #[default]
    UserSetting,
    /// The plan's recommended duration replaces the user setting.
    Plan,
}

// ── Planner thresholds ────────────────────────────────────────────────────────

/// Hot-cue pairing heuristics. The numbers are tuning constants, not
/// invariants, so every one of them is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Outro cues must sit after this fraction of the current track.
    pub outro_window_start: f64,
    /// Outro cues must leave at least this much track after them (seconds).
    pub outro_min_tail_secs: f64,
    /// An outro cue this far behind the playhead the trigger fired at still
    /// counts (seconds, about one scheduler tick).
    pub playhead_tolerance_secs: f64,
    /// Intro cues of the next track must lie in `[intro_min_secs, intro_max_secs]`.
    pub intro_min_secs: f64,
    pub intro_max_secs: f64,
    /// A pair must score strictly above this to be accepted.
    pub accept_threshold: f32,
    /// Score above which the long crossfade is recommended.
    pub long_fade_threshold: f32,
    /// Score below which the short crossfade is recommended.
    pub short_fade_threshold: f32,
    pub long_fade_secs: f64,
    pub default_fade_secs: f64,
    pub short_fade_secs: f64,
    /// BPM difference tiers for the tempo score (≤ close, ≤ near, ≤ far).
    pub bpm_close: f64,
    pub bpm_near: f64,
    pub bpm_far: f64,
    /// Entry offset into the next track when no plan is accepted.
    pub default_entry_secs: f64,
    /// Entry offset when the next track has no cues at all.
    pub no_cue_entry_secs: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            outro_window_start: 0.6,
            outro_min_tail_secs: 10.0,
            playhead_tolerance_secs: 0.1,
            intro_min_secs: 8.0,
            intro_max_secs: 120.0,
            accept_threshold: 0.3,
            long_fade_threshold: 0.7,
            short_fade_threshold: 0.4,
            long_fade_secs: 6.0,
            default_fade_secs: 4.0,
            short_fade_secs: 3.0,
            bpm_close: 5.0,
            bpm_near: 15.0,
            bpm_far: 30.0,
            default_entry_secs: 8.0,
            no_cue_entry_secs: 4.0,
        }
    }
}

// ── Effect limits ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectLimits {
    /// Echo feedback ceiling (runaway protection).
    pub max_feedback: f32,
    /// Echo wet level ceiling.
    pub max_wet: f32,
    /// Echo delay when the BPM is unknown (seconds).
    pub default_echo_delay_secs: f64,
    /// Fully-open lowpass corner (Hz).
    pub filter_open_hz: f32,
    /// Lowest corner a full-intensity sweep reaches (Hz).
    pub filter_floor_hz: f32,
    /// Highest corner the scratch highpass sweep reaches (Hz).
    pub scratch_highpass_hz: f32,
    /// How many loop lengths a loop effect stays active for.
    pub loop_repeats: u32,
}

impl Default for EffectLimits {
    fn default() -> Self {
        Self {
            max_feedback: 0.3,
            max_wet: 0.25,
            default_echo_delay_secs: 0.25,
            filter_open_hz: 20_000.0,
            filter_floor_hz: 200.0,
            scratch_highpass_hz: 1_200.0,
            loop_repeats: 2,
        }
    }
}

// ── MixConfig ─────────────────────────────────────────────────────────────────

/// Complete engine configuration. Serialised as JSON on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub mix_mode: MixMode,
    /// Interval mode: seconds of listening between transitions.
    pub mix_interval_secs: f64,
    /// Track-end mode: minimum lead before the end of the track.
    pub transition_lead_secs: f64,
    /// User crossfade length in seconds.
    pub crossfade_secs: f64,
    pub auto_transition: bool,
    pub bpm_sync: bool,
    pub crossfade_precedence: CrossfadePrecedence,
    /// Target gain of the audible deck (0.0 – 1.0).
    pub master_volume: f32,
    /// Fire the planner's recommended effects at transition start.
    pub auto_effects: bool,
    /// Rate of UI position updates (Hz). Trigger evaluation is unthrottled.
    pub position_update_hz: f64,
    pub planner: PlannerConfig,
    pub effects: EffectLimits,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            mix_mode: MixMode::TrackEnd,
            mix_interval_secs: 60.0,
            transition_lead_secs: 10.0,
            crossfade_secs: 4.0,
            auto_transition: true,
            bpm_sync: true,
            crossfade_precedence: CrossfadePrecedence::UserSetting,
            master_volume: 1.0,
            auto_effects: true,
            position_update_hz: 4.0,
            planner: PlannerConfig::default(),
            effects: EffectLimits::default(),
        }
    }
}

impl MixConfig {
    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> EngineResult<()> {
        positive("mix_interval_secs", self.mix_interval_secs)?;
        positive("crossfade_secs", self.crossfade_secs)?;
        positive("position_update_hz", self.position_update_hz)?;
        if !self.transition_lead_secs.is_finite() || self.transition_lead_secs < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "transition_lead_secs must be finite and >= 0, got {}",
                self.transition_lead_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(EngineError::InvalidConfig(format!(
                "master_volume must be within 0..=1, got {}",
                self.master_volume
            )));
        }
        let p = &self.planner;
        if !p.playhead_tolerance_secs.is_finite() || p.playhead_tolerance_secs < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "planner.playhead_tolerance_secs must be finite and >= 0, got {}",
                p.playhead_tolerance_secs
            )));
        }
        if p.intro_min_secs > p.intro_max_secs {
            return Err(EngineError::InvalidConfig(
                "planner.intro_min_secs exceeds planner.intro_max_secs".to_string(),
            ));
        }
        if self.effects.max_feedback >= 1.0 {
            return Err(EngineError::InvalidConfig(
                "effects.max_feedback must stay below 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: MixConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        log::info!("Loaded mix config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{name} must be finite and > 0, got {value}"
        )))
    }
}
