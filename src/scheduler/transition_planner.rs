use serde::{Deserialize, Serialize};

use crate::audio::effects::{Effect, EffectKind};
use crate::config::PlannerConfig;
use crate::cues::{CueKind, HotCue};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionPlan {
    pub outro_cue: HotCue,
    pub intro_cue: HotCue,
    pub compatibility_score: f32,
    pub bpm_compatible: bool,
    pub phrase_aligned: bool,
    pub recommended_crossfade_secs: f64,
    pub recommended_effects: Vec<Effect>,
}

/// What the planner reads about the two tracks.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    /// Playhead of the current track when the trigger fired.
    pub position: f64,
    pub duration: Option<f64>,
    pub current_cues: &'a [HotCue],
    pub next_cues: &'a [HotCue],
    pub current_bpm: Option<f64>,
    pub next_bpm: Option<f64>,
}

/// Chooses exit/entry cue pairs for one transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPlanner {
    config: PlannerConfig,
}

impl TransitionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlannerConfig) {
        self.config = config;
    }

    /// Best-scoring cue pair, or `None` when no pair clears the acceptance
    /// threshold (missing cues or unknown duration count as "no data").
    pub fn plan(&self, input: &PlanInput<'_>) -> Option<TransitionPlan> {
        let cfg = &self.config;
        let duration = input.duration.filter(|d| d.is_finite() && *d > 0.0)?;
        let outro_lo = cfg.outro_window_start * duration;
        let outro_hi = duration - cfg.outro_min_tail_secs;
        let not_before = input.position - cfg.playhead_tolerance_secs;

        let outros = input
            .current_cues
            .iter()
            .filter(|c| c.time >= outro_lo && c.time <= outro_hi && c.time >= not_before);
        let mut best: Option<(f32, &HotCue, &HotCue)> = None;
        for outro in outros {
            let intros = input
                .next_cues
                .iter()
                .filter(|c| c.time >= cfg.intro_min_secs && c.time <= cfg.intro_max_secs);
            for intro in intros {
                let score = self.score(outro, intro, input.current_bpm, input.next_bpm);
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, outro, intro));
                }
            }
        }

        let (score, outro, intro) = best?;
        if score <= cfg.accept_threshold {
            log::debug!(
                "Best cue pair '{}' -> '{}' scored {score:.2}, below {:.2}; plan discarded",
                outro.name,
                intro.name,
                cfg.accept_threshold
            );
            return None;
        }

        let fade = self.recommended_fade(score);
        let gap = bpm_gap(input.current_bpm, input.next_bpm);
        Some(TransitionPlan {
            outro_cue: outro.clone(),
            intro_cue: intro.clone(),
            compatibility_score: score,
            bpm_compatible: gap.is_some_and(|g| g <= cfg.bpm_far),
            phrase_aligned: outro.kind == CueKind::Phrase && intro.kind == CueKind::Phrase,
            recommended_crossfade_secs: fade,
            recommended_effects: bpm_gap_effects(cfg, input.current_bpm, input.next_bpm, fade),
        })
    }

    /// Entry point into the next track when there is no accepted plan.
    pub fn fallback_entry(&self, next_cues: &[HotCue]) -> f64 {
        if next_cues.is_empty() {
            self.config.no_cue_entry_secs
        } else {
            self.config.default_entry_secs
        }
    }

    fn recommended_fade(&self, score: f32) -> f64 {
        let cfg = &self.config;
        if score > cfg.long_fade_threshold {
            cfg.long_fade_secs
        } else if score < cfg.short_fade_threshold {
            cfg.short_fade_secs
        } else {
            cfg.default_fade_secs
        }
    }

    /// Pair score in `0.0..=1.0`.
    pub fn score(
        &self,
        outro: &HotCue,
        intro: &HotCue,
        current_bpm: Option<f64>,
        next_bpm: Option<f64>,
    ) -> f32 {
        let cfg = &self.config;
        let mut score = 0.0_f32;

        let phrases = [outro.kind, intro.kind]
            .iter()
            .filter(|k| **k == CueKind::Phrase)
            .count();
        score += match phrases {
            2 => 0.4,
            1 => 0.2,
            _ => 0.0,
        };

        if let Some(gap) = bpm_gap(current_bpm, next_bpm) {
            score += if gap <= cfg.bpm_close {
                0.3
            } else if gap <= cfg.bpm_near {
                0.15
            } else if gap <= cfg.bpm_far {
                0.05
            } else {
                0.0
            };
        }

        score += naming_bonus(&outro.name, &intro.name);
        score.clamp(0.0, 1.0)
    }
}

/// Absolute tempo difference when both BPMs are usable.
fn bpm_gap(current: Option<f64>, next: Option<f64>) -> Option<f64> {
    let ok = |b: Option<f64>| b.filter(|v| v.is_finite() && *v > 0.0);
    Some((ok(current)? - ok(next)?).abs())
}

/// A filter sweep to mask tempos too far apart to blend, scaled to the gap.
pub fn bpm_gap_effects(
    cfg: &PlannerConfig,
    current_bpm: Option<f64>,
    next_bpm: Option<f64>,
    fade_secs: f64,
) -> Vec<Effect> {
    match bpm_gap(current_bpm, next_bpm) {
        Some(gap) if gap > cfg.bpm_far => {
            let intensity = (gap / (2.0 * cfg.bpm_far)).min(1.0) as f32;
            vec![Effect::new(EffectKind::Filter, intensity, fade_secs)]
        }
        _ => Vec::new(),
    }
}

fn naming_bonus(outro: &str, intro: &str) -> f32 {
    let outro = outro.to_lowercase();
    let intro = intro.to_lowercase();
    let has = |s: &str, words: &[&str]| words.iter().any(|w| s.contains(w));

    if has(&outro, &["outro", "end"]) && has(&intro, &["intro", "start"]) {
        0.2
    } else if outro.contains("break") && intro.contains("drop") {
        0.15
    } else if has(&outro, &["bridge", "verse"]) || has(&intro, &["bridge", "verse"]) {
        0.1
    } else {
        0.0
    }
}
