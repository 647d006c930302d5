use serde::{Deserialize, Serialize};

use crate::config::MixConfig;
use crate::queue::PlayQueue;

/// Scheduler phase. `Transitioning` spans trigger fire to deck-swap
/// completion and is the only mutual-exclusion primitive in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    #[default]
    Idle,
    /// Next track staged on the idle deck, trigger being watched.
    Armed,
    Transitioning,
}

/// The single mutable session. Owned by the engine; every scheduler
/// operation reads it fresh instead of working from captured copies.
pub struct SessionState {
    pub queue: PlayQueue,
    pub config: MixConfig,
    phase: TransitionPhase,
    progress: f64,
}

impl SessionState {
    pub fn new(config: MixConfig, queue: PlayQueue) -> Self {
        Self {
            queue,
            config,
            phase: TransitionPhase::Idle,
            progress: 0.0,
        }
    }

    pub fn phase(&self) -> TransitionPhase {
        self.phase
    }

    pub fn is_transitioning(&self) -> bool {
        self.phase == TransitionPhase::Transitioning
    }

    pub fn is_armed(&self) -> bool {
        self.phase == TransitionPhase::Armed
    }

    /// Transition progress in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn set_progress(&mut self, progress: f64) {
        if self.is_transitioning() && progress.is_finite() {
            self.progress = progress.clamp(0.0, 1.0);
        }
    }

    /// Enter or leave `Armed`. Ignored while a transition is in flight.
    pub fn set_armed(&mut self, armed: bool) {
        if self.is_transitioning() {
            return;
        }
        self.phase = if armed {
            TransitionPhase::Armed
        } else {
            TransitionPhase::Idle
        };
    }

    /// Claim the transition slot. Returns `false` (and changes nothing) if a
    /// transition is already running.
    pub fn begin_transition(&mut self) -> bool {
        if self.is_transitioning() {
            log::debug!("Transition request ignored: already transitioning");
            return false;
        }
        self.phase = TransitionPhase::Transitioning;
        self.progress = 0.0;
        true
    }

    /// Release the slot. Always leaves the session idle with zero progress.
    pub fn end_transition(&mut self) {
        self.phase = TransitionPhase::Idle;
        self.progress = 0.0;
    }
}
