use serde::{Deserialize, Serialize};

use super::deck::{DeckId, Decks};

/// Outcome of a sync request, reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Rate applied to both decks.
    Applied { ratio: f64 },
    /// Sync is switched off.
    Disabled,
    /// One of the tempos is unknown or invalid; both decks stay at 1.0.
    MissingBpm,
}

/// Tempo matching between the outgoing and incoming deck.
#[derive(Debug, Clone)]
pub struct BpmSync {
    enabled: bool,
    source_bpm: Option<f64>,
    target_bpm: Option<f64>,
    ratio: f64,
}

impl BpmSync {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            source_bpm: None,
            target_bpm: None,
            ratio: 1.0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn source_bpm(&self) -> Option<f64> {
        self.source_bpm
    }

    pub fn target_bpm(&self) -> Option<f64> {
        self.target_bpm
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// `target / current` when enabled and both tempos are usable, else 1.0.
    /// Never NaN or infinite.
    pub fn compute_ratio(enabled: bool, current: Option<f64>, target: Option<f64>) -> f64 {
        if !enabled {
            return 1.0;
        }
        match (valid(current), valid(target)) {
            (Some(c), Some(t)) => {
                let r = t / c;
                if r.is_finite() && r > 0.0 {
                    r
                } else {
                    1.0
                }
            }
            _ => 1.0,
        }
    }

    /// Run both decks at `target / current` for the length of the fade.
    /// Disabled sync or an unknown tempo leaves both at 1.0.
    pub fn apply(
        &mut self,
        decks: &mut Decks,
        outgoing: DeckId,
        current: Option<f64>,
        target: Option<f64>,
    ) -> SyncOutcome {
        self.source_bpm = valid(current);
        self.target_bpm = valid(target);

        let outcome = if !self.enabled {
            SyncOutcome::Disabled
        } else if self.source_bpm.is_none() || self.target_bpm.is_none() {
            log::info!(
                "BPM sync skipped: tempo unknown (current {current:?}, target {target:?})"
            );
            SyncOutcome::MissingBpm
        } else {
            SyncOutcome::Applied {
                ratio: Self::compute_ratio(true, current, target),
            }
        };
        self.ratio = match outcome {
            SyncOutcome::Applied { ratio } => ratio,
            _ => 1.0,
        };
        for id in [outgoing, outgoing.other()] {
            decks.get_mut(id).set_rate(self.ratio);
        }
        if let SyncOutcome::Applied { ratio } = outcome {
            log::info!(
                "BPM sync: {:.2} -> {:.2} BPM, rate {ratio:.4} on both decks",
                self.source_bpm.unwrap_or_default(),
                self.target_bpm.unwrap_or_default(),
            );
        }
        outcome
    }

    /// Put both decks back to native speed.
    pub fn reset(&mut self, decks: &mut Decks) {
        for id in DeckId::ALL {
            decks.get_mut(id).set_rate(1.0);
        }
        self.ratio = 1.0;
        self.source_bpm = None;
        self.target_bpm = None;
    }
}

fn valid(bpm: Option<f64>) -> Option<f64> {
    bpm.filter(|b| b.is_finite() && *b > 0.0)
}
