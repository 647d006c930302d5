use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::crossfade::CrossfadeStrategy;
use crate::scheduler::TriggerReason;

pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Completed,
    /// Media failure; the previous deck kept playing.
    Abandoned,
    /// Host cancelled (DJ mode off, mix mode or queue change).
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: u64,
    pub from_track: Option<String>,
    pub to_track: String,
    pub reason: TriggerReason,
    pub strategy: CrossfadeStrategy,
    pub crossfade_secs: f64,
    /// Plan score when a cue pair was accepted.
    pub score: Option<f32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<TransitionOutcome>,
}

/// Bounded log of recent transitions, newest last.
#[derive(Debug, Default)]
pub struct TransitionHistory {
    records: VecDeque<TransitionRecord>,
}

impl TransitionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TransitionRecord) {
        if self.records.len() == HISTORY_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Stamp the outcome of transition `id` if it is still in the log.
    pub fn finish(&mut self, id: u64, outcome: TransitionOutcome) -> bool {
        match self.records.iter_mut().rev().find(|r| r.id == id) {
            Some(r) if r.outcome.is_none() => {
                r.outcome = Some(outcome);
                r.finished_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut TransitionRecord> {
        self.records.iter_mut().rev().find(|r| r.id == id)
    }

    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
