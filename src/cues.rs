use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_CUE_COLOR: &str = "#f59e0b";

// ── Hot cues ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    #[default]
    Cue,
    Loop,
    /// Structural section boundary (e.g. a 32-beat block).
    Phrase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotCue {
    pub id: u64,
    pub track_id: String,
    pub name: String,
    /// Seconds from track start.
    pub time: f64,
    pub color: String,
    pub kind: CueKind,
}

/// Payload for creating a cue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewHotCue {
    pub name: String,
    pub time: f64,
    #[serde(default)]
    pub kind: CueKind,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewHotCue {
    pub fn new(name: impl Into<String>, time: f64, kind: CueKind) -> Self {
        Self {
            name: name.into(),
            time,
            kind,
            color: None,
        }
    }
}

/// Per-track hot cues, each list kept ordered by time.
///
/// Cues are only ever created or removed by explicit calls.
#[derive(Debug, Default)]
pub struct HotCueStore {
    by_track: HashMap<String, Vec<HotCue>>,
    next_id: u64,
}

impl HotCueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `duration` bounds the cue time when the track length is known.
    pub fn add(
        &mut self,
        track_id: &str,
        cue: NewHotCue,
        duration: Option<f64>,
    ) -> EngineResult<HotCue> {
        check_time(cue.time, duration)?;
        self.next_id += 1;
        let hot = HotCue {
            id: self.next_id,
            track_id: track_id.to_string(),
            name: cue.name,
            time: cue.time,
            color: cue.color.unwrap_or_else(|| DEFAULT_CUE_COLOR.to_string()),
            kind: cue.kind,
        };
        let list = self.by_track.entry(track_id.to_string()).or_default();
        let at = list.partition_point(|c| c.time <= hot.time);
        list.insert(at, hot.clone());
        log::debug!("Hot cue {} '{}' added to {track_id} at {:.3}s", hot.id, hot.name, hot.time);
        Ok(hot)
    }

    pub fn remove(&mut self, track_id: &str, cue_id: u64) -> EngineResult<HotCue> {
        let list = self
            .by_track
            .get_mut(track_id)
            .ok_or_else(|| unknown(track_id, cue_id))?;
        let idx = list
            .iter()
            .position(|c| c.id == cue_id)
            .ok_or_else(|| unknown(track_id, cue_id))?;
        let removed = list.remove(idx);
        if list.is_empty() {
            self.by_track.remove(track_id);
        }
        Ok(removed)
    }

    pub fn move_cue(
        &mut self,
        track_id: &str,
        cue_id: u64,
        time: f64,
        duration: Option<f64>,
    ) -> EngineResult<()> {
        check_time(time, duration)?;
        let list = self
            .by_track
            .get_mut(track_id)
            .ok_or_else(|| unknown(track_id, cue_id))?;
        let cue = list
            .iter_mut()
            .find(|c| c.id == cue_id)
            .ok_or_else(|| unknown(track_id, cue_id))?;
        cue.time = time;
        list.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(())
    }

    /// Cues of a track ordered by time; empty when it has none.
    pub fn cues(&self, track_id: &str) -> &[HotCue] {
        self.by_track.get(track_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear_track(&mut self, track_id: &str) -> usize {
        self.by_track.remove(track_id).map(|v| v.len()).unwrap_or(0)
    }

    /// First cue strictly after `time`.
    pub fn next_after(&self, track_id: &str, time: f64) -> Option<&HotCue> {
        self.cues(track_id).iter().find(|c| c.time > time)
    }

    pub fn len(&self) -> usize {
        self.by_track.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty()
    }

    pub fn export_json(&self) -> EngineResult<String> {
        let mut all: Vec<&HotCue> = self.by_track.values().flatten().collect();
        all.sort_by(|a, b| a.track_id.cmp(&b.track_id).then(a.time.total_cmp(&b.time)));
        Ok(serde_json::to_string_pretty(&all)?)
    }

    /// Import cues exported by [`export_json`](Self::export_json). Imported
    /// cues get fresh ids; entries with a negative or non-finite time are
    /// skipped. Returns how many were added.
    pub fn import_json(&mut self, json: &str) -> EngineResult<usize> {
        let incoming: Vec<HotCue> = serde_json::from_str(json)?;
        let mut added = 0;
        for cue in incoming {
            let track_id = cue.track_id.clone();
            let new = NewHotCue {
                name: cue.name,
                time: cue.time,
                kind: cue.kind,
                color: Some(cue.color),
            };
            match self.add(&track_id, new, None) {
                Ok(_) => added += 1,
                Err(e) => log::warn!("Skipping imported cue for {track_id}: {e}"),
            }
        }
        Ok(added)
    }
}

fn check_time(time: f64, duration: Option<f64>) -> EngineResult<()> {
    let upper = duration.filter(|d| d.is_finite() && *d > 0.0);
    let in_range = time.is_finite() && time >= 0.0 && upper.map_or(true, |d| time <= d);
    if in_range {
        Ok(())
    } else {
        Err(EngineError::CueOutOfRange {
            time,
            duration: upper.unwrap_or(f64::INFINITY),
        })
    }
}

fn unknown(track_id: &str, cue_id: u64) -> EngineError {
    EngineError::UnknownCue {
        track_id: track_id.to_string(),
        cue_id,
    }
}
