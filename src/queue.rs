use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ── Track ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    /// Location handed to the media source.
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Seconds; unknown until the media source reports it.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub bpm: Option<f64>,
    /// Offset of the first downbeat in seconds (beat-grid anchor).
    #[serde(default)]
    pub first_beat: f64,
}

impl Track {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            title: String::new(),
            artist: String::new(),
            duration: None,
            bpm: None,
            first_beat: 0.0,
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>, artist: impl Into<String>) -> Self {
        self.title = title.into();
        self.artist = artist.into();
        self
    }

    /// BPM if present, finite and positive. Anything else means "no data".
    pub fn valid_bpm(&self) -> Option<f64> {
        self.bpm.filter(|b| b.is_finite() && *b > 0.0)
    }
}

// ── Queue ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

/// Ordered track list with a current index and navigation policy.
///
/// `revision` increases on every mutation of the list or the policy so the
/// engine can tell when its pre-staged next track went stale.
pub struct PlayQueue {
    tracks: Vec<Track>,
    current: usize,
    repeat: RepeatMode,
    shuffle: bool,
    rng: StdRng,
    revision: u64,
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic shuffle order, for tests and simulations.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: 0,
            repeat: RepeatMode::Off,
            shuffle: false,
            rng,
            revision: 0,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.tracks.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current)
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
        self.bump();
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        self.bump();
    }

    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.current = 0;
        self.bump();
    }

    pub fn enqueue(&mut self, track: Track) {
        self.tracks.push(track);
        self.bump();
    }

    /// Insert before `index` (`index == len` appends). The current track
    /// stays current.
    pub fn insert(&mut self, index: usize, track: Track) -> EngineResult<()> {
        if index > self.tracks.len() {
            return Err(EngineError::QueueIndex {
                index,
                len: self.tracks.len(),
            });
        }
        let had_tracks = !self.tracks.is_empty();
        self.tracks.insert(index, track);
        if had_tracks && index <= self.current {
            self.current += 1;
        }
        self.bump();
        Ok(())
    }

    /// Remove a track. Removing the current one makes its successor current.
    pub fn remove(&mut self, index: usize) -> EngineResult<Track> {
        let len = self.tracks.len();
        if index >= len {
            return Err(EngineError::QueueIndex { index, len });
        }
        let removed = self.tracks.remove(index);
        if index < self.current {
            self.current -= 1;
        }
        if self.current >= self.tracks.len() {
            self.current = self.tracks.len().saturating_sub(1);
        }
        self.bump();
        Ok(removed)
    }

    /// Make `index` current (user navigation).
    pub fn jump_to(&mut self, index: usize) -> EngineResult<()> {
        self.check(index)?;
        self.current = index;
        self.bump();
        Ok(())
    }

    /// Move the current index after a completed transition. Does not count
    /// as a mutation.
    pub fn advance_to(&mut self, index: usize) -> EngineResult<()> {
        self.check(index)?;
        self.current = index;
        Ok(())
    }

    /// Index that should play after the current one, computed fresh from the
    /// live policy. `None` means playback stops after this track.
    pub fn next_index(&mut self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if self.repeat == RepeatMode::One {
            return Some(self.current);
        }
        if self.shuffle {
            if len < 2 {
                return (self.repeat == RepeatMode::All).then_some(self.current);
            }
            let pick = self.rng.random_range(0..len - 1);
            return Some(if pick >= self.current { pick + 1 } else { pick });
        }
        let next = self.current + 1;
        if next < len {
            Some(next)
        } else if self.repeat == RepeatMode::All {
            Some(0)
        } else {
            None
        }
    }

    fn check(&self, index: usize) -> EngineResult<()> {
        if self.tracks.is_empty() {
            return Err(EngineError::EmptyQueue);
        }
        if index >= self.tracks.len() {
            return Err(EngineError::QueueIndex {
                index,
                len: self.tracks.len(),
            });
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}
