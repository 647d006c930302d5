pub mod simulated;

use serde::{Deserialize, Serialize};

use crate::error::MediaError;

/// Playback events raised by a media source. Collected with
/// [`MediaSource::poll_events`] and routed by the deck emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaEvent {
    /// The loaded track is decoded far enough to start playback.
    CanPlay,
    /// Playhead moved while playing.
    TimeUpdate { position: f64 },
    /// Playhead reached the end of the track.
    Ended,
    /// Load or decode failure, with the source's numeric error code.
    Error { code: i32 },
}

/// One decoded/streamed track with transport controls.
///
/// Implementations do their decoding elsewhere; the engine only drives
/// transport and reads the playhead. `load` returns once the request is
/// accepted. Readiness or failure arrives later as [`MediaEvent::CanPlay`] or
/// [`MediaEvent::Error`].
pub trait MediaSource {
    fn load(&mut self, uri: &str) -> Result<(), MediaError>;

    /// Start (or resume) playback. Rejections are reported synchronously.
    fn play(&mut self) -> Result<(), MediaError>;

    fn pause(&mut self);

    /// Playhead in seconds.
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, secs: f64);

    /// Track length in seconds, `None` until known.
    fn duration(&self) -> Option<f64>;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    /// Element output volume (0.0 – 1.0). Only the fallback crossfade uses it.
    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    fn is_playing(&self) -> bool;

    /// Drain events raised since the previous poll.
    fn poll_events(&mut self) -> Vec<MediaEvent>;
}
