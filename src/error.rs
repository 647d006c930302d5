use thiserror::Error;

/// Failures reported by a [`MediaSource`](crate::media::MediaSource).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    /// The source refused or failed to load the URI.
    #[error("Failed to load {uri}: media error code {code}")]
    Load { uri: String, code: i32 },

    /// `play()` was rejected (autoplay policy, decoder stall, ...).
    #[error("Playback rejected: {0}")]
    PlayRejected(String),

    /// Transport command issued before anything was loaded.
    #[error("No media loaded")]
    NotLoaded,
}

/// Failures while building the audio graph. Always recoverable: the engine
/// falls back to element-volume crossfades.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Filter construction failed: {0}")]
    Filter(String),

    #[error("Audio graph unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error type returned by engine commands.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Hot cue time {time:.3}s outside track bounds 0..={duration:.3}s")]
    CueOutOfRange { time: f64, duration: f64 },

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Unknown hot cue {cue_id} on track {track_id}")]
    UnknownCue { track_id: String, cue_id: u64 },

    #[error("Queue index {index} out of range (queue length {len})")]
    QueueIndex { index: usize, len: usize },

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Engine driver has shut down")]
    DriverClosed,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
