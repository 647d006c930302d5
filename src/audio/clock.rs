use std::time::Instant;

/// High-resolution audio time in seconds. Parameter automation is keyed to
/// this clock, never to the UI polling cadence.
pub trait AudioClock {
    fn current_time(&self) -> f64;

    /// Called by the graph after rendering `frames` frames. Clocks that follow
    /// an external source ignore it.
    fn advance(&mut self, _frames: u64, _sample_rate: u32) {}
}

/// Wall/timer time in seconds, used for deferred tasks and the driver tick.
pub trait WallClock {
    fn now(&self) -> f64;
}

/// Audio clock counting rendered frames, the way a device callback does.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    frames: u64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self { frames: 0, sample_rate }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl AudioClock for FrameClock {
    fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    fn advance(&mut self, frames: u64, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.frames += frames;
    }
}

/// Monotonic wall clock anchored at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
