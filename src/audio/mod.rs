pub mod bpm_sync;
pub mod clock;
pub mod crossfade;
pub mod deck;
pub mod dsp;
pub mod effects;
pub mod emitter;
pub mod graph;
pub mod param;
