pub mod compressor;
pub mod delay;
pub mod filter;

pub use compressor::{Compressor, CompressorConfig};
pub use delay::FeedbackDelay;
pub use filter::{FilterKind, SweepFilter};

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.abs().max(1e-10).log10()
}
