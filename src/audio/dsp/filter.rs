use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Response of the shared effects filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    LowPass,
    HighPass,
}

impl FilterKind {
    fn biquad_type(self) -> Type<f32> {
        match self {
            FilterKind::LowPass => Type::LowPass,
            FilterKind::HighPass => Type::HighPass,
        }
    }
}

/// Stereo Butterworth filter whose corner can be swept while running.
///
/// Coefficients are recomputed only when the corner moves by more than a
/// hertz, so sweeping from automation stays cheap.
pub struct SweepFilter {
    sample_rate: f32,
    kind: FilterKind,
    freq_hz: f32,
    left: DirectForm2Transposed<f32>,
    right: DirectForm2Transposed<f32>,
}

impl SweepFilter {
    pub fn new(sample_rate: f32, kind: FilterKind, freq_hz: f32) -> Result<Self, GraphError> {
        let coeffs = build(sample_rate, kind, freq_hz)?;
        Ok(Self {
            sample_rate,
            kind,
            freq_hz: clamp_freq(sample_rate, freq_hz),
            left: DirectForm2Transposed::<f32>::new(coeffs),
            right: DirectForm2Transposed::<f32>::new(coeffs),
        })
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn freq_hz(&self) -> f32 {
        self.freq_hz
    }

    /// Retune the filter. Keeps the state so the sweep does not click.
    pub fn set(&mut self, kind: FilterKind, freq_hz: f32) {
        let freq_hz = clamp_freq(self.sample_rate, freq_hz);
        if kind == self.kind && (freq_hz - self.freq_hz).abs() < 1.0 {
            return;
        }
        match build(self.sample_rate, kind, freq_hz) {
            Ok(coeffs) => {
                self.left.update_coefficients(coeffs);
                self.right.update_coefficients(coeffs);
                self.kind = kind;
                self.freq_hz = freq_hz;
            }
            Err(e) => log::debug!("Filter retune to {freq_hz} Hz ignored: {e}"),
        }
    }

    #[inline]
    pub fn process_stereo(&mut self, left: &mut f32, right: &mut f32) {
        *left = self.left.run(*left);
        *right = self.right.run(*right);
    }

    pub fn reset(&mut self) {
        self.left.reset_state();
        self.right.reset_state();
    }
}

fn clamp_freq(sample_rate: f32, freq_hz: f32) -> f32 {
    freq_hz.clamp(10.0, sample_rate / 2.0 - 1.0)
}

fn build(
    sample_rate: f32,
    kind: FilterKind,
    freq_hz: f32,
) -> Result<Coefficients<f32>, GraphError> {
    let f0 = clamp_freq(sample_rate, freq_hz);
    let fs = sample_rate.hz();
    Coefficients::<f32>::from_params(kind.biquad_type(), fs, f0.hz(), Q_BUTTERWORTH_F32)
        .map_err(|e| GraphError::Filter(format!("{e:?}")))
}
