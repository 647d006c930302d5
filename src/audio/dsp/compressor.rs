use serde::{Deserialize, Serialize};

use super::{db_to_linear, linear_to_db};

// ── Master bus compressor ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub enabled: bool,
    /// Compression threshold in dBFS
    pub threshold_db: f32,
    /// Compression ratio (e.g. 4.0 = 4:1)
    pub ratio: f32,
    /// Knee width in dB (0 = hard knee)
    pub knee_db: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_db: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -12.0,
            ratio: 4.0,
            knee_db: 6.0,
            attack_ms: 3.0,
            release_ms: 250.0,
            makeup_db: 0.0,
        }
    }
}

/// Stereo-linked peak compressor with soft knee. Catches the summed peak
/// while both decks overlap during a crossfade.
pub struct Compressor {
    config: CompressorConfig,
    /// Smoothed detector level (linear)
    detector: f32,
    attack_coeff: f32,
    release_coeff: f32,
    makeup_gain: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32, config: CompressorConfig) -> Self {
        Self {
            attack_coeff: time_coeff(config.attack_ms, sample_rate),
            release_coeff: time_coeff(config.release_ms, sample_rate),
            makeup_gain: db_to_linear(config.makeup_db),
            detector: 0.0,
            config,
        }
    }

    pub fn with_defaults(sample_rate: f32) -> Self {
        Self::new(sample_rate, CompressorConfig::default())
    }

    pub fn set_config(&mut self, sample_rate: f32, config: CompressorConfig) {
        self.attack_coeff = time_coeff(config.attack_ms, sample_rate);
        self.release_coeff = time_coeff(config.release_ms, sample_rate);
        self.makeup_gain = db_to_linear(config.makeup_db);
        self.config = config;
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Current gain reduction in dB (≤ 0).
    pub fn reduction_db(&self) -> f32 {
        self.compute_gain_db(linear_to_db(self.detector.max(1e-10)))
    }

    #[inline]
    pub fn process_stereo(&mut self, left: &mut f32, right: &mut f32) {
        if !self.config.enabled {
            return;
        }
        let peak = left.abs().max(right.abs());
        let coeff = if peak > self.detector {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.detector = coeff * self.detector + (1.0 - coeff) * peak;

        let level_db = linear_to_db(self.detector.max(1e-10));
        let gain = db_to_linear(self.compute_gain_db(level_db)) * self.makeup_gain;
        *left *= gain;
        *right *= gain;
    }

    #[inline]
    fn compute_gain_db(&self, level_db: f32) -> f32 {
        let t = self.config.threshold_db;
        let r = self.config.ratio.max(1.0);
        let w = self.config.knee_db;
        let excess = level_db - t;

        if w > 0.0 {
            let half_w = w / 2.0;
            if excess < -half_w {
                0.0
            } else if excess > half_w {
                (t + excess / r) - level_db
            } else {
                let x = (excess + half_w) / w;
                let interp_ratio = 1.0 + (r - 1.0) * x;
                (t - half_w + (excess + half_w) / interp_ratio) - level_db
            }
        } else if excess > 0.0 {
            (t + excess / r) - level_db
        } else {
            0.0
        }
    }
}

#[inline]
fn time_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    if time_ms <= 0.0 {
        return 0.0;
    }
    let samples = (time_ms / 1000.0) * sample_rate;
    (-1.0_f32 / samples.max(1.0)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_passthrough() {
        let mut comp = Compressor::new(
            44100.0,
            CompressorConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let (mut l, mut r) = (0.9_f32, -0.9_f32);
        comp.process_stereo(&mut l, &mut r);
        assert_eq!((l, r), (0.9, -0.9));
    }

    #[test]
    fn quiet_signal_untouched() {
        let mut comp = Compressor::with_defaults(44100.0);
        let mut out = 0.0;
        for _ in 0..4410 {
            let (mut l, mut r) = (0.05_f32, 0.05_f32);
            comp.process_stereo(&mut l, &mut r);
            out = l;
        }
        assert!((out - 0.05).abs() < 1e-4, "below threshold should pass: {out}");
    }

    #[test]
    fn loud_signal_reduced_on_both_channels() {
        let mut comp = Compressor::new(
            44100.0,
            CompressorConfig {
                threshold_db: -20.0,
                ratio: 10.0,
                knee_db: 0.0,
                attack_ms: 0.1,
                release_ms: 10.0,
                ..Default::default()
            },
        );
        let (mut l, mut r) = (0.0, 0.0);
        for _ in 0..2000 {
            l = 0.9;
            r = 0.2;
            comp.process_stereo(&mut l, &mut r);
        }
        assert!(l < 0.9, "loud channel should be reduced: {l}");
        assert!(r < 0.2, "linked channel should be reduced too: {r}");
        assert!(comp.reduction_db() < -1.0);
    }
}
