// Limiteur brickwall - anti-dépassement sur les bus de sortie

use crate::audio::db::{db2level, level2db};

/// Output ceiling in dB. Slightly below full scale so the following
/// stages never see a sample at exactly 1.0.
const CEILING_DB: f32 = -0.05;

/// Gain recovery in dB per sample. A 1 dB reduction releases over 4000
/// samples, about 90 ms at 44.1 kHz.
const RELEASE_DB_PER_SAMPLE: f32 = 1.0 / 4000.0;

/// Feed-forward hard-knee brickwall limiter.
///
/// Tracks the louder of the two channels against the ceiling. Attack is a
/// single sample; release is linear in the dB domain. Each mix bus that
/// needs limiting owns an independent instance.
pub struct Limiter {
    ceiling: f32,
    gain_db: f32,
    release: f32,
}

impl Limiter {
    pub fn new() -> Self {
        Self {
            ceiling: CEILING_DB,
            gain_db: 0.0,
            release: RELEASE_DB_PER_SAMPLE,
        }
    }

    /// Compute the gain to apply to this sample pair. Returns a linear
    /// factor in (0, 1].
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> f32 {
        let peak = left.abs().max(right.abs());
        let level = level2db(peak);
        let needed = if level > self.ceiling {
            self.ceiling - level
        } else {
            0.0
        };
        if needed <= self.gain_db {
            // over the ceiling: clamp within this very sample
            self.gain_db = needed;
        } else {
            // recover slowly, never past what the signal allows
            self.gain_db = (self.gain_db + self.release).min(needed);
        }
        db2level(self.gain_db)
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_gain_below_ceiling() {
        let mut lim = Limiter::new();
        for i in 0..1000 {
            let s = 0.5 * (i as f32 * 0.13).sin();
            let g = lim.process(s, s);
            assert!((g - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_convergence_to_ceiling() {
        // a tone 6 dB over the ceiling must settle within 0.1 dB of it
        let mut lim = Limiter::new();
        let amp = 2.0f32;
        let mut out_peak = 0.0f32;
        for i in 0..8000 {
            let s = amp * (i as f32 * 0.05).sin();
            let g = lim.process(s, s);
            if i >= 4000 {
                out_peak = out_peak.max((s * g).abs());
            }
        }
        let out_db = level2db(out_peak);
        assert!(
            (out_db - CEILING_DB).abs() < 0.1,
            "limited peak was {} dB",
            out_db
        );
    }

    #[test]
    fn test_no_overshoot_on_release() {
        let mut lim = Limiter::new();
        // drive hard, then feed a quiet signal and watch the output
        for i in 0..2000 {
            let s = 4.0 * (i as f32 * 0.05).sin();
            lim.process(s, s);
        }
        for i in 0..20000 {
            let s = 0.5 * (i as f32 * 0.05).sin();
            let g = lim.process(s, s);
            assert!(g <= 1.0 + 1e-6);
            assert!((s * g).abs() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_attack_is_one_sample() {
        let mut lim = Limiter::new();
        let g = lim.process(2.0, 0.0);
        assert!((2.0 * g).abs() <= db2level(CEILING_DB) + 1e-4);
    }
}
