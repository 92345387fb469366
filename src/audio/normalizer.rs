// Normaliseur du flux - AGC lent vers le niveau cible

use crate::audio::db::{db2level, level2db};

/// Parameter set delivered by the `normalizerstats` control record.
/// Rise and fall are in seconds; the per-sample increments are derived
/// against the running sample rate when the set is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerStats {
    pub maxlevel: f32,
    pub ceiling: f32,
    pub rise_s: f32,
    pub fall_s: f32,
    pub active: bool,
}

/// Slow AGC on the stream bus. Steers the long-term programme level
/// toward `maxlevel` by applying a boost that never exceeds `ceiling`.
pub struct Normalizer {
    active: bool,
    level: f32, // current boost in dB
    maxlevel: f32,
    rise: f32, // dB per sample
    fall: f32,
    ceiling: f32,
    sample_rate: f32,
}

impl Normalizer {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            active: false,
            level: 0.0,
            maxlevel: -12.0,
            rise: 1.0 / (2.72 * sr),
            fall: 1.0 / (2.04 * sr),
            ceiling: 12.0,
            sample_rate: sr,
        }
    }

    /// Swap in a new parameter set, preserving the running level so the
    /// gain curve stays continuous across the update.
    pub fn apply_stats(&mut self, stats: &NormalizerStats) {
        self.maxlevel = stats.maxlevel;
        self.ceiling = stats.ceiling;
        self.rise = 1.0 / (stats.rise_s * self.sample_rate);
        self.fall = 1.0 / (stats.fall_s * self.sample_rate);
        self.active = stats.active;
    }

    /// Compute the boost for this sample pair, as a linear factor.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> f32 {
        if !self.active {
            return 1.0;
        }
        let peak = left.abs().max(right.abs());
        if peak > 0.0 {
            let boosted = level2db(peak) + self.level;
            if boosted < self.maxlevel {
                if self.level < self.ceiling {
                    self.level += self.rise;
                }
            } else if self.level > 0.0 {
                self.level -= self.fall;
            }
        }
        db2level(self.level)
    }
}
