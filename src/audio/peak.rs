// Suivi de crête avec décroissance - alimentation des vu-mètres

/// Decaying peak tracker, one per metered output channel.
///
/// Rises instantly to the rectified input and falls back at a fixed
/// fractional rate per sample, scaled so the decay speed is the same at
/// any sample rate.
pub struct PeakFilter {
    peak: f32,
    decay: f32,
}

impl PeakFilter {
    /// `tc` is the per-sample fractional decay at the 44.1 kHz reference
    /// rate (the stream meters use 115e-6).
    pub fn new(tc: f32, sample_rate: u32) -> Self {
        Self {
            peak: 0.0,
            decay: 1.0 - tc * 44100.0 / sample_rate as f32,
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32) {
        let level = sample.abs();
        self.peak *= self.decay;
        if level > self.peak {
            self.peak = level;
        }
    }

    /// Current tracked peak. The value keeps decaying through `process`,
    /// so consecutive reads without signal will sink toward zero.
    pub fn read(&self) -> f32 {
        self.peak
    }
}
