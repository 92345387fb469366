// Alarme de fin de piste - table d'onde 900 Hz + harmonique

use std::f32::consts::PI;

/// End-of-track alarm tone for the DJ monitor.
///
/// The table holds one second of a 900 Hz fundamental with a second
/// harmonic, rounded down to a whole number of cycles so the loop point
/// is click-free. While armed the tone is mixed into the monitor bus;
/// when the read index wraps the alarm disarms itself.
pub struct EotAlarm {
    table: Vec<f32>,
    index: usize,
    active: bool,
}

impl EotAlarm {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as usize;
        let cycle = sr / 900;
        let size = cycle * 900;
        let mut table = vec![0.0f32; size];
        for (i, slot) in table.iter_mut().enumerate() {
            let phase = (i % cycle) as f32 / cycle as f32;
            let mut s = 0.83 * (phase * 2.0 * PI).sin();
            s += 0.024 * (phase * 4.0 * PI + PI / 4.0).sin();
            *slot = s;
        }
        Self {
            table,
            index: 0,
            active: false,
        }
    }

    pub fn arm(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Next alarm sample, or `None` when the alarm is idle. Wrapping the
    /// table disarms the alarm and yields nothing for that sample.
    #[inline]
    pub fn next(&mut self) -> Option<f32> {
        if !self.active {
            return None;
        }
        if self.index >= self.table.len() {
            self.index = 0;
            self.active = false;
            return None;
        }
        let s = self.table[self.index];
        self.index += 1;
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size_is_multiple_of_900() {
        for sr in [44100u32, 48000, 96000] {
            let alarm = EotAlarm::new(sr);
            assert_eq!(alarm.size() % 900, 0);
            assert!(alarm.size() <= sr as usize);
            assert_eq!(alarm.size(), (sr as usize / 900) * 900);
        }
    }

    #[test]
    fn test_first_sample_is_harmonic_phase_offset() {
        let alarm = EotAlarm::new(44100);
        let expected = 0.024 * (PI / 4.0).sin();
        assert!((alarm.table[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_disarms_after_one_pass() {
        let mut alarm = EotAlarm::new(44100);
        alarm.arm();
        let mut produced = 0usize;
        for _ in 0..alarm.size() {
            assert!(alarm.next().is_some());
            produced += 1;
        }
        assert_eq!(produced, alarm.size());
        assert!(alarm.next().is_none());
        assert!(!alarm.is_active());
        // and it stays quiet until re-armed
        assert!(alarm.next().is_none());
    }

    #[test]
    fn test_tone_amplitude_bounds() {
        let alarm = EotAlarm::new(48000);
        for &s in &alarm.table {
            assert!(s.abs() <= 0.83 + 0.024 + 1e-6);
        }
    }
}
