// Surface de contrôle lissée - interpolation UI -> cadence audio
//
// The GUI moves faders at event rate; the mixer applies gains at sample
// rate. Every smoothing tick (one per 100 samples) each integer control
// steps one count toward its target and the derived gain factors are
// recomputed, which keeps fader jumps well under the zipper threshold.

use crate::audio::db::db2level;

/// Crossfader pattern 0 pull-up bias, modelled on a linear pot with a
/// bias resistor.
const CROSS_BIAS: f32 = 0.35386;
/// Crossfader pattern 2 per-count decay factor.
const CROSS_EXP: f32 = 0.950_495_36;

/// Target values for one smoothing tick, read from the parameter block.
#[derive(Debug, Clone, Default)]
pub struct MixTargets {
    pub volume: i32,
    pub volume2: i32,
    pub crossfade: i32,
    pub crosspattern: i32,
    pub jinglesvolume: i32,
    pub jinglesvolume2: i32,
    pub use_jingles_vol_2: bool,
    pub interludevol: i32,
    pub mixbackvol: i32,
    pub left_stream: bool,
    pub left_audio: bool,
    pub right_stream: bool,
    pub right_audio: bool,
    pub headroom_db: f32,
    pub dj_audio_level: f32,
    pub jingles_playing: bool,
    pub main_play: bool,
}

/// The gain factors composed at the end of each tick, consumed by the
/// mix kernel. Left and right channel share a value per player and bus.
#[derive(Debug, Clone, Copy)]
pub struct Gains {
    pub lp_aud: f32,
    pub rp_aud: f32,
    pub lp_str: f32,
    pub rp_str: f32,
    pub jp: f32,
    pub ip_str: f32,
    pub ip_aud: f32,
    pub mixback: f32,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            lp_aud: 1.0,
            rp_aud: 1.0,
            lp_str: 1.0,
            rp_str: 0.0,
            jp: 1.0,
            ip_str: 1.0,
            ip_aud: 0.0,
            mixback: 1.0,
        }
    }
}

/// Soft on/off for a mute button: fast-ish attack, slower shaped release,
/// snapping at the rails so the envelope settles exactly.
#[inline]
pub fn mute_step(gain: &mut f32, switched_on: bool, sample_rate: f32) {
    if switched_on {
        if *gain < 0.99 {
            *gain += (1.0 - *gain) * 0.09 * 44100.0 / sample_rate;
            if *gain >= 0.99 {
                *gain = 1.0;
            }
        }
    } else if *gain > 0.0 {
        *gain -= *gain * 0.075 * (2.0 - *gain) * (2.0 - *gain) * 44100.0 / sample_rate;
        if *gain < 0.00002 {
            *gain = 0.0;
        }
    }
}

pub struct ControlSurface {
    sample_rate: f32,

    current_volume: i32,
    current_volume2: i32,
    current_jingles_volume: i32,
    current_jingles_volume2: i32,
    current_interlude_volume: i32,
    current_mixback_volume: i32,
    current_crossfade: i32,
    current_crosspattern: i32,

    vol_rescale: f32,
    vol2_rescale: f32,
    jingles_rescale: f32,
    jingles_rescale2: f32,
    interlude_rescale: f32,
    mixback_rescale: f32,
    cross_left: f32,
    cross_right: f32,

    lp_listen_mute: f32,
    rp_listen_mute: f32,
    lp_stream_mute: f32,
    rp_stream_mute: f32,

    interlude_autovol: f32,
    current_headroom: f32,
    current_dj_level: f32,
    dj_audio_gain: f32,
    dfmod: f32,

    gains: Gains,
}

impl ControlSurface {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            current_volume: 0,
            current_volume2: 0,
            current_jingles_volume: 0,
            current_jingles_volume2: 0,
            current_interlude_volume: 0,
            current_mixback_volume: 0,
            current_crossfade: 0,
            current_crosspattern: 0,
            vol_rescale: 1.0,
            vol2_rescale: 1.0,
            jingles_rescale: 1.0,
            jingles_rescale2: 1.0,
            interlude_rescale: 1.0,
            mixback_rescale: 1.0,
            cross_left: 1.0,
            cross_right: 0.0,
            lp_listen_mute: 1.0,
            rp_listen_mute: 1.0,
            lp_stream_mute: 1.0,
            rp_stream_mute: 1.0,
            interlude_autovol: -128.0,
            current_headroom: 0.0,
            current_dj_level: 0.0,
            dj_audio_gain: 1.0,
            dfmod: 1.0,
            gains: Gains::default(),
        }
    }

    pub fn gains(&self) -> &Gains {
        &self.gains
    }

    pub fn dj_audio_gain(&self) -> f32 {
        self.dj_audio_gain
    }

    pub fn current_headroom(&self) -> f32 {
        self.current_headroom
    }

    /// Headroom as a linear gain, the upper bound for the ducking factor.
    pub fn headroom_gain(&self) -> f32 {
        db2level(self.current_headroom)
    }

    pub fn dfmod(&self) -> f32 {
        self.dfmod
    }

    pub fn current_crossfade(&self) -> i32 {
        self.current_crossfade
    }

    pub fn cross_gains(&self) -> (f32, f32) {
        (self.cross_left, self.cross_right)
    }

    /// Recompute the DJ monitor gain without a full tick. Used by the
    /// passthrough mixer which bypasses the smoothing machinery.
    pub fn refresh_dj_gain(&mut self, t: &MixTargets) {
        if t.dj_audio_level != self.current_dj_level {
            self.current_dj_level = t.dj_audio_level;
            self.dj_audio_gain = db2level(t.dj_audio_level);
        }
    }

    /// One smoothing tick: advance every control one step toward its
    /// target and refresh the composed gain factors.
    pub fn tick(&mut self, t: &MixTargets) {
        self.refresh_dj_gain(t);

        if t.crossfade != self.current_crossfade || t.crosspattern != self.current_crosspattern {
            self.current_crosspattern = t.crosspattern;
            if t.crossfade > self.current_crossfade {
                self.current_crossfade += 1;
            } else if t.crossfade < self.current_crossfade {
                self.current_crossfade -= 1;
            }
            self.update_crossfader();
        }

        if t.volume != self.current_volume {
            self.current_volume += if t.volume > self.current_volume { 1 } else { -1 };
            self.vol_rescale = 1.0 / 10.0f32.powf(self.current_volume as f32 / 55.0);
        }
        if t.volume2 != self.current_volume2 {
            self.current_volume2 += if t.volume2 > self.current_volume2 { 1 } else { -1 };
            self.vol2_rescale = 1.0 / 10.0f32.powf(self.current_volume2 as f32 / 55.0);
        }
        if t.jinglesvolume != self.current_jingles_volume {
            self.current_jingles_volume +=
                if t.jinglesvolume > self.current_jingles_volume { 1 } else { -1 };
            self.jingles_rescale = 1.0 / 10.0f32.powf(self.current_jingles_volume as f32 / 55.0);
        }
        if t.jinglesvolume2 != self.current_jingles_volume2 {
            self.current_jingles_volume2 +=
                if t.jinglesvolume2 > self.current_jingles_volume2 { 1 } else { -1 };
            self.jingles_rescale2 = 1.0 / 10.0f32.powf(self.current_jingles_volume2 as f32 / 55.0);
        }

        self.update_interlude(t);

        if t.mixbackvol != self.current_mixback_volume {
            self.current_mixback_volume +=
                if t.mixbackvol > self.current_mixback_volume { 1 } else { -1 };
            self.mixback_rescale =
                10.0f32.powf(-(self.current_mixback_volume as f32 * 0.018181818));
        }

        mute_step(&mut self.lp_listen_mute, t.left_audio, self.sample_rate);
        mute_step(&mut self.lp_stream_mute, t.left_stream, self.sample_rate);
        mute_step(&mut self.rp_listen_mute, t.right_audio, self.sample_rate);
        mute_step(&mut self.rp_stream_mute, t.right_stream, self.sample_rate);

        self.gains = Gains {
            lp_aud: self.vol_rescale * self.lp_listen_mute,
            rp_aud: self.vol2_rescale * self.rp_listen_mute,
            lp_str: self.vol_rescale * self.cross_left * self.lp_stream_mute,
            rp_str: self.vol2_rescale * self.cross_right * self.rp_stream_mute,
            jp: if t.use_jingles_vol_2 {
                self.jingles_rescale2
            } else {
                self.jingles_rescale
            },
            ip_str: self.interlude_rescale,
            ip_aud: 0.0,
            mixback: self.mixback_rescale,
        };

        // headroom creeps toward its target at a speed shaped by the
        // depth, then snaps once the residual is inaudible
        let mic_target = -t.headroom_db;
        let diff = mic_target - self.current_headroom;
        if diff != 0.0 {
            self.current_headroom +=
                diff * 1600.0 / (self.sample_rate * (t.headroom_db + 10.0).powf(0.93));
            if diff.abs() < 0.000001 {
                self.current_headroom = mic_target;
            }
        }

        // ducking modifier follows whichever programme source is loudest
        let vol = if t.jingles_playing {
            self.current_jingles_volume as f32 * 0.06666666
        } else {
            (self.current_volume as f32
                - (self.current_volume - self.current_volume2) as f32 / 2.0)
                * 0.06666666
        };
        self.dfmod = vol * vol + 1.0;
    }

    fn update_crossfader(&mut self) {
        match self.current_crosspattern {
            0 => {
                // linear pot with a pull-up resistor
                let xprop = self.current_crossfade as f32 * 0.01;
                let yprop = 1.0 - xprop;
                self.cross_left =
                    yprop / ((xprop * CROSS_BIAS) / (xprop + CROSS_BIAS) + yprop);
                self.cross_right =
                    xprop / ((yprop * CROSS_BIAS) / (yprop + CROSS_BIAS) + xprop);
                // second stage: steepen the dominant side
                if xprop >= 0.5 {
                    self.cross_left /= 1.0 + (xprop - 0.5) * 8.0;
                } else {
                    self.cross_right /= 1.0 + (yprop - 0.5) * 8.0;
                }
            }
            1 => {
                // hard centre plateau with dB skirts
                if self.current_crossfade > 55 {
                    if self.current_crossfade < 100 {
                        let delta = (-self.current_crossfade + 55) as f32;
                        self.cross_left = db2level(0.8 * delta);
                    } else {
                        self.cross_left = 0.0;
                    }
                    self.cross_right = 1.0;
                } else if self.current_crossfade < 45 {
                    if self.current_crossfade > 0 {
                        let delta = (self.current_crossfade - 45) as f32;
                        self.cross_right = db2level(0.8 * delta);
                    } else {
                        self.cross_right = 0.0;
                    }
                    self.cross_left = 1.0;
                } else {
                    self.cross_left = 1.0;
                    self.cross_right = 1.0;
                }
            }
            _ => {
                // exponential with exact end stops
                self.cross_left = if self.current_crossfade == 100 {
                    0.0
                } else {
                    CROSS_EXP.powi(self.current_crossfade)
                };
                self.cross_right = if self.current_crossfade == 0 {
                    0.0
                } else {
                    CROSS_EXP.powi(100 - self.current_crossfade)
                };
            }
        }
    }

    fn update_interlude(&mut self, t: &MixTargets) {
        // the auto volume sinks while a main player runs and climbs back
        // when none do; both climb rules apply below -10 dB
        let old_autovol = self.interlude_autovol;
        if t.main_play {
            if self.interlude_autovol > -128.0 {
                self.interlude_autovol -= 0.05;
            }
        } else {
            if self.interlude_autovol < -20.0 {
                self.interlude_autovol = -20.0;
            }
            if self.interlude_autovol < -10.0 {
                self.interlude_autovol += 0.5;
            }
            if self.interlude_autovol < 0.0 {
                self.interlude_autovol += 0.3;
            }
        }
        let mut changed = self.interlude_autovol != old_autovol;
        if t.interludevol != self.current_interlude_volume {
            self.current_interlude_volume +=
                if t.interludevol > self.current_interlude_volume { 1 } else { -1 };
            changed = true;
        }
        if changed {
            self.interlude_rescale = 10.0f32
                .powf(-(self.current_interlude_volume as f32) / 55.0)
                * db2level(self.interlude_autovol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> MixTargets {
        MixTargets {
            left_stream: true,
            left_audio: true,
            right_stream: true,
            right_audio: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_volume_smoothing_is_monotone() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.volume = 40;
        let mut prev = 0;
        for i in 0..60 {
            s.tick(&t);
            assert!(s.current_volume >= prev, "went backwards at tick {}", i);
            assert!(s.current_volume <= 40);
            prev = s.current_volume;
        }
        assert_eq!(s.current_volume, 40);
        // and it stays there
        s.tick(&t);
        assert_eq!(s.current_volume, 40);
    }

    #[test]
    fn test_volume_reaches_target_in_exact_ticks() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.volume = 25;
        for _ in 0..25 {
            s.tick(&t);
        }
        assert_eq!(s.current_volume, 25);
        t.volume = 10;
        for _ in 0..15 {
            s.tick(&t);
        }
        assert_eq!(s.current_volume, 10);
    }

    #[test]
    fn test_mute_envelope_stays_in_bounds_and_snaps() {
        let sr = 48000.0;
        let mut g = 0.0f32;
        let mut ticks = 0;
        while g < 1.0 {
            mute_step(&mut g, true, sr);
            assert!((0.0..=1.0).contains(&g));
            ticks += 1;
            assert!(ticks < 5000, "attack never settled");
        }
        assert_eq!(g, 1.0);
        ticks = 0;
        while g > 0.0 {
            mute_step(&mut g, false, sr);
            assert!((0.0..=1.0).contains(&g));
            ticks += 1;
            assert!(ticks < 20000, "release never settled");
        }
        assert_eq!(g, 0.0);
    }

    #[test]
    fn test_mute_settle_time_sample_rate_independent() {
        let count = |sr: f32| {
            let mut g = 0.0f32;
            let mut n = 0;
            while g < 1.0 {
                mute_step(&mut g, true, sr);
                n += 1;
            }
            n as f32 / sr // ticks are per-sample-rate here, compare in seconds
        };
        let a = count(44100.0);
        let b = count(96000.0);
        assert!((a - b).abs() / a < 0.1, "settle {} vs {}", a, b);
    }

    #[test]
    fn test_crossfader_pattern1_plateau() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.crosspattern = 1;
        for value in 45..=55 {
            t.crossfade = value;
            for _ in 0..120 {
                s.tick(&t);
            }
            assert_eq!(s.current_crossfade(), value);
            let (l, r) = s.cross_gains();
            assert_eq!(l, 1.0);
            assert_eq!(r, 1.0);
        }
    }

    #[test]
    fn test_crossfader_pattern2_endpoints() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.crosspattern = 2;
        t.crossfade = 0;
        // nudge away and back so the curve is recomputed at 0
        s.current_crossfade = 1;
        for _ in 0..5 {
            s.tick(&t);
        }
        let (l, r) = s.cross_gains();
        assert_eq!(l, 1.0);
        assert_eq!(r, 0.0);
        t.crossfade = 100;
        for _ in 0..120 {
            s.tick(&t);
        }
        let (l, r) = s.cross_gains();
        assert_eq!(l, 0.0);
        assert_eq!(r, 1.0);
    }

    #[test]
    fn test_crossfader_pattern0_symmetric_at_centre() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.crosspattern = 0;
        t.crossfade = 50;
        for _ in 0..60 {
            s.tick(&t);
        }
        let (l, r) = s.cross_gains();
        assert!((l - r).abs() < 1e-6, "L {} vs R {}", l, r);
    }

    #[test]
    fn test_headroom_approaches_and_snaps() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.headroom_db = 6.0;
        for _ in 0..200000 {
            s.tick(&t);
        }
        assert!((s.current_headroom() + 6.0).abs() < 0.01);
        assert!(s.headroom_gain() < 0.6);
    }

    #[test]
    fn test_interlude_autovol_climbs_and_sinks() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.main_play = false;
        s.tick(&t);
        // clamped up from the floor, then climbing 0.8 per tick below -10
        assert!(s.interlude_autovol > -20.0);
        let before = s.interlude_autovol;
        s.tick(&t);
        assert!((s.interlude_autovol - before - 0.8).abs() < 1e-4);
        for _ in 0..100 {
            s.tick(&t);
        }
        assert!(s.interlude_autovol >= 0.0);
        t.main_play = true;
        let before = s.interlude_autovol;
        s.tick(&t);
        assert!(s.interlude_autovol < before);
    }

    #[test]
    fn test_composed_gains_follow_mutes() {
        let mut s = ControlSurface::new(44100);
        let mut t = targets();
        t.left_stream = false;
        for _ in 0..10000 {
            s.tick(&t);
        }
        assert_eq!(s.gains().lp_str, 0.0);
        assert!(s.gains().lp_aud > 0.99);
    }
}
