// Bloc de paramètres partagé - atomiques mot-par-mot
//
// The dispatcher thread stores target values, the audio thread loads
// them with relaxed ordering. No field is wider than a machine word and
// the smoothing stage absorbs any brief inconsistency between fields
// updated by the same control record. Telemetry slots flow the other
// way: written each callback, consumed by the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, Ordering};

use crate::audio::smoothing::MixTargets;

/// Thread-safe f32 stored as its bit pattern in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32 {
    inner: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            inner: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

/// The mixer routing topology between players, mics, VOIP and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerMode {
    NoPhone,
    PhonePublic,
    PhonePrivate,
}

impl MixerMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => MixerMode::PhonePublic,
            2 => MixerMode::PhonePrivate,
            _ => MixerMode::NoPhone,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MixerMode::NoPhone => 0,
            MixerMode::PhonePublic => 1,
            MixerMode::PhonePrivate => 2,
        }
    }
}

/// Callbacks without a `requestlevels` before shutdown is assumed: the
/// controlling application is presumed dead after this many.
pub const LIVENESS_LIMIT: u32 = 8000;

pub struct ControlBlock {
    // fader targets, integer counts straight from the control protocol
    pub volume: AtomicI32,
    pub volume2: AtomicI32,
    pub crossfade: AtomicI32,
    pub jinglesvolume: AtomicI32,
    pub jinglesvolume2: AtomicI32,
    pub interludevol: AtomicI32,
    pub mixbackvol: AtomicI32,
    pub crosspattern: AtomicI32,
    pub use_jingles_vol_2: AtomicBool,

    // button cluster
    pub left_stream: AtomicBool,
    pub left_audio: AtomicBool,
    pub right_stream: AtomicBool,
    pub right_audio: AtomicBool,
    pub stream_monitor: AtomicBool,
    pub mic_on: AtomicBool,
    pub jingles_playing: AtomicBool,
    pub main_play: AtomicBool,
    pub simple_mixer: AtomicBool,
    pub mixermode: AtomicU8,
    pub speed_variance: AtomicBool,
    pub using_dsp: AtomicBool,
    pub twodblimit: AtomicBool,
    pub eot_alarm_armed: AtomicBool,

    pub headroom_db: AtomicF32,
    pub dj_audio_level: AtomicF32,

    // pending normalizer parameter swap
    pub normalizer_pending: AtomicBool,
    pub norm_maxlevel: AtomicF32,
    pub norm_ceiling: AtomicF32,
    pub norm_rise_s: AtomicF32,
    pub norm_fall_s: AtomicF32,
    pub norm_active: AtomicBool,

    // liveness and shutdown plumbing
    pub timeout: AtomicU32,
    pub shutdown: AtomicBool,
    pub jack_closed: AtomicBool,

    // telemetry, audio thread -> dispatcher
    pub str_peak_l: AtomicF32,
    pub str_peak_r: AtomicF32,
    pub str_meansqrd_l: AtomicF32,
    pub str_meansqrd_r: AtomicF32,
    pub left_peak: AtomicF32,
    pub right_peak: AtomicF32,
    pub left_runout: AtomicBool,
    pub right_runout: AtomicBool,
    pub jingles_audio: AtomicBool,
    pub reset_vu: AtomicBool,
}

impl ControlBlock {
    pub fn new() -> Self {
        Self {
            volume: AtomicI32::new(0),
            volume2: AtomicI32::new(0),
            crossfade: AtomicI32::new(0),
            jinglesvolume: AtomicI32::new(0),
            jinglesvolume2: AtomicI32::new(0),
            interludevol: AtomicI32::new(0),
            mixbackvol: AtomicI32::new(0),
            crosspattern: AtomicI32::new(0),
            use_jingles_vol_2: AtomicBool::new(false),
            left_stream: AtomicBool::new(true),
            left_audio: AtomicBool::new(true),
            right_stream: AtomicBool::new(true),
            right_audio: AtomicBool::new(true),
            stream_monitor: AtomicBool::new(false),
            mic_on: AtomicBool::new(false),
            jingles_playing: AtomicBool::new(false),
            main_play: AtomicBool::new(false),
            simple_mixer: AtomicBool::new(false),
            mixermode: AtomicU8::new(MixerMode::NoPhone.as_u8()),
            speed_variance: AtomicBool::new(false),
            using_dsp: AtomicBool::new(false),
            twodblimit: AtomicBool::new(false),
            eot_alarm_armed: AtomicBool::new(false),
            headroom_db: AtomicF32::new(0.0),
            dj_audio_level: AtomicF32::new(0.0),
            normalizer_pending: AtomicBool::new(false),
            norm_maxlevel: AtomicF32::new(-12.0),
            norm_ceiling: AtomicF32::new(12.0),
            norm_rise_s: AtomicF32::new(2.72),
            norm_fall_s: AtomicF32::new(2.04),
            norm_active: AtomicBool::new(false),
            timeout: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            jack_closed: AtomicBool::new(false),
            str_peak_l: AtomicF32::new(0.0),
            str_peak_r: AtomicF32::new(0.0),
            str_meansqrd_l: AtomicF32::new(0.0),
            str_meansqrd_r: AtomicF32::new(0.0),
            left_peak: AtomicF32::new(-1.0),
            right_peak: AtomicF32::new(-1.0),
            left_runout: AtomicBool::new(false),
            right_runout: AtomicBool::new(false),
            jingles_audio: AtomicBool::new(false),
            reset_vu: AtomicBool::new(false),
        }
    }

    pub fn mixer_mode(&self) -> MixerMode {
        MixerMode::from_u8(self.mixermode.load(Ordering::Relaxed))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn should_exit(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed) || self.jack_closed.load(Ordering::Relaxed)
    }

    /// Snapshot the smoothing targets for one tick of the control surface.
    pub fn load_targets(&self) -> MixTargets {
        MixTargets {
            volume: self.volume.load(Ordering::Relaxed),
            volume2: self.volume2.load(Ordering::Relaxed),
            crossfade: self.crossfade.load(Ordering::Relaxed),
            crosspattern: self.crosspattern.load(Ordering::Relaxed),
            jinglesvolume: self.jinglesvolume.load(Ordering::Relaxed),
            jinglesvolume2: self.jinglesvolume2.load(Ordering::Relaxed),
            use_jingles_vol_2: self.use_jingles_vol_2.load(Ordering::Relaxed),
            interludevol: self.interludevol.load(Ordering::Relaxed),
            mixbackvol: self.mixbackvol.load(Ordering::Relaxed),
            left_stream: self.left_stream.load(Ordering::Relaxed),
            left_audio: self.left_audio.load(Ordering::Relaxed),
            right_stream: self.right_stream.load(Ordering::Relaxed),
            right_audio: self.right_audio.load(Ordering::Relaxed),
            headroom_db: self.headroom_db.get(),
            dj_audio_level: self.dj_audio_level.get(),
            jingles_playing: self.jingles_playing.load(Ordering::Relaxed),
            main_play: self.main_play.load(Ordering::Relaxed),
        }
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32_round_trip() {
        let a = AtomicF32::new(1.5);
        assert_eq!(a.get(), 1.5);
        a.set(-0.25);
        assert_eq!(a.get(), -0.25);
    }

    #[test]
    fn test_mixer_mode_round_trip() {
        for mode in [MixerMode::NoPhone, MixerMode::PhonePublic, MixerMode::PhonePrivate] {
            assert_eq!(MixerMode::from_u8(mode.as_u8()), mode);
        }
        assert_eq!(MixerMode::from_u8(99), MixerMode::NoPhone);
    }

    #[test]
    fn test_targets_snapshot_reflects_stores() {
        let c = ControlBlock::new();
        c.volume.store(64, Ordering::Relaxed);
        c.headroom_db.set(3.0);
        let t = c.load_targets();
        assert_eq!(t.volume, 64);
        assert_eq!(t.headroom_db, 3.0);
    }
}
