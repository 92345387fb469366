// Canaux microphone - contributions au mix et facteur de ducking
//
// Heavy per-mic DSP (AGC, gate, compression) lives outside this
// process; what the mixer needs from each channel is its set of
// per-sample mix contributions, an open/close envelope and a ducking
// amount derived from the signal level. Parameters arrive over the
// control protocol and are applied through word-sized atomics so the
// audio thread never takes a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use log::debug;

use crate::audio::db::db2level;
use crate::audio::smoothing::mute_step;
use crate::control::state::AtomicF32;

/// Where a channel's signal is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicRole {
    /// Not routed anywhere.
    Off,
    /// Normal microphone: main mix, ducking, DJ monitor.
    Main,
    /// Auxiliary source: aux bus only, no ducking contribution.
    Aux,
}

impl MicRole {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MicRole::Main,
            2 => MicRole::Aux,
            _ => MicRole::Off,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            MicRole::Off => 0,
            MicRole::Main => 1,
            MicRole::Aux => 2,
        }
    }
}

/// Dispatcher-side parameter mirror for one channel.
pub struct MicShared {
    pub open: AtomicBool,
    pub gain_db: AtomicF32,
    pub pan: AtomicI32,
    pub duck_depth: AtomicF32,
    pub role: AtomicU8,
}

impl MicShared {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            gain_db: AtomicF32::new(0.0),
            pan: AtomicI32::new(50),
            duck_depth: AtomicF32::new(0.0),
            role: AtomicU8::new(MicRole::Off.as_u8()),
        }
    }

    /// Apply one `mic_control` parameter string: comma-separated
    /// `name=value` pairs.
    pub fn apply_params(&self, params: &str) {
        for pair in params.split(',') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            match name.trim() {
                "open" => self.open.store(value.trim() == "1", Ordering::Relaxed),
                "gain" => {
                    if let Ok(db) = value.trim().parse::<f32>() {
                        self.gain_db.set(db);
                    }
                }
                "pan" => {
                    if let Ok(p) = value.trim().parse::<i32>() {
                        self.pan.store(p.clamp(0, 100), Ordering::Relaxed);
                    }
                }
                "duck" => {
                    if let Ok(d) = value.trim().parse::<f32>() {
                        self.duck_depth.set(d.max(0.0));
                    }
                }
                other => debug!("ignoring unknown mic parameter {}", other),
            }
        }
    }
}

/// Per-sample mix contributions of one channel, refreshed by
/// `process_sample` and summed by the mix kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicFeed {
    /// Raw panned signal (pre open/close envelope).
    pub mlc: f32,
    pub mrc: f32,
    /// Panned signal after the envelope, for the main mix.
    pub mlcm: f32,
    pub mrcm: f32,
    /// Aux-bus contribution.
    pub alcm: f32,
    pub arcm: f32,
    /// Unpanned mono for the monitor paths; `munpmdj` mutes with the
    /// envelope, `munpm` does not drop to zero with a closed channel.
    pub munpm: f32,
    pub munpmdj: f32,
}

/// One microphone channel on the audio side. `buf` is filled from the
/// channel's input port (or directly by tests) before the sample loop.
pub struct MicChannel {
    pub shared: Arc<MicShared>,
    buf: Vec<f32>,
    env: f32,
    duck_env: f32,
    duck_decay: f32,
    pub feed: MicFeed,
    sample_rate: f32,
}

impl MicChannel {
    pub fn new(shared: Arc<MicShared>, sample_rate: u32) -> Self {
        Self {
            shared,
            buf: Vec::new(),
            env: 0.0,
            duck_env: 0.0,
            // roughly 300 ms ducking release
            duck_decay: 1.0 - 3.3 / sample_rate as f32,
            feed: MicFeed::default(),
            sample_rate: sample_rate as f32,
        }
    }

    /// Grow-only input staging, copied from the port buffer each block.
    pub fn copy_input(&mut self, src: &[f32]) {
        if self.buf.len() < src.len() {
            self.buf.resize(src.len(), 0.0);
        }
        self.buf[..src.len()].copy_from_slice(src);
    }

    /// Fill the staging buffer directly (tests and offline use).
    pub fn fill_input(&mut self, value: f32, nframes: usize) {
        if self.buf.len() < nframes {
            self.buf.resize(nframes, 0.0);
        }
        self.buf[..nframes].fill(value);
    }

    pub fn ensure_capacity(&mut self, nframes: usize) {
        if self.buf.len() < nframes {
            self.buf.resize(nframes, 0.0);
        }
    }

    /// Advance one sample: refresh the contribution set and return this
    /// channel's ducking factor (1.0 when it asks for no ducking).
    #[inline]
    pub fn process_sample(&mut self, i: usize) -> f32 {
        let role = MicRole::from_u8(self.shared.role.load(Ordering::Relaxed));
        if role == MicRole::Off {
            self.feed = MicFeed::default();
            return 1.0;
        }
        let open = self.shared.open.load(Ordering::Relaxed);
        mute_step(&mut self.env, open, self.sample_rate);

        let raw = self.buf.get(i).copied().unwrap_or(0.0)
            * db2level(self.shared.gain_db.get());
        let pan = self.shared.pan.load(Ordering::Relaxed) as f32;
        let lc = ((100.0 - pan) / 50.0).min(1.0);
        let rc = (pan / 50.0).min(1.0);
        let gated = raw * self.env;

        self.feed = match role {
            MicRole::Main => MicFeed {
                mlc: raw * lc,
                mrc: raw * rc,
                mlcm: gated * lc,
                mrcm: gated * rc,
                alcm: 0.0,
                arcm: 0.0,
                munpm: raw,
                munpmdj: gated,
            },
            MicRole::Aux => MicFeed {
                alcm: gated * lc,
                arcm: gated * rc,
                ..MicFeed::default()
            },
            MicRole::Off => MicFeed::default(),
        };

        // ducking follows the envelope of the open channel
        if role == MicRole::Main && open {
            let level = gated.abs();
            self.duck_env *= self.duck_decay;
            if level > self.duck_env {
                self.duck_env = level;
            }
            let depth = self.shared.duck_depth.get();
            if depth > 0.0 {
                return (1.0 - depth * self.duck_env.min(1.0)).max(0.0);
            }
        } else {
            self.duck_env *= self.duck_decay;
        }
        1.0
    }
}

/// Create `count` channels plus their dispatcher-side handles.
pub fn create_mics(count: usize, sample_rate: u32) -> (Vec<Arc<MicShared>>, Vec<MicChannel>) {
    let shareds: Vec<Arc<MicShared>> = (0..count).map(|_| Arc::new(MicShared::new())).collect();
    let channels = shareds
        .iter()
        .map(|s| MicChannel::new(Arc::clone(s), sample_rate))
        .collect();
    (shareds, channels)
}

/// Apply a channel-mode string: one digit per channel (0 off, 1 main,
/// 2 aux), extra digits ignored.
pub fn set_roles(shareds: &[Arc<MicShared>], modes: &str) {
    for (shared, ch) in shareds.iter().zip(modes.trim().chars()) {
        let role = match ch {
            '1' => MicRole::Main,
            '2' => MicRole::Aux,
            _ => MicRole::Off,
        };
        shared.role.store(role.as_u8(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_mic() -> (Arc<MicShared>, MicChannel) {
        let shared = Arc::new(MicShared::new());
        shared.role.store(MicRole::Main.as_u8(), Ordering::Relaxed);
        shared.open.store(true, Ordering::Relaxed);
        let mic = MicChannel::new(Arc::clone(&shared), 44100);
        (shared, mic)
    }

    #[test]
    fn test_off_channel_contributes_nothing() {
        let shared = Arc::new(MicShared::new());
        let mut mic = MicChannel::new(Arc::clone(&shared), 44100);
        mic.fill_input(0.8, 16);
        for i in 0..16 {
            assert_eq!(mic.process_sample(i), 1.0);
            assert_eq!(mic.feed.mlcm, 0.0);
            assert_eq!(mic.feed.munpm, 0.0);
        }
    }

    #[test]
    fn test_open_channel_reaches_unity_envelope() {
        let (_shared, mut mic) = main_mic();
        mic.fill_input(0.5, 4096);
        for i in 0..4096 {
            mic.process_sample(i.min(4095));
        }
        assert!((mic.feed.mlcm - 0.5).abs() < 1e-3);
        assert!((mic.feed.munpmdj - 0.5).abs() < 1e-3);
        // centre pan feeds both sides equally
        assert_eq!(mic.feed.mlcm, mic.feed.mrcm);
    }

    #[test]
    fn test_raw_feed_ignores_envelope() {
        let (shared, mut mic) = main_mic();
        shared.open.store(false, Ordering::Relaxed);
        mic.fill_input(0.4, 8);
        mic.process_sample(0);
        // closed channel: processed feed silent, raw feed live
        assert_eq!(mic.feed.mlcm, 0.0);
        assert!((mic.feed.mlc - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_ducking_factor_tracks_level() {
        let (shared, mut mic) = main_mic();
        shared.duck_depth.set(0.5);
        mic.fill_input(1.0, 4096);
        let mut df = 1.0;
        for i in 0..4096 {
            df = mic.process_sample(i);
        }
        assert!(df < 0.6, "df {}", df);
        assert!(df >= 0.0);
    }

    #[test]
    fn test_param_string_parsing() {
        let shared = MicShared::new();
        shared.apply_params("open=1,gain=-6.0,pan=100,duck=0.4");
        assert!(shared.open.load(Ordering::Relaxed));
        assert_eq!(shared.pan.load(Ordering::Relaxed), 100);
        assert!((shared.gain_db.get() + 6.0).abs() < 1e-6);
        assert!((shared.duck_depth.get() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_role_string() {
        let (shareds, _mics) = create_mics(3, 44100);
        set_roles(&shareds, "120");
        assert_eq!(shareds[0].role.load(Ordering::Relaxed), MicRole::Main.as_u8());
        assert_eq!(shareds[1].role.load(Ordering::Relaxed), MicRole::Aux.as_u8());
        assert_eq!(shareds[2].role.load(Ordering::Relaxed), MicRole::Off.as_u8());
    }
}
