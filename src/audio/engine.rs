// Noyau de mixage - la boucle chaude
//
// Called for every block the audio server requests. Inside the sample
// loop: no allocation, no locks, no system calls. The only permitted
// allocation is growing the player read buffers when the server hands
// us a bigger block than ever before.
//
// There are four routing topologies and the loop body is written out
// once per topology; a per-sample mode switch would cost more than the
// duplication.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::warn;

use crate::audio::alarm::EotAlarm;
use crate::audio::limiter::Limiter;
use crate::audio::normalizer::{Normalizer, NormalizerStats};
use crate::audio::peak::PeakFilter;
use crate::audio::smoothing::{ControlSurface, Gains};
use crate::control::state::{ControlBlock, LIVENESS_LIMIT, MixerMode};
use crate::mic::{MicChannel, MicFeed};
use crate::player::channel::PlayerAudio;

/// The per-block I/O surface: output and input port buffers for one
/// callback. The JACK layer builds this from port slices; tests build
/// it from plain vectors.
pub struct BusBuffers<'a> {
    pub dj_l: &'a mut [f32],
    pub dj_r: &'a mut [f32],
    pub str_l: &'a mut [f32],
    pub str_r: &'a mut [f32],
    pub voip_out_l: &'a mut [f32],
    pub voip_out_r: &'a mut [f32],
    pub dsp_out_l: &'a mut [f32],
    pub dsp_out_r: &'a mut [f32],
    pub voip_in_l: &'a [f32],
    pub voip_in_r: &'a [f32],
    pub dsp_in_l: &'a [f32],
    pub dsp_in_r: &'a [f32],
}

/// Per-player read buffers: main pair plus fade pair. Grow-only.
struct PlayerBufs {
    l: Vec<f32>,
    r: Vec<f32>,
    fl: Vec<f32>,
    fr: Vec<f32>,
}

impl PlayerBufs {
    fn new() -> Self {
        Self {
            l: Vec::new(),
            r: Vec::new(),
            fl: Vec::new(),
            fr: Vec::new(),
        }
    }

    fn ensure(&mut self, nframes: usize) {
        if self.l.len() < nframes {
            self.l.resize(nframes, 0.0);
            self.r.resize(nframes, 0.0);
            self.fl.resize(nframes, 0.0);
            self.fr.resize(nframes, 0.0);
        }
    }
}

/// Gain snapshot taken when a player swaps buffers: the outgoing tail
/// fades at the level it had at swap time, whatever the faders do next.
#[derive(Debug, Clone, Copy)]
struct FadeGains {
    lp_aud: f32,
    lp_str: f32,
    rp_aud: f32,
    rp_str: f32,
    jp_aud: f32,
    jp_str: f32,
    ip_aud: f32,
    ip_str: f32,
}

impl Default for FadeGains {
    fn default() -> Self {
        Self {
            lp_aud: 1.0,
            lp_str: 1.0,
            rp_aud: 1.0,
            rp_str: 1.0,
            jp_aud: 1.0,
            jp_str: 1.0,
            ip_aud: 0.0,
            ip_str: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MicSums {
    mlc: f32,
    mrc: f32,
    mlcm: f32,
    mrcm: f32,
    alcm: f32,
    arcm: f32,
    munpm: f32,
    munpmdj: f32,
}

impl MicSums {
    #[inline]
    fn add(&mut self, f: &MicFeed) {
        self.mlc += f.mlc;
        self.mrc += f.mrc;
        self.mlcm += f.mlcm;
        self.mrcm += f.mrcm;
        self.alcm += f.alcm;
        self.arcm += f.arcm;
        self.munpm += f.munpm;
        self.munpmdj += f.munpmdj;
    }
}

/// Stream level reduction applied by the 2 dB limit switch.
const TWO_DB_REDUCTION: f32 = 0.7943;

pub struct MixKernel {
    control: Arc<ControlBlock>,
    surface: ControlSurface,
    pub left: PlayerAudio,
    pub right: PlayerAudio,
    pub jingles: PlayerAudio,
    pub interlude: PlayerAudio,
    pub mics: Vec<MicChannel>,

    stream_limiter: Limiter,
    audio_limiter: Limiter,
    phone_limiter: Limiter,
    normalizer: Normalizer,
    str_pf_l: PeakFilter,
    str_pf_r: PeakFilter,
    alarm: EotAlarm,

    df: f32,
    vol_smooth_count: u32,
    fades: FadeGains,
    lp: PlayerBufs,
    rp: PlayerBufs,
    jp: PlayerBufs,
    ip: PlayerBufs,

    str_l_tally: f32,
    str_r_tally: f32,
    rms_count: u32,
    left_peak: f32,
    right_peak: f32,

    player_cutoff: usize,
    jingles_cutoff: usize,
}

impl MixKernel {
    pub fn new(
        control: Arc<ControlBlock>,
        left: PlayerAudio,
        right: PlayerAudio,
        jingles: PlayerAudio,
        interlude: PlayerAudio,
        mics: Vec<MicChannel>,
        sample_rate: u32,
    ) -> Self {
        Self {
            control,
            surface: ControlSurface::new(sample_rate),
            left,
            right,
            jingles,
            interlude,
            mics,
            stream_limiter: Limiter::new(),
            audio_limiter: Limiter::new(),
            phone_limiter: Limiter::new(),
            normalizer: Normalizer::new(sample_rate),
            str_pf_l: PeakFilter::new(115e-6, sample_rate),
            str_pf_r: PeakFilter::new(115e-6, sample_rate),
            alarm: EotAlarm::new(sample_rate),
            df: 1.0,
            vol_smooth_count: 0,
            fades: FadeGains::default(),
            lp: PlayerBufs::new(),
            rp: PlayerBufs::new(),
            jp: PlayerBufs::new(),
            ip: PlayerBufs::new(),
            str_l_tally: 0.0,
            str_r_tally: 0.0,
            rms_count: 0,
            left_peak: -1.0,
            right_peak: -1.0,
            // a quarter second for gapless main players, a twelfth for jingles
            player_cutoff: sample_rate as usize / 4,
            jingles_cutoff: sample_rate as usize / 12,
        }
    }

    /// Pre-size every internal buffer for a block size, so a later
    /// callback of that size allocates nothing.
    pub fn ensure_capacity(&mut self, nframes: usize) {
        self.lp.ensure(nframes);
        self.rp.ensure(nframes);
        self.jp.ensure(nframes);
        self.ip.ensure(nframes);
        for m in &mut self.mics {
            m.ensure_capacity(nframes);
        }
    }

    pub fn alarm_active(&self) -> bool {
        self.alarm.is_active()
    }

    /// The whole per-block job: pull the players, honour pending control
    /// updates, run one of the mode loops and publish telemetry.
    pub fn process_block(&mut self, bus: &mut BusBuffers) {
        let nframes = bus.dj_l.len();

        let elapsed = self.control.timeout.fetch_add(1, Ordering::Relaxed) + 1;
        if elapsed > LIVENESS_LIMIT && !self.control.shutdown.load(Ordering::Relaxed) {
            warn!("timeout exceeded, controlling application presumed dead");
            self.control.request_shutdown();
        }
        if self.control.should_exit() {
            silence(bus, nframes);
            return;
        }

        self.ensure_capacity(nframes);

        // pull every player; a buffer swap freezes the outgoing gains
        let sv = self.control.speed_variance.load(Ordering::Relaxed);
        let g = *self.surface.gains();
        if sv {
            self.left.read_sv(
                nframes,
                &mut self.lp.l,
                &mut self.lp.r,
                &mut self.lp.fl,
                &mut self.lp.fr,
            );
        } else {
            self.left.read(
                nframes,
                &mut self.lp.l,
                &mut self.lp.r,
                &mut self.lp.fl,
                &mut self.lp.fr,
            );
        }
        if self.left.take_swap_flag() {
            self.fades.lp_aud = g.lp_aud * self.df;
            self.fades.lp_str = g.lp_str * self.df;
        }
        self.control
            .left_runout
            .store(self.left.avail() < self.player_cutoff, Ordering::Relaxed);

        if sv {
            self.right.read_sv(
                nframes,
                &mut self.rp.l,
                &mut self.rp.r,
                &mut self.rp.fl,
                &mut self.rp.fr,
            );
        } else {
            self.right.read(
                nframes,
                &mut self.rp.l,
                &mut self.rp.r,
                &mut self.rp.fl,
                &mut self.rp.fr,
            );
        }
        if self.right.take_swap_flag() {
            self.fades.rp_aud = g.rp_aud * self.df;
            self.fades.rp_str = g.rp_str * self.df;
        }
        self.control
            .right_runout
            .store(self.right.avail() < self.player_cutoff, Ordering::Relaxed);

        self.jingles.read(
            nframes,
            &mut self.jp.l,
            &mut self.jp.r,
            &mut self.jp.fl,
            &mut self.jp.fr,
        );
        if self.jingles.take_swap_flag() {
            self.fades.jp_aud = g.jp * self.df;
            self.fades.jp_str = g.jp * self.df;
        }
        self.control
            .jingles_audio
            .store(self.jingles.avail() > self.jingles_cutoff, Ordering::Relaxed);

        self.interlude.read(
            nframes,
            &mut self.ip.l,
            &mut self.ip.r,
            &mut self.ip.fl,
            &mut self.ip.fr,
        );
        if self.interlude.take_swap_flag() {
            self.fades.ip_aud = g.ip_aud * self.df;
            self.fades.ip_str = g.ip_str * self.df;
        }

        if self.control.reset_vu.swap(false, Ordering::Relaxed) {
            self.str_l_tally = 0.0;
            self.str_r_tally = 0.0;
            self.rms_count = 0;
            self.left_peak = -1.0;
            self.right_peak = -1.0;
        }

        if self.control.normalizer_pending.swap(false, Ordering::Relaxed) {
            let stats = NormalizerStats {
                maxlevel: self.control.norm_maxlevel.get(),
                ceiling: self.control.norm_ceiling.get(),
                rise_s: self.control.norm_rise_s.get(),
                fall_s: self.control.norm_fall_s.get(),
                active: self.control.norm_active.load(Ordering::Relaxed),
            };
            self.normalizer.apply_stats(&stats);
        }

        if self.control.eot_alarm_armed.swap(false, Ordering::Relaxed) {
            self.alarm.arm();
        }

        if self.control.simple_mixer.load(Ordering::Relaxed) {
            self.run_simple(bus, nframes);
            return;
        }
        match self.control.mixer_mode() {
            MixerMode::NoPhone => self.run_no_phone(bus, nframes),
            MixerMode::PhonePublic => self.run_phone_public(bus, nframes),
            MixerMode::PhonePrivate => {
                if self.control.mic_on.load(Ordering::Relaxed) {
                    self.run_phone_private_mic_on(bus, nframes)
                } else {
                    self.run_phone_private_mic_off(bus, nframes)
                }
            }
        }

        if self.rms_count > 0 {
            self.control
                .str_meansqrd_l
                .set(self.str_l_tally / self.rms_count as f32);
            self.control
                .str_meansqrd_r
                .set(self.str_r_tally / self.rms_count as f32);
        }
        self.control.str_peak_l.set(self.str_pf_l.read());
        self.control.str_peak_r.set(self.str_pf_r.read());
        self.control.left_peak.set(self.left_peak);
        self.control.right_peak.set(self.right_peak);
    }

    #[inline]
    fn smooth_tick(&mut self) -> Gains {
        if self.vol_smooth_count % 100 == 0 {
            let targets = self.control.load_targets();
            self.surface.tick(&targets);
        }
        self.vol_smooth_count = self.vol_smooth_count.wrapping_add(1);
        *self.surface.gains()
    }

    #[inline]
    fn mic_pass(&mut self, i: usize) -> (MicSums, f32) {
        let mut sums = MicSums::default();
        let mut duck = 1.0f32;
        for m in &mut self.mics {
            let d = m.process_sample(i);
            if d < duck {
                duck = d;
            }
            sums.add(&m.feed);
        }
        (sums, duck)
    }

    #[inline]
    fn track_player_peaks(&mut self, i: usize) {
        let l = self.lp.l[i].abs().max(self.lp.r[i].abs());
        if l > self.left_peak {
            self.left_peak = l;
        }
        let r = self.rp.l[i].abs().max(self.rp.r[i].abs());
        if r > self.right_peak {
            self.right_peak = r;
        }
    }

    #[inline]
    fn monitor_tail(&mut self, mut al: f32, mut ar: f32) -> (f32, f32) {
        // the alarm tone and the programme end up equally loud
        if let Some(tone) = self.alarm.next() {
            al = (al + tone) * 0.5;
            ar = (ar + tone) * 0.5;
        }
        let dj = self.surface.dj_audio_gain();
        (al * dj, ar * dj)
    }

    #[inline]
    fn meter(&mut self, sl: f32, sr: f32) {
        self.str_pf_l.process(sl);
        self.str_pf_r.process(sr);
        self.str_l_tally += sl * sl;
        self.str_r_tally += sr * sr;
        self.rms_count += 1;
    }

    /// Fully featured mixer, no phone call in progress.
    fn run_no_phone(&mut self, bus: &mut BusBuffers, nframes: usize) {
        bus.voip_out_l[..nframes].fill(0.0);
        bus.voip_out_r[..nframes].fill(0.0);
        let using_dsp = self.control.using_dsp.load(Ordering::Relaxed);
        let twodb = self.control.twodblimit.load(Ordering::Relaxed);
        let stream_monitor = self.control.stream_monitor.load(Ordering::Relaxed);

        for i in 0..nframes {
            let g = self.smooth_tick();
            let (mic, duck) = self.mic_pass(i);
            let mut df = duck * self.surface.dfmod();
            let hr = self.surface.headroom_gain();
            if df > hr {
                df = hr;
            }
            self.df = df;

            let lp_f = self.left.fade.step();
            let rp_f = self.right.fade.step();
            let jp_f = self.jingles.fade.step();
            let ip_f = self.interlude.fade.step();
            let lp_lc_fade = lp_f * self.lp.fl[i];
            let lp_rc_fade = lp_f * self.lp.fr[i];
            let rp_lc_fade = rp_f * self.rp.fl[i];
            let rp_rc_fade = rp_f * self.rp.fr[i];
            let jp_lc_fade = jp_f * self.jp.fl[i];
            let jp_rc_fade = jp_f * self.jp.fr[i];
            let ip_lc_fade = ip_f * self.ip.fl[i];
            let ip_rc_fade = ip_f * self.ip.fr[i];

            self.track_player_peaks(i);

            // the main mix
            let mut dol = (self.lp.l[i] * g.lp_str
                + self.rp.l[i] * g.rp_str
                + self.jp.l[i] * g.jp)
                * df
                + mic.mlcm
                + mic.alcm
                + self.ip.l[i] * g.ip_str
                + ip_lc_fade * self.fades.ip_str
                + lp_lc_fade * self.fades.lp_str
                + rp_lc_fade * self.fades.rp_str
                + jp_lc_fade * self.fades.jp_str;
            let mut dor = (self.lp.r[i] * g.lp_str
                + self.rp.r[i] * g.rp_str
                + self.jp.r[i] * g.jp)
                * df
                + mic.mrcm
                + mic.arcm
                + self.ip.r[i] * g.ip_str
                + ip_rc_fade * self.fades.ip_str
                + lp_rc_fade * self.fades.lp_str
                + rp_rc_fade * self.fades.rp_str
                + jp_rc_fade * self.fades.jp_str;

            let ng = self.normalizer.process(dol, dor);
            dol *= ng;
            dor *= ng;
            let lg = self.stream_limiter.process(dol, dor);
            dol *= lg;
            dor *= lg;
            bus.dsp_out_l[i] = dol;
            bus.dsp_out_r[i] = dor;

            let (mut sl, mut sr) = if using_dsp {
                (bus.dsp_in_l[i], bus.dsp_in_r[i])
            } else {
                (dol, dor)
            };
            if twodb {
                sl *= TWO_DB_REDUCTION;
                sr *= TWO_DB_REDUCTION;
            }
            bus.str_l[i] = sl;
            bus.str_r[i] = sr;

            let (al, ar) = if !stream_monitor {
                let al = (self.lp.l[i] * g.lp_aud
                    + self.rp.l[i] * g.rp_aud
                    + self.jp.l[i] * g.jp)
                    * df
                    + mic.munpmdj
                    + mic.alcm
                    + self.ip.l[i] * g.ip_aud
                    + ip_lc_fade * g.ip_aud
                    + lp_lc_fade * self.fades.lp_aud
                    + rp_lc_fade * self.fades.rp_aud
                    + jp_lc_fade * self.fades.jp_aud;
                let ar = (self.lp.r[i] * g.lp_aud
                    + self.rp.r[i] * g.rp_aud
                    + self.jp.r[i] * g.jp)
                    * df
                    + mic.munpmdj
                    + mic.arcm
                    + self.ip.r[i] * g.ip_aud
                    + ip_rc_fade * g.ip_aud
                    + lp_rc_fade * self.fades.lp_aud
                    + rp_rc_fade * self.fades.rp_aud
                    + jp_rc_fade * self.fades.jp_aud;
                let ag = self.audio_limiter.process(al, ar);
                (al * ag, ar * ag)
            } else {
                (sl, sr)
            };
            let (al, ar) = self.monitor_tail(al, ar);
            bus.dj_l[i] = al;
            bus.dj_r[i] = ar;

            self.meter(sl, sr);
        }
    }

    /// Phone call shared with the listeners: the callers hear host and
    /// jingles, the stream carries the conversation.
    fn run_phone_public(&mut self, bus: &mut BusBuffers, nframes: usize) {
        let using_dsp = self.control.using_dsp.load(Ordering::Relaxed);
        let twodb = self.control.twodblimit.load(Ordering::Relaxed);
        let stream_monitor = self.control.stream_monitor.load(Ordering::Relaxed);

        for i in 0..nframes {
            let g = self.smooth_tick();
            let (mic, _duck) = self.mic_pass(i);
            // no ducking on a public call, headroom still applies
            let df = self.surface.headroom_gain();
            self.df = df;

            let lp_f = self.left.fade.step();
            let rp_f = self.right.fade.step();
            let jp_f = self.jingles.fade.step();
            let ip_f = self.interlude.fade.step();
            let lp_lc_fade = lp_f * self.lp.fl[i];
            let lp_rc_fade = lp_f * self.lp.fr[i];
            let rp_lc_fade = rp_f * self.rp.fl[i];
            let rp_rc_fade = rp_f * self.rp.fr[i];
            let jp_lc_fade = jp_f * self.jp.fl[i];
            let jp_rc_fade = jp_f * self.jp.fr[i];
            let ip_lc_fade = ip_f * self.ip.fl[i];
            let ip_rc_fade = ip_f * self.ip.fr[i];

            // phone send: host voice plus jingles
            let mut psl = mic.mlcm + self.jp.l[i] * g.jp + jp_lc_fade * self.fades.jp_str;
            let mut psr = mic.mrcm + self.jp.r[i] * g.jp + jp_rc_fade * self.fades.jp_str;

            self.track_player_peaks(i);

            // stream carries players, the caller and the send mix
            let mut dol = (self.lp.l[i] * g.lp_str + self.rp.l[i] * g.rp_str) * df
                + bus.voip_in_l[i]
                + psl
                + mic.alcm
                + lp_lc_fade * self.fades.lp_str
                + rp_lc_fade * self.fades.rp_str
                + self.ip.l[i] * g.ip_str
                + ip_lc_fade * self.fades.ip_str;
            let mut dor = (self.lp.r[i] * g.lp_str + self.rp.r[i] * g.rp_str) * df
                + bus.voip_in_r[i]
                + psr
                + mic.arcm
                + lp_rc_fade * self.fades.lp_str
                + rp_rc_fade * self.fades.rp_str
                + self.ip.r[i] * g.ip_str
                + ip_rc_fade * self.fades.ip_str;

            let pg = self.phone_limiter.process(psl, psr);
            psl *= pg;
            psr *= pg;
            bus.voip_out_l[i] = psl;
            bus.voip_out_r[i] = psr;

            let ng = self.normalizer.process(dol, dor);
            dol *= ng;
            dor *= ng;
            let lg = self.stream_limiter.process(dol, dor);
            dol *= lg;
            dor *= lg;
            bus.dsp_out_l[i] = dol;
            bus.dsp_out_r[i] = dor;

            let (mut sl, mut sr) = if using_dsp {
                (bus.dsp_in_l[i], bus.dsp_in_r[i])
            } else {
                (dol, dor)
            };
            if twodb {
                sl *= TWO_DB_REDUCTION;
                sr *= TWO_DB_REDUCTION;
            }
            bus.str_l[i] = sl;
            bus.str_r[i] = sr;

            let (al, ar) = if !stream_monitor {
                let al = (self.lp.l[i] * g.lp_aud + self.rp.l[i] * g.rp_aud) * df
                    + bus.voip_in_l[i]
                    + mic.alcm
                    + lp_lc_fade * self.fades.lp_aud
                    + rp_lc_fade * self.fades.rp_aud
                    + self.ip.l[i] * g.ip_aud
                    + ip_lc_fade * self.fades.ip_aud
                    + mic.munpm
                    + self.jp.l[i] * g.jp
                    + jp_lc_fade * self.fades.jp_str;
                let ar = (self.lp.r[i] * g.lp_aud + self.rp.r[i] * g.rp_aud) * df
                    + bus.voip_in_r[i]
                    + mic.arcm
                    + lp_rc_fade * self.fades.lp_aud
                    + rp_rc_fade * self.fades.rp_aud
                    + self.ip.r[i] * g.ip_aud
                    + ip_rc_fade * self.fades.ip_aud
                    + mic.munpm
                    + self.jp.r[i] * g.jp
                    + jp_rc_fade * self.fades.jp_str;
                let ag = self.audio_limiter.process(al, ar);
                (al * ag, ar * ag)
            } else {
                (sl, sr)
            };
            let (al, ar) = self.monitor_tail(al, ar);
            bus.dj_l[i] = al;
            bus.dj_r[i] = ar;

            self.meter(sl, sr);
        }
    }

    /// Private call, microphone closed: listeners get players only, the
    /// caller hears the stream mixback plus jingles and the raw mics.
    fn run_phone_private_mic_off(&mut self, bus: &mut BusBuffers, nframes: usize) {
        let using_dsp = self.control.using_dsp.load(Ordering::Relaxed);
        let twodb = self.control.twodblimit.load(Ordering::Relaxed);
        let stream_monitor = self.control.stream_monitor.load(Ordering::Relaxed);

        for i in 0..nframes {
            let g = self.smooth_tick();
            let (mic, _duck) = self.mic_pass(i);
            self.df = 1.0;

            let lp_f = self.left.fade.step();
            let rp_f = self.right.fade.step();
            let jp_f = self.jingles.fade.step();
            let ip_f = self.interlude.fade.step();
            let lp_lc_fade = lp_f * self.lp.fl[i];
            let lp_rc_fade = lp_f * self.lp.fr[i];
            let rp_lc_fade = rp_f * self.rp.fl[i];
            let rp_rc_fade = rp_f * self.rp.fr[i];
            let jp_lc_fade = jp_f * self.jp.fl[i];
            let jp_rc_fade = jp_f * self.jp.fr[i];
            let ip_lc_fade = ip_f * self.ip.fl[i];
            let ip_rc_fade = ip_f * self.ip.fr[i];

            self.track_player_peaks(i);

            let mut dol = self.lp.l[i] * g.lp_str
                + self.rp.l[i] * g.rp_str
                + mic.alcm
                + lp_lc_fade * self.fades.lp_str
                + rp_lc_fade * self.fades.rp_str
                + self.ip.l[i] * g.ip_str
                + ip_lc_fade * self.fades.ip_str;
            let mut dor = self.lp.r[i] * g.lp_str
                + self.rp.r[i] * g.rp_str
                + mic.arcm
                + lp_rc_fade * self.fades.lp_str
                + rp_rc_fade * self.fades.rp_str
                + self.ip.r[i] * g.ip_str
                + ip_rc_fade * self.fades.ip_str;

            let ng = self.normalizer.process(dol, dor);
            dol *= ng;
            dor *= ng;
            let lg = self.stream_limiter.process(dol, dor);
            dol *= lg;
            dor *= lg;

            // the caller's mix: finished stream at mixback level, plus
            // jingles and the raw (unducked, ungated) microphones
            let mut psl =
                dol * g.mixback + self.jp.l[i] * g.jp + mic.mlc + jp_lc_fade * self.fades.jp_str;
            let mut psr =
                dor * g.mixback + self.jp.r[i] * g.jp + mic.mrc + jp_rc_fade * self.fades.jp_str;
            let pg = self.phone_limiter.process(psl, psr);
            psl *= pg;
            psr *= pg;
            bus.voip_out_l[i] = psl;
            bus.voip_out_r[i] = psr;

            bus.dsp_out_l[i] = dol;
            bus.dsp_out_r[i] = dor;
            let (mut sl, mut sr) = if using_dsp {
                (bus.dsp_in_l[i], bus.dsp_in_r[i])
            } else {
                (dol, dor)
            };
            if twodb {
                sl *= TWO_DB_REDUCTION;
                sr *= TWO_DB_REDUCTION;
            }
            bus.str_l[i] = sl;
            bus.str_r[i] = sr;

            let (al, ar) = if !stream_monitor {
                // the DJ follows the call
                let al = sl * g.mixback
                    + self.jp.l[i] * g.jp
                    + mic.munpm
                    + mic.alcm * g.mixback
                    + jp_lc_fade * self.fades.jp_str
                    + bus.voip_in_l[i];
                let ar = sr * g.mixback
                    + self.jp.r[i] * g.jp
                    + mic.munpm
                    + mic.arcm * g.mixback
                    + jp_rc_fade * self.fades.jp_str
                    + bus.voip_in_r[i];
                let ag = self.audio_limiter.process(al, ar);
                (al * ag, ar * ag)
            } else {
                (sl, sr)
            };
            let (al, ar) = self.monitor_tail(al, ar);
            bus.dj_l[i] = al;
            bus.dj_r[i] = ar;

            self.meter(sl, sr);
        }
    }

    /// Private call with the microphone open: the full mix goes out as
    /// usual and the caller receives the finished stream, attenuated.
    fn run_phone_private_mic_on(&mut self, bus: &mut BusBuffers, nframes: usize) {
        let using_dsp = self.control.using_dsp.load(Ordering::Relaxed);
        let twodb = self.control.twodblimit.load(Ordering::Relaxed);
        let stream_monitor = self.control.stream_monitor.load(Ordering::Relaxed);

        for i in 0..nframes {
            let g = self.smooth_tick();
            let (mic, duck) = self.mic_pass(i);
            let mut df = duck * self.surface.dfmod();
            let hr = self.surface.headroom_gain();
            if df > hr {
                df = hr;
            }
            self.df = df;

            let lp_f = self.left.fade.step();
            let rp_f = self.right.fade.step();
            let jp_f = self.jingles.fade.step();
            let ip_f = self.interlude.fade.step();
            let lp_lc_fade = lp_f * self.lp.fl[i];
            let lp_rc_fade = lp_f * self.lp.fr[i];
            let rp_lc_fade = rp_f * self.rp.fl[i];
            let rp_rc_fade = rp_f * self.rp.fr[i];
            let jp_lc_fade = jp_f * self.jp.fl[i];
            let jp_rc_fade = jp_f * self.jp.fr[i];
            let ip_lc_fade = ip_f * self.ip.fl[i];
            let ip_rc_fade = ip_f * self.ip.fr[i];

            self.track_player_peaks(i);

            let mut dol = (self.lp.l[i] * g.lp_str
                + self.rp.l[i] * g.rp_str
                + self.jp.l[i] * g.jp)
                * df
                + mic.mlcm
                + mic.alcm
                + self.ip.l[i] * g.ip_str
                + ip_lc_fade * self.fades.ip_str
                + lp_lc_fade * self.fades.lp_str
                + rp_lc_fade * self.fades.rp_str
                + jp_lc_fade * self.fades.jp_str;
            let mut dor = (self.lp.r[i] * g.lp_str
                + self.rp.r[i] * g.rp_str
                + self.jp.r[i] * g.jp)
                * df
                + mic.mrcm
                + mic.arcm
                + self.ip.r[i] * g.ip_str
                + ip_rc_fade * self.fades.ip_str
                + lp_rc_fade * self.fades.lp_str
                + rp_rc_fade * self.fades.rp_str
                + jp_rc_fade * self.fades.jp_str;

            let ng = self.normalizer.process(dol, dor);
            dol *= ng;
            dor *= ng;
            let lg = self.stream_limiter.process(dol, dor);
            dol *= lg;
            dor *= lg;

            // the caller hears the finished stream, attenuated
            bus.voip_out_l[i] = dol * g.mixback;
            bus.voip_out_r[i] = dor * g.mixback;

            bus.dsp_out_l[i] = dol;
            bus.dsp_out_r[i] = dor;
            let (mut sl, mut sr) = if using_dsp {
                (bus.dsp_in_l[i], bus.dsp_in_r[i])
            } else {
                (dol, dor)
            };
            if twodb {
                sl *= TWO_DB_REDUCTION;
                sr *= TWO_DB_REDUCTION;
            }
            bus.str_l[i] = sl;
            bus.str_r[i] = sr;

            let (al, ar) = if !stream_monitor {
                let al = (self.lp.l[i] * g.lp_aud
                    + self.rp.l[i] * g.rp_aud
                    + self.jp.l[i] * g.jp)
                    * df
                    + mic.munpmdj
                    + mic.alcm
                    + self.ip.l[i] * g.ip_aud
                    + ip_lc_fade * self.fades.ip_aud
                    + lp_lc_fade * self.fades.lp_aud
                    + rp_lc_fade * self.fades.rp_aud
                    + jp_lc_fade * self.fades.jp_aud;
                let ar = (self.lp.r[i] * g.lp_aud
                    + self.rp.r[i] * g.rp_aud
                    + self.jp.r[i] * g.jp)
                    * df
                    + mic.munpmdj
                    + mic.arcm
                    + self.ip.r[i] * g.ip_aud
                    + ip_rc_fade * self.fades.ip_aud
                    + lp_rc_fade * self.fades.lp_aud
                    + rp_rc_fade * self.fades.rp_aud
                    + jp_rc_fade * self.fades.jp_aud;
                let ag = self.audio_limiter.process(al, ar);
                (al * ag, ar * ag)
            } else {
                (sl, sr)
            };
            let (al, ar) = self.monitor_tail(al, ar);
            bus.dj_l[i] = al;
            bus.dj_r[i] = ar;

            self.meter(sl, sr);
        }
    }

    /// Cut-down passthrough: left player straight to the monitor and the
    /// stream, everything else untouched.
    fn run_simple(&mut self, bus: &mut BusBuffers, nframes: usize) {
        let targets = self.control.load_targets();
        self.surface.refresh_dj_gain(&targets);
        let dj = self.surface.dj_audio_gain();

        if targets.left_audio {
            for i in 0..nframes {
                bus.dj_l[i] = self.lp.l[i] * dj;
                bus.dj_r[i] = self.lp.r[i] * dj;
            }
        } else {
            bus.dj_l[..nframes].fill(0.0);
            bus.dj_r[..nframes].fill(0.0);
        }
        if targets.left_stream {
            bus.str_l[..nframes].copy_from_slice(&self.lp.l[..nframes]);
            bus.str_r[..nframes].copy_from_slice(&self.lp.r[..nframes]);
        } else {
            bus.str_l[..nframes].fill(0.0);
            bus.str_r[..nframes].fill(0.0);
        }
    }
}

fn silence(bus: &mut BusBuffers, nframes: usize) {
    bus.dj_l[..nframes].fill(0.0);
    bus.dj_r[..nframes].fill(0.0);
    bus.str_l[..nframes].fill(0.0);
    bus.str_r[..nframes].fill(0.0);
    bus.voip_out_l[..nframes].fill(0.0);
    bus.voip_out_r[..nframes].fill(0.0);
    bus.dsp_out_l[..nframes].fill(0.0);
    bus.dsp_out_r[..nframes].fill(0.0);
}
