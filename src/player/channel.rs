// Canal de lecture - tampon circulaire SPSC entre décodeur et callback
//
// Each media player owns a decoder worker thread producing interleaved
// stereo f32 into a ring buffer, and an audio-side reader consumed by
// the mix callback. Track changes hand a fresh ring to the audio side;
// the outgoing ring moves to the fade slot so its tail can play out
// under a decaying envelope while the new track starts at once.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::control::state::AtomicF32;
use crate::error::MixerError;
use crate::player::decoder::{self, WorkerState};
use crate::player::fade::{FadeEnvelope, FadeMode};

/// Playlength of each track ring buffer, in seconds.
pub const RB_SECONDS: usize = 10;

/// Player lifecycle, mirrored into telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Stopped,
    Initiate,
    Playing,
    Ejecting,
    Complete,
}

impl PlayMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => PlayMode::Initiate,
            2 => PlayMode::Playing,
            3 => PlayMode::Ejecting,
            4 => PlayMode::Complete,
            _ => PlayMode::Stopped,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PlayMode::Stopped => 0,
            PlayMode::Initiate => 1,
            PlayMode::Playing => 2,
            PlayMode::Ejecting => 3,
            PlayMode::Complete => 4,
        }
    }
}

/// Freshly decoded track metadata waiting to be forwarded to the UI.
#[derive(Debug, Clone, Default)]
pub struct DynamicMetadata {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub audio_context: u32,
    pub rbdelay_ms: u32,
}

/// State shared between the dispatcher handle, the decoder worker and
/// the audio-side reader. Everything the audio thread touches is a
/// word-sized atomic; the metadata slot has its own mutex and is only
/// locked by the worker and the dispatcher.
pub struct PlayerShared {
    pub name: &'static str,
    pub current_audio_context: AtomicU32,
    pub playmode: AtomicU8,
    pub pause: AtomicBool,
    pub watchdog_timer: AtomicU32,
    pub newpbspeed: AtomicF32,
    pub fade_mode: AtomicU8,
    pub fadeout_f: AtomicBool,
    pub rsqual: AtomicU8,
    pub dither: AtomicBool,
    pub silence: AtomicF32,
    pub play_progress_ms: AtomicU32,
    pub avail: AtomicU32,
    pub have_data_f: AtomicBool,
    pub dynamic_metadata: Mutex<Option<DynamicMetadata>>,
}

impl PlayerShared {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            current_audio_context: AtomicU32::new(0),
            playmode: AtomicU8::new(PlayMode::Stopped.as_u8()),
            pause: AtomicBool::new(false),
            watchdog_timer: AtomicU32::new(0),
            newpbspeed: AtomicF32::new(1.0),
            fade_mode: AtomicU8::new(0),
            fadeout_f: AtomicBool::new(false),
            rsqual: AtomicU8::new(4),
            dither: AtomicBool::new(false),
            silence: AtomicF32::new(0.0),
            play_progress_ms: AtomicU32::new(0),
            avail: AtomicU32::new(0),
            have_data_f: AtomicBool::new(false),
            dynamic_metadata: Mutex::new(None),
        }
    }

    pub fn play_mode(&self) -> PlayMode {
        PlayMode::from_u8(self.playmode.load(Ordering::Relaxed))
    }

    pub fn set_play_mode(&self, mode: PlayMode) {
        self.playmode.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn context(&self) -> u32 {
        self.current_audio_context.load(Ordering::Relaxed)
    }

    /// Allocate a fresh engaged (odd) context id and return it.
    pub fn engage_context(&self) -> u32 {
        let prev = self
            .current_audio_context
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(if c & 1 == 1 { c + 2 } else { c + 1 })
            })
            .unwrap_or(0);
        if prev & 1 == 1 { prev + 2 } else { prev + 1 }
    }

    /// Move the context to the disengaged (even) state if needed.
    pub fn disengage_context(&self) {
        let _ = self
            .current_audio_context
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c & 1 == 1 { Some(c + 1) } else { None }
            });
    }
}

/// A new track ring handed from the worker to the audio side.
pub struct TrackHandoff {
    pub cons: HeapCons<f32>,
    pub context: u32,
}

/// Commands accepted by the decoder worker.
pub enum PlayerCommand {
    Play {
        path: String,
        seek_s: u32,
        replay_gain_db: f32,
        flush: bool,
        context: u32,
    },
    PlayMany {
        entries: Vec<String>,
        loop_playlist: bool,
        context: u32,
    },
    Eject,
    Shutdown,
}

/// Audio-thread half of a player channel. All reads are wait-free; the
/// only allocations are growth of the interleave scratch when the block
/// size increases, and retired rings are pushed back to the worker for
/// disposal rather than dropped here.
pub struct PlayerAudio {
    pub shared: Arc<PlayerShared>,
    main: Option<HeapCons<f32>>,
    fade_cons: Option<HeapCons<f32>>,
    handoff: HeapCons<TrackHandoff>,
    retire: HeapProd<HeapCons<f32>>,
    pub fade: FadeEnvelope,
    have_swapped_buffers: bool,
    scratch: Vec<f32>,
    sv_phase: f32,
    sv_prev: (f32, f32),
    sv_next: (f32, f32),
    frames_played: u64,
    sample_rate: u32,
}

impl PlayerAudio {
    /// One-shot swap flag: true exactly once after a new track took over
    /// the ring buffer during the current callback.
    pub fn take_swap_flag(&mut self) -> bool {
        std::mem::take(&mut self.have_swapped_buffers)
    }

    /// Sample pairs ready in the active ring.
    pub fn avail(&self) -> usize {
        self.main.as_ref().map_or(0, |c| c.occupied_len() / 2)
    }

    fn poll_handoffs(&mut self) {
        while let Some(h) = self.handoff.try_pop() {
            if let Some(old) = self.fade_cons.take() {
                // dispose on the worker side, never free here
                let _ = self.retire.try_push(old);
            }
            self.fade_cons = self.main.take();
            self.main = Some(h.cons);
            let mode = FadeMode::from_u8(self.shared.fade_mode.load(Ordering::Relaxed));
            let enabled = self.shared.fadeout_f.load(Ordering::Relaxed);
            self.fade.start(mode, enabled);
            self.have_swapped_buffers = true;
            self.frames_played = 0;
            self.sv_phase = 0.0;
            self.sv_prev = (0.0, 0.0);
            self.sv_next = (0.0, 0.0);
        }
    }

    fn ensure_scratch(&mut self, nframes: usize) {
        let want = nframes * 2;
        if self.scratch.len() < want {
            self.scratch.resize(want, 0.0);
        }
    }

    fn publish_state(&self) {
        let pairs = self.avail();
        self.shared.avail.store(pairs as u32, Ordering::Relaxed);
        self.shared.have_data_f.store(pairs > 0, Ordering::Relaxed);
        self.shared.play_progress_ms.store(
            (self.frames_played * 1000 / self.sample_rate as u64) as u32,
            Ordering::Relaxed,
        );
    }

    fn read_fade(&mut self, nframes: usize, fade_l: &mut [f32], fade_r: &mut [f32]) {
        let mut pairs = 0;
        if let Some(c) = self.fade_cons.as_mut() {
            pairs = (c.occupied_len() / 2).min(nframes);
            let take = pairs * 2;
            c.pop_slice(&mut self.scratch[..take]);
            for i in 0..pairs {
                fade_l[i] = self.scratch[i * 2];
                fade_r[i] = self.scratch[i * 2 + 1];
            }
        }
        for i in pairs..nframes {
            fade_l[i] = 0.0;
            fade_r[i] = 0.0;
        }
    }

    /// Pull `nframes` sample pairs from the ring and the fade ring,
    /// padding with silence on underrun. Wait-free.
    pub fn read(
        &mut self,
        nframes: usize,
        out_l: &mut [f32],
        out_r: &mut [f32],
        fade_l: &mut [f32],
        fade_r: &mut [f32],
    ) {
        self.poll_handoffs();
        self.ensure_scratch(nframes);

        let mut pairs = 0;
        if !self.shared.pause.load(Ordering::Relaxed) {
            if let Some(c) = self.main.as_mut() {
                pairs = (c.occupied_len() / 2).min(nframes);
                let take = pairs * 2;
                c.pop_slice(&mut self.scratch[..take]);
                for i in 0..pairs {
                    out_l[i] = self.scratch[i * 2];
                    out_r[i] = self.scratch[i * 2 + 1];
                }
                self.frames_played += pairs as u64;
            }
        }
        for i in pairs..nframes {
            out_l[i] = 0.0;
            out_r[i] = 0.0;
        }

        self.read_fade(nframes, fade_l, fade_r);
        self.publish_state();
    }

    /// Speed-variance read path: linear interpolation through the ring at
    /// the current playback speed ratio.
    pub fn read_sv(
        &mut self,
        nframes: usize,
        out_l: &mut [f32],
        out_r: &mut [f32],
        fade_l: &mut [f32],
        fade_r: &mut [f32],
    ) {
        let speed = self.shared.newpbspeed.get().clamp(0.25, 4.0);
        if (speed - 1.0).abs() < 1e-6 {
            self.read(nframes, out_l, out_r, fade_l, fade_r);
            return;
        }
        self.poll_handoffs();
        self.ensure_scratch(nframes);

        let paused = self.shared.pause.load(Ordering::Relaxed);
        let mut produced = 0;
        if !paused {
            if let Some(main) = self.main.as_mut() {
                'outer: for i in 0..nframes {
                    while self.sv_phase >= 1.0 {
                        if main.occupied_len() < 2 {
                            break 'outer;
                        }
                        let l = main.try_pop().unwrap_or(0.0);
                        let r = main.try_pop().unwrap_or(0.0);
                        self.sv_prev = self.sv_next;
                        self.sv_next = (l, r);
                        self.sv_phase -= 1.0;
                        self.frames_played += 1;
                    }
                    let t = self.sv_phase;
                    out_l[i] = self.sv_prev.0 + (self.sv_next.0 - self.sv_prev.0) * t;
                    out_r[i] = self.sv_prev.1 + (self.sv_next.1 - self.sv_prev.1) * t;
                    self.sv_phase += speed;
                    produced = i + 1;
                }
            }
        }
        for i in produced..nframes {
            out_l[i] = 0.0;
            out_r[i] = 0.0;
        }

        self.read_fade(nframes, fade_l, fade_r);
        self.publish_state();
    }
}

/// Dispatcher-side handle for one player.
pub struct PlayerControl {
    pub shared: Arc<PlayerShared>,
    tx: mpsc::Sender<PlayerCommand>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlayerControl {
    pub fn play(&self, path: &str, seek_s: u32, _size_s: u32, replay_gain_db: f32) -> u32 {
        self.start(path, seek_s, replay_gain_db, true)
    }

    pub fn play_noflush(&self, path: &str, seek_s: u32, _size_s: u32, replay_gain_db: f32) -> u32 {
        self.start(path, seek_s, replay_gain_db, false)
    }

    fn start(&self, path: &str, seek_s: u32, replay_gain_db: f32, flush: bool) -> u32 {
        let context = self.shared.engage_context();
        self.shared.set_play_mode(PlayMode::Initiate);
        let _ = self.tx.send(PlayerCommand::Play {
            path: path.to_string(),
            seek_s,
            replay_gain_db,
            flush,
            context,
        });
        context
    }

    pub fn playmany(&self, entries: Vec<String>, loop_playlist: bool) -> u32 {
        let context = self.shared.engage_context();
        self.shared.set_play_mode(PlayMode::Initiate);
        let _ = self.tx.send(PlayerCommand::PlayMany {
            entries,
            loop_playlist,
            context,
        });
        context
    }

    pub fn eject(&self) {
        self.shared.disengage_context();
        self.shared.set_play_mode(PlayMode::Ejecting);
        let _ = self.tx.send(PlayerCommand::Eject);
    }

    pub fn set_pause(&self, paused: bool) {
        self.shared.pause.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause.load(Ordering::Relaxed)
    }

    pub fn set_dither(&self, dither: bool) {
        self.shared.dither.store(dither, Ordering::Relaxed);
    }

    pub fn set_fade_mode(&self, mode: u8) {
        self.shared.fade_mode.store(mode, Ordering::Relaxed);
    }

    pub fn set_resample_quality(&self, quality: u8) {
        self.shared.rsqual.store(quality, Ordering::Relaxed);
    }

    /// Take the new-metadata slot, if the decoder published one.
    pub fn take_metadata(&self) -> Option<DynamicMetadata> {
        self.shared
            .dynamic_metadata
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }

    pub fn has_metadata(&self) -> bool {
        self.shared
            .dynamic_metadata
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn shutdown(&mut self) {
        let _ = self.tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Build a complete player channel: shared state, decoder worker thread,
/// dispatcher handle and audio-side reader.
pub fn create_player(
    name: &'static str,
    sample_rate: u32,
) -> Result<(PlayerControl, PlayerAudio), MixerError> {
    let shared = Arc::new(PlayerShared::new(name));
    let (handoff_prod, handoff_cons) = HeapRb::<TrackHandoff>::new(4).split();
    let (retire_prod, retire_cons) = HeapRb::<HeapCons<f32>>::new(8).split();
    let (tx, rx) = mpsc::channel();

    let worker_state = WorkerState {
        shared: Arc::clone(&shared),
        rx,
        handoff: handoff_prod,
        retire: retire_cons,
        sample_rate,
    };
    let worker = thread::Builder::new()
        .name(format!("{name}-decoder"))
        .spawn(move || decoder::run_worker(worker_state))?;

    let control = PlayerControl {
        shared: Arc::clone(&shared),
        tx,
        worker: Some(worker),
    };
    let audio = PlayerAudio {
        shared,
        main: None,
        fade_cons: None,
        handoff: handoff_cons,
        retire: retire_prod,
        fade: FadeEnvelope::new(sample_rate),
        have_swapped_buffers: false,
        scratch: Vec::new(),
        sv_phase: 0.0,
        sv_prev: (0.0, 0.0),
        sv_next: (0.0, 0.0),
        frames_played: 0,
        sample_rate,
    };
    Ok((control, audio))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an audio side with a synthetic ring for kernel tests.
    pub(crate) fn audio_with_ring(
        sample_rate: u32,
        pairs: &[(f32, f32)],
    ) -> (PlayerAudio, HeapProd<f32>) {
        let shared = Arc::new(PlayerShared::new("test"));
        shared.engage_context();
        let (handoff_prod, handoff_cons) = HeapRb::<TrackHandoff>::new(4).split();
        let (retire_prod, _retire_cons) = HeapRb::<HeapCons<f32>>::new(8).split();
        let (mut prod, cons) =
            HeapRb::<f32>::new(RB_SECONDS * sample_rate as usize * 2).split();
        for &(l, r) in pairs {
            let _ = prod.try_push(l);
            let _ = prod.try_push(r);
        }
        let mut handoff_prod = handoff_prod;
        let _ = handoff_prod.try_push(TrackHandoff {
            cons,
            context: shared.context(),
        });
        let audio = PlayerAudio {
            shared,
            main: None,
            fade_cons: None,
            handoff: handoff_cons,
            retire: retire_prod,
            fade: FadeEnvelope::new(sample_rate),
            have_swapped_buffers: false,
            scratch: Vec::new(),
            sv_phase: 0.0,
            sv_prev: (0.0, 0.0),
            sv_next: (0.0, 0.0),
            frames_played: 0,
            sample_rate,
        };
        (audio, prod)
    }

    #[test]
    fn test_read_pads_with_silence_on_underrun() {
        let (mut audio, _prod) = audio_with_ring(44100, &[(0.5, -0.5), (0.25, -0.25)]);
        let mut l = [9.0f32; 4];
        let mut r = [9.0f32; 4];
        let mut fl = [9.0f32; 4];
        let mut fr = [9.0f32; 4];
        audio.read(4, &mut l, &mut r, &mut fl, &mut fr);
        assert_eq!(l, [0.5, 0.25, 0.0, 0.0]);
        assert_eq!(r, [-0.5, -0.25, 0.0, 0.0]);
        assert_eq!(fl, [0.0; 4]);
        assert!(audio.take_swap_flag());
        assert!(!audio.take_swap_flag());
    }

    #[test]
    fn test_pause_stops_consumption() {
        let (mut audio, _prod) = audio_with_ring(44100, &[(0.5, 0.5); 8]);
        audio.shared.pause.store(true, Ordering::Relaxed);
        let mut l = [0.0f32; 4];
        let mut r = [0.0f32; 4];
        let mut fl = [0.0f32; 4];
        let mut fr = [0.0f32; 4];
        audio.read(4, &mut l, &mut r, &mut fl, &mut fr);
        assert_eq!(l, [0.0; 4]);
        assert_eq!(audio.avail(), 8);
        audio.shared.pause.store(false, Ordering::Relaxed);
        audio.read(4, &mut l, &mut r, &mut fl, &mut fr);
        assert_eq!(l, [0.5; 4]);
        assert_eq!(audio.avail(), 4);
    }

    #[test]
    fn test_speed_variance_half_speed_doubles_duration() {
        let pairs: Vec<(f32, f32)> = (0..10).map(|i| (i as f32, i as f32)).collect();
        let (mut audio, _prod) = audio_with_ring(44100, &pairs);
        audio.shared.newpbspeed.set(0.5);
        // prime the interpolator past the handoff
        let mut l = [0.0f32; 16];
        let mut r = [0.0f32; 16];
        let mut fl = [0.0f32; 16];
        let mut fr = [0.0f32; 16];
        audio.read_sv(16, &mut l, &mut r, &mut fl, &mut fr);
        // at half speed, 16 output frames consume about 8 input frames
        assert!(audio.avail() >= 1 && audio.avail() <= 3, "avail {}", audio.avail());
        // output is a monotone ramp (linear interpolation of a ramp)
        for w in l.windows(2) {
            assert!(w[1] >= w[0] - 1e-6);
        }
    }

    #[test]
    fn test_context_engagement_parity() {
        let shared = PlayerShared::new("parity");
        let c1 = shared.engage_context();
        assert_eq!(c1 & 1, 1);
        let c2 = shared.engage_context();
        assert!(c2 > c1 && c2 & 1 == 1);
        shared.disengage_context();
        assert_eq!(shared.context() & 1, 0);
        shared.disengage_context();
        assert_eq!(shared.context(), c2 + 1);
    }
}
