// Décodeur - thread producteur d'un canal de lecture
//
// One worker per player. It owns the producing half of the track ring,
// decodes media files through a per-format backend, converts to stereo
// f32 at the graph sample rate and keeps the ring topped up. Commands
// from the dispatcher preempt the decode loop between chunks.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

use crate::audio::db::db2level;
use crate::player::channel::{
    DynamicMetadata, PlayMode, PlayerCommand, PlayerShared, RB_SECONDS, TrackHandoff,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported media file: {0}")]
    Unsupported(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("decode error: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
}

#[derive(Debug, Clone, Default)]
pub struct TrackTags {
    pub artist: String,
    pub title: String,
    pub album: String,
}

impl TrackTags {
    pub fn any(&self) -> bool {
        !(self.artist.is_empty() && self.title.is_empty() && self.album.is_empty())
    }
}

/// Per-format decode backend: produces interleaved samples at the file's
/// native rate and channel count.
trait Decode: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> usize;
    fn bits_per_sample(&self) -> u32;
    fn tags(&self) -> TrackTags;
    /// Decode roughly one block into `out` (cleared first). Returns
    /// `Ok(false)` at end of stream.
    fn next_block(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError>;
    /// Best-effort seek; backends without native seeking skip-decode.
    fn seek(&mut self, seconds: f64);
}

const BLOCK_FRAMES: usize = 4096;

// ---------------------------------------------------------------------
// WAV backend (hound)

struct WavDecoder {
    reader: hound::WavReader<BufReader<File>>,
    spec: hound::WavSpec,
}

impl WavDecoder {
    fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        Ok(Self { reader, spec })
    }
}

impl Decode for WavDecoder {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channels(&self) -> usize {
        self.spec.channels as usize
    }

    fn bits_per_sample(&self) -> u32 {
        self.spec.bits_per_sample as u32
    }

    fn tags(&self) -> TrackTags {
        TrackTags::default()
    }

    fn next_block(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError> {
        out.clear();
        let want = BLOCK_FRAMES * self.channels();
        match self.spec.sample_format {
            hound::SampleFormat::Float => {
                for s in self.reader.samples::<f32>().take(want) {
                    out.push(s?);
                }
            }
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (self.spec.bits_per_sample - 1)) as f32;
                for s in self.reader.samples::<i32>().take(want) {
                    out.push(s? as f32 * scale);
                }
            }
        }
        Ok(!out.is_empty())
    }

    fn seek(&mut self, seconds: f64) {
        let skip = (seconds * self.spec.sample_rate as f64) as usize * self.channels();
        match self.spec.sample_format {
            hound::SampleFormat::Float => {
                for _ in self.reader.samples::<f32>().take(skip) {}
            }
            hound::SampleFormat::Int => {
                for _ in self.reader.samples::<i32>().take(skip) {}
            }
        }
    }
}

// ---------------------------------------------------------------------
// FLAC backend (claxon)

struct FlacDecoder {
    reader: claxon::FlacReader<File>,
    info: claxon::metadata::StreamInfo,
    tags: TrackTags,
    // recycled frame buffer; whole frames only, a fresh FrameReader per
    // call resumes cleanly at the next frame boundary
    frame_buf: Vec<i32>,
}

impl FlacDecoder {
    fn open(path: &Path) -> Result<Self, DecodeError> {
        let reader = claxon::FlacReader::open(path)?;
        let info = reader.streaminfo();
        let mut tags = TrackTags::default();
        for (name, value) in reader.tags() {
            if name.eq_ignore_ascii_case("artist") {
                tags.artist = value.to_string();
            } else if name.eq_ignore_ascii_case("title") {
                tags.title = value.to_string();
            } else if name.eq_ignore_ascii_case("album") {
                tags.album = value.to_string();
            }
        }
        Ok(Self {
            reader,
            info,
            tags,
            frame_buf: Vec::new(),
        })
    }

    /// Decode exactly one FLAC frame, interleaved into `out`.
    fn read_frame(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError> {
        let scale = 1.0 / (1i64 << (self.info.bits_per_sample - 1)) as f32;
        let buffer = std::mem::take(&mut self.frame_buf);
        match self.reader.blocks().read_next_or_eof(buffer)? {
            Some(block) => {
                let channels = block.channels();
                for i in 0..block.duration() {
                    for ch in 0..channels {
                        out.push(block.channel(ch)[i as usize] as f32 * scale);
                    }
                }
                self.frame_buf = block.into_buffer();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Decode for FlacDecoder {
    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    fn channels(&self) -> usize {
        self.info.channels as usize
    }

    fn bits_per_sample(&self) -> u32 {
        self.info.bits_per_sample
    }

    fn tags(&self) -> TrackTags {
        self.tags.clone()
    }

    fn next_block(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError> {
        out.clear();
        self.read_frame(out)
    }

    fn seek(&mut self, seconds: f64) {
        // no native seek; decode and discard whole frames
        let mut skip = (seconds * self.info.sample_rate as f64) as usize * self.channels();
        let mut scratch = Vec::new();
        while skip > 0 {
            scratch.clear();
            match self.read_frame(&mut scratch) {
                Ok(true) => skip = skip.saturating_sub(scratch.len()),
                _ => break,
            }
        }
    }
}

// ---------------------------------------------------------------------
// Symphonia backend (ogg/vorbis, mp3 and friends)

struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    bits: u32,
    tags: TrackTags,
}

impl SymphoniaDecoder {
    fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mut probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut tags = TrackTags::default();
        let mut read_tags = |rev: &symphonia::core::meta::MetadataRevision| {
            for tag in rev.tags() {
                match tag.std_key {
                    Some(StandardTagKey::Artist) => tags.artist = tag.value.to_string(),
                    Some(StandardTagKey::TrackTitle) => tags.title = tag.value.to_string(),
                    Some(StandardTagKey::Album) => tags.album = tag.value.to_string(),
                    _ => {}
                }
            }
        };
        if let Some(meta) = probed.metadata.get() {
            if let Some(rev) = meta.current() {
                read_tags(rev);
            }
        }
        if let Some(rev) = probed.format.metadata().current() {
            read_tags(rev);
        }

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported(path.display().to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DecodeError::Unsupported(path.display().to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2);
        let bits = track.codec_params.bits_per_sample.unwrap_or(16);
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format: probed.format,
            decoder,
            track_id,
            sample_rate,
            channels,
            bits,
            tags,
        })
    }
}

impl Decode for SymphoniaDecoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn bits_per_sample(&self) -> u32 {
        self.bits
    }

    fn tags(&self) -> TrackTags {
        self.tags.clone()
    }

    fn next_block(&mut self, out: &mut Vec<f32>) -> Result<bool, DecodeError> {
        use symphonia::core::errors::Error as SymErr;
        out.clear();
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymErr::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymErr::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    out.extend_from_slice(buf.samples());
                    return Ok(true);
                }
                Err(SymErr::DecodeError(e)) => {
                    // recoverable: skip the bad packet
                    debug!("skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn seek(&mut self, seconds: f64) {
        let _ = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::from(seconds),
                track_id: Some(self.track_id),
            },
        );
        self.decoder.reset();
    }
}

/// Pick a backend from the file extension, the way the sample loader
/// does: dedicated readers for wav and flac, symphonia for the rest.
fn open_decoder(path: &Path) -> Result<Box<dyn Decode>, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "wav" => Ok(Box::new(WavDecoder::open(path)?)),
        "flac" => Ok(Box::new(FlacDecoder::open(path)?)),
        _ => Ok(Box::new(SymphoniaDecoder::open(path)?)),
    }
}

// ---------------------------------------------------------------------
// Worker

pub(crate) struct WorkerState {
    pub shared: Arc<PlayerShared>,
    pub rx: mpsc::Receiver<PlayerCommand>,
    pub handoff: HeapProd<TrackHandoff>,
    pub retire: HeapCons<HeapCons<f32>>,
    pub sample_rate: u32,
}

enum Rs {
    None,
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

const RS_CHUNK: usize = 1024;

/// Stereo converter + resampler from the file rate to the graph rate.
struct Conditioner {
    rs: Rs,
    pending: [Vec<f32>; 2],
    gain: f32,
    dither: bool,
    rng: u32,
}

impl Conditioner {
    fn new(
        native_rate: u32,
        graph_rate: u32,
        quality: u8,
        replay_gain_db: f32,
        dither: bool,
    ) -> Self {
        let rs = if native_rate == graph_rate {
            Rs::None
        } else {
            let ratio = graph_rate as f64 / native_rate as f64;
            let fast = || FastFixedIn::new(ratio, 1.1, PolynomialDegree::Cubic, RS_CHUNK, 2);
            let built = if quality <= 1 {
                let params = SincInterpolationParameters {
                    sinc_len: 128,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 128,
                    window: WindowFunction::BlackmanHarris2,
                };
                SincFixedIn::<f32>::new(ratio, 1.1, params, RS_CHUNK, 2)
                    .map(Rs::Sinc)
                    .or_else(|e| {
                        warn!("sinc resampler init failed ({}), using fast path", e);
                        fast().map(Rs::Fast)
                    })
            } else {
                fast().map(Rs::Fast)
            };
            match built {
                Ok(rs) => rs,
                Err(e) => {
                    // better off-pitch than dead air
                    warn!("resampler init failed ({}), playing at the file rate", e);
                    Rs::None
                }
            }
        };
        Self {
            rs,
            pending: [Vec::new(), Vec::new()],
            gain: if replay_gain_db != 0.0 {
                db2level(replay_gain_db)
            } else {
                1.0
            },
            dither,
            rng: 0x2545_F491,
        }
    }

    #[inline]
    fn noise(&mut self) -> f32 {
        // xorshift32, scaled to one 16-bit LSB of TPDF dither
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let a = (x & 0xFFFF) as f32 / 65536.0;
        let b = ((x >> 16) & 0xFFFF) as f32 / 65536.0;
        (a - b) / 32768.0
    }

    /// Feed one interleaved native-rate block; append interleaved stereo
    /// graph-rate samples to `out`.
    fn push(&mut self, input: &[f32], channels: usize, out: &mut Vec<f32>) {
        // fold the source into stereo and stage per-channel
        for frame in input.chunks(channels.max(1)) {
            let (l, r) = match frame.len() {
                0 => (0.0, 0.0),
                1 => (frame[0], frame[0]),
                _ => (frame[0], frame[1]),
            };
            self.pending[0].push(l);
            self.pending[1].push(r);
        }
        match &mut self.rs {
            Rs::None => {
                for i in 0..self.pending[0].len() {
                    let mut l = self.pending[0][i] * self.gain;
                    let mut r = self.pending[1][i] * self.gain;
                    if self.dither {
                        l += self.noise();
                        r += self.noise();
                    }
                    out.push(l);
                    out.push(r);
                }
                self.pending[0].clear();
                self.pending[1].clear();
            }
            _ => {
                while self.pending[0].len() >= RS_CHUNK {
                    let input: Vec<Vec<f32>> = vec![
                        self.pending[0][..RS_CHUNK].to_vec(),
                        self.pending[1][..RS_CHUNK].to_vec(),
                    ];
                    self.pending[0].drain(..RS_CHUNK);
                    self.pending[1].drain(..RS_CHUNK);
                    let frames = match &mut self.rs {
                        Rs::Fast(r) => r.process(&input, None),
                        Rs::Sinc(r) => r.process(&input, None),
                        Rs::None => unreachable!(),
                    };
                    if let Ok(frames) = frames {
                        for i in 0..frames[0].len() {
                            let mut l = frames[0][i] * self.gain;
                            let mut r = frames[1][i] * self.gain;
                            if self.dither {
                                l += self.noise();
                                r += self.noise();
                            }
                            out.push(l);
                            out.push(r);
                        }
                    }
                }
            }
        }
    }

    /// Flush the resampler tail at end of stream.
    fn finish(&mut self, out: &mut Vec<f32>) {
        if matches!(self.rs, Rs::None) || self.pending[0].is_empty() {
            return;
        }
        let input: Vec<Vec<f32>> = vec![self.pending[0].clone(), self.pending[1].clone()];
        self.pending[0].clear();
        self.pending[1].clear();
        let frames = match &mut self.rs {
            Rs::Fast(r) => r.process_partial(Some(&input), None),
            Rs::Sinc(r) => r.process_partial(Some(&input), None),
            Rs::None => return,
        };
        if let Ok(frames) = frames {
            for i in 0..frames[0].len() {
                out.push(frames[0][i] * self.gain);
                out.push(frames[1][i] * self.gain);
            }
        }
    }
}

struct Worker {
    st: WorkerState,
    prod: Option<HeapProd<f32>>,
}

enum TrackEnd {
    Finished,
    Preempted(PlayerCommand),
}

pub(crate) fn run_worker(st: WorkerState) {
    let mut w = Worker { st, prod: None };
    let mut pending: Option<PlayerCommand> = None;
    loop {
        let cmd = match pending.take() {
            Some(c) => c,
            // an idle worker is a healthy worker: keep petting the
            // watchdog while waiting for something to do
            None => match w.st.rx.recv_timeout(Duration::from_secs(1)) {
                Ok(c) => c,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    w.touch_watchdog();
                    w.dispose_retired();
                    continue;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            },
        };
        w.touch_watchdog();
        w.dispose_retired();
        match cmd {
            PlayerCommand::Shutdown => return,
            PlayerCommand::Eject => w.eject(),
            PlayerCommand::Play {
                path,
                seek_s,
                replay_gain_db,
                flush,
                context,
            } => {
                pending = w.play_list(
                    &[path],
                    seek_s,
                    replay_gain_db,
                    false,
                    flush,
                    context,
                );
            }
            PlayerCommand::PlayMany {
                entries,
                loop_playlist,
                context,
            } => {
                pending = w.play_list(&entries, 0, 0.0, loop_playlist, true, context);
            }
        }
    }
}

impl Worker {
    fn touch_watchdog(&self) {
        self.st.shared.watchdog_timer.store(0, Ordering::Relaxed);
    }

    fn dispose_retired(&mut self) {
        while self.st.retire.try_pop().is_some() {}
    }

    /// Hand a fresh ring to the audio side; the old one becomes the fade
    /// tail over there.
    fn swap_ring(&mut self, context: u32) -> bool {
        let cap = RB_SECONDS * self.st.sample_rate as usize * 2;
        let (prod, cons) = HeapRb::<f32>::new(cap).split();
        let mut handoff = TrackHandoff { cons, context };
        for _ in 0..50 {
            match self.st.handoff.try_push(handoff) {
                Ok(()) => {
                    self.prod = Some(prod);
                    return true;
                }
                Err(h) => {
                    handoff = h;
                    thread::sleep(Duration::from_millis(20));
                }
            }
        }
        warn!("{}: audio side never accepted the new track ring", self.st.shared.name);
        false
    }

    fn eject(&mut self) {
        // swap in an empty ring so the current tail moves to the fade
        // slot and decays (or cuts) out there
        let context = self.st.shared.context();
        self.swap_ring(context);
        self.prod = None;
        self.st.shared.set_play_mode(PlayMode::Stopped);
        self.st.shared.silence.set(0.0);
    }

    fn play_list(
        &mut self,
        entries: &[String],
        seek_s: u32,
        replay_gain_db: f32,
        loop_playlist: bool,
        flush: bool,
        context: u32,
    ) -> Option<PlayerCommand> {
        if flush || self.prod.is_none() {
            if !self.swap_ring(context) {
                self.st.shared.set_play_mode(PlayMode::Stopped);
                self.st.shared.disengage_context();
                return None;
            }
        }
        let mut first = true;
        loop {
            for path in entries {
                let seek = if first { seek_s } else { 0 };
                match self.stream_one(path, seek, replay_gain_db, context) {
                    TrackEnd::Finished => {}
                    TrackEnd::Preempted(cmd) => return Some(cmd),
                }
                first = false;
            }
            if !loop_playlist {
                break;
            }
        }
        // let the tail drain before declaring the player stopped
        if let Some(cmd) = self.drain_ring() {
            return Some(cmd);
        }
        self.st.shared.set_play_mode(PlayMode::Complete);
        self.st.shared.disengage_context();
        self.st.shared.set_play_mode(PlayMode::Stopped);
        None
    }

    fn stream_one(
        &mut self,
        path: &str,
        seek_s: u32,
        replay_gain_db: f32,
        context: u32,
    ) -> TrackEnd {
        let mut dec = match open_decoder(Path::new(path)) {
            Ok(d) => d,
            Err(e) => {
                warn!("{}: cannot play {}: {}", self.st.shared.name, path, e);
                return TrackEnd::Finished;
            }
        };
        info!("{}: playing {}", self.st.shared.name, path);
        if seek_s > 0 {
            dec.seek(seek_s as f64);
        }

        self.publish_tags(dec.tags(), context);

        let dither =
            self.st.shared.dither.load(Ordering::Relaxed) && dec.bits_per_sample() <= 16;
        let mut cond = Conditioner::new(
            dec.sample_rate(),
            self.st.sample_rate,
            self.st.shared.rsqual.load(Ordering::Relaxed),
            replay_gain_db,
            dither,
        );
        let channels = dec.channels();
        let mut native = Vec::with_capacity(BLOCK_FRAMES * channels);
        let mut ready: Vec<f32> = Vec::with_capacity(BLOCK_FRAMES * 4);

        self.st.shared.set_play_mode(PlayMode::Playing);
        loop {
            match dec.next_block(&mut native) {
                Ok(true) => {
                    ready.clear();
                    cond.push(&native, channels, &mut ready);
                    if let Some(cmd) = self.push_all(&ready) {
                        return TrackEnd::Preempted(cmd);
                    }
                }
                Ok(false) => {
                    ready.clear();
                    cond.finish(&mut ready);
                    if let Some(cmd) = self.push_all(&ready) {
                        return TrackEnd::Preempted(cmd);
                    }
                    return TrackEnd::Finished;
                }
                Err(e) => {
                    warn!("{}: decode aborted on {}: {}", self.st.shared.name, path, e);
                    return TrackEnd::Finished;
                }
            }
        }
    }

    fn publish_tags(&self, tags: TrackTags, context: u32) {
        if !tags.any() {
            return;
        }
        let rbdelay_ms = self
            .prod
            .as_ref()
            .map(|p| (p.occupied_len() / 2 * 1000 / self.st.sample_rate as usize) as u32)
            .unwrap_or(0);
        if let Ok(mut slot) = self.st.shared.dynamic_metadata.lock() {
            *slot = Some(DynamicMetadata {
                artist: tags.artist,
                title: tags.title,
                album: tags.album,
                audio_context: context,
                rbdelay_ms,
            });
        }
    }

    /// Push a conditioned block into the ring, sleeping while it is
    /// full. Every pass resets the watchdog: a full ring is a healthy
    /// ring, only a wedged decoder stops resetting it.
    fn push_all(&mut self, data: &[f32]) -> Option<PlayerCommand> {
        let mut peak = 0.0f32;
        for &s in data {
            peak = peak.max(s.abs());
        }
        if !data.is_empty() {
            self.st.shared.silence.set(peak);
        }
        let mut pos = 0;
        while pos < data.len() {
            let prod = self.prod.as_mut()?;
            pos += prod.push_slice(&data[pos..]);
            self.touch_watchdog();
            if pos < data.len() {
                match self.st.rx.try_recv() {
                    Ok(cmd) => return Some(cmd),
                    Err(mpsc::TryRecvError::Empty) => {
                        thread::sleep(Duration::from_millis(20))
                    }
                    Err(mpsc::TryRecvError::Disconnected) => {
                        return Some(PlayerCommand::Shutdown)
                    }
                }
            }
        }
        None
    }

    fn drain_ring(&mut self) -> Option<PlayerCommand> {
        loop {
            let occupied = match self.prod.as_ref() {
                Some(p) => p.occupied_len(),
                None => 0,
            };
            if occupied == 0 {
                return None;
            }
            self.touch_watchdog();
            match self.st.rx.try_recv() {
                Ok(cmd) => return Some(cmd),
                Err(mpsc::TryRecvError::Empty) => thread::sleep(Duration::from_millis(50)),
                Err(mpsc::TryRecvError::Disconnected) => return Some(PlayerCommand::Shutdown),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditioner_stereo_passthrough() {
        let mut c = Conditioner::new(44100, 44100, 9, 0.0, false);
        let mut out = Vec::new();
        c.push(&[0.1, -0.1, 0.2, -0.2], 2, &mut out);
        assert_eq!(out, vec![0.1, -0.1, 0.2, -0.2]);
    }

    #[test]
    fn test_conditioner_mono_fold() {
        let mut c = Conditioner::new(44100, 44100, 9, 0.0, false);
        let mut out = Vec::new();
        c.push(&[0.5, -0.5], 1, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_conditioner_replay_gain() {
        let mut c = Conditioner::new(44100, 44100, 9, -6.0206, false);
        let mut out = Vec::new();
        c.push(&[1.0, 1.0], 2, &mut out);
        assert!((out[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_conditioner_resamples_rate() {
        // 22050 -> 44100 should roughly double the frame count
        let mut c = Conditioner::new(22050, 44100, 9, 0.0, false);
        let mut out = Vec::new();
        let input: Vec<f32> = (0..RS_CHUNK * 2 * 2).map(|i| (i as f32 * 0.01).sin()).collect();
        c.push(&input, 2, &mut out);
        c.finish(&mut out);
        let in_frames = input.len() / 2;
        let out_frames = out.len() / 2;
        assert!(
            (out_frames as f32 / in_frames as f32 - 2.0).abs() < 0.1,
            "ratio {}",
            out_frames as f32 / in_frames as f32
        );
    }

    #[test]
    fn test_dither_stays_within_one_lsb() {
        let mut c = Conditioner::new(44100, 44100, 9, 0.0, true);
        let mut out = Vec::new();
        c.push(&vec![0.0; 2000], 2, &mut out);
        for &s in &out {
            assert!(s.abs() <= 1.0 / 32768.0 + 1e-9);
        }
        // and it is not identically zero
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_wav_decoder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..1000i32 {
            let s = ((i % 100) * 300 - 15000) as i16;
            writer.write_sample(s).unwrap();
            writer.write_sample(-s).unwrap();
        }
        writer.finalize().unwrap();

        let mut dec = open_decoder(&path).unwrap();
        assert_eq!(dec.sample_rate(), 44100);
        assert_eq!(dec.channels(), 2);
        assert_eq!(dec.bits_per_sample(), 16);
        let mut out = Vec::new();
        let mut total = 0;
        while dec.next_block(&mut out).unwrap() {
            total += out.len();
            for &s in &out {
                assert!(s.abs() <= 1.0);
            }
        }
        assert_eq!(total, 2000);
    }
}
