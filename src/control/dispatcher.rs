// Répartiteur de commandes - boucle de contrôle sur stdin/stdout
//
// The controlling application drives the whole engine through the
// record protocol. This loop owns stdin and stdout: it mutates the
// parameter block, steers the players and the port wiring, and answers
// `requestlevels` with the telemetry block. Everything here may block
// or allocate; nothing here runs on the audio thread.

use std::io::{BufRead, Write};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use log::{error, info, warn};

use crate::audio::db::level2db;
use crate::audio::ports::PortPatch;
use crate::control::meta;
use crate::control::parser::{RecordParser, parse_length_prefixed};
use crate::control::state::ControlBlock;
use crate::midi::MidiQueue;
use crate::mic::{MicShared, set_roles};
use crate::player::channel::PlayerControl;

/// The 31 values carried by one `mixstats` record, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct MixStats {
    pub volume: i32,
    pub volume2: i32,
    pub crossfade: i32,
    pub jinglesvolume: i32,
    pub jinglesvolume2: i32,
    pub interludevol: i32,
    pub mixbackvol: i32,
    pub jingles_playing: bool,
    pub left_stream: bool,
    pub left_audio: bool,
    pub right_stream: bool,
    pub right_audio: bool,
    pub stream_monitor: bool,
    pub left_pause: bool,
    pub right_pause: bool,
    pub flush_left: bool,
    pub flush_right: bool,
    pub flush_jingles: bool,
    pub flush_interlude: bool,
    pub simple_mixer: bool,
    pub eot_alarm_set: bool,
    pub mixermode: u8,
    pub fadeout_f: bool,
    pub main_play: bool,
    pub left_speed: f32,
    pub right_speed: f32,
    pub speed_variance: bool,
    pub dj_audio_level: f32,
    pub crosspattern: i32,
    pub use_dsp: bool,
    pub twodblimit: bool,
}

fn digit(b: u8) -> Option<bool> {
    match b {
        b'0' => Some(false),
        b'1' => Some(true),
        _ => None,
    }
}

impl MixStats {
    /// Parse the colon-framed value. The field count and the digit-mask
    /// widths are fixed; anything else is a protocol violation.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 25 || !parts[0].is_empty() || !parts[24].is_empty() {
            return None;
        }
        let f = &parts[1..24];
        let int = |i: usize| f[i].parse::<i32>().ok();
        let float = |i: usize| f[i].parse::<f32>().ok();
        let mutes = f[8].as_bytes();
        let pauses = f[9].as_bytes();
        let flushes = f[10].as_bytes();
        if mutes.len() != 5 || pauses.len() != 2 || flushes.len() != 4 {
            return None;
        }
        Some(MixStats {
            volume: int(0)?,
            volume2: int(1)?,
            crossfade: int(2)?,
            jinglesvolume: int(3)?,
            jinglesvolume2: int(4)?,
            interludevol: int(5)?,
            mixbackvol: int(6)?,
            jingles_playing: int(7)? != 0,
            left_stream: digit(mutes[0])?,
            left_audio: digit(mutes[1])?,
            right_stream: digit(mutes[2])?,
            right_audio: digit(mutes[3])?,
            stream_monitor: digit(mutes[4])?,
            left_pause: digit(pauses[0])?,
            right_pause: digit(pauses[1])?,
            flush_left: digit(flushes[0])?,
            flush_right: digit(flushes[1])?,
            flush_jingles: digit(flushes[2])?,
            flush_interlude: digit(flushes[3])?,
            simple_mixer: int(11)? != 0,
            eot_alarm_set: int(12)? != 0,
            mixermode: int(13)? as u8,
            fadeout_f: int(14)? != 0,
            main_play: int(15)? != 0,
            left_speed: float(16)?,
            right_speed: float(17)?,
            speed_variance: int(18)? != 0,
            dj_audio_level: float(19)?,
            crosspattern: int(20)?,
            use_dsp: int(21)? != 0,
            twodblimit: int(22)? != 0,
        })
    }
}

/// Telemetry reply values, gathered at the instant `requestlevels` is
/// serviced. Field order is the wire order.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub str_l_peak: i32,
    pub str_r_peak: i32,
    pub str_l_rms: i32,
    pub str_r_rms: i32,
    pub jingles_playing: u32,
    pub left_elapsed: u32,
    pub right_elapsed: u32,
    pub left_playing: u32,
    pub right_playing: u32,
    pub interlude_playing: u32,
    pub left_signal: u32,
    pub right_signal: u32,
    pub left_cid: u32,
    pub right_cid: u32,
    pub jingles_cid: u32,
    pub interlude_cid: u32,
    pub left_audio_runout: u32,
    pub right_audio_runout: u32,
    pub left_additional_metadata: u32,
    pub right_additional_metadata: u32,
    pub midi: String,
    pub silence_l: f32,
    pub silence_r: f32,
}

/// Map a linear peak to the protocol's integer dB scale.
pub fn peak_to_log(peak: f32) -> i32 {
    if peak <= 0.0 {
        return -127;
    }
    if peak >= 1.0 {
        return 0;
    }
    level2db(peak) as i32
}

/// Integer RMS dB from a mean-square tally, 120 for a blank signal.
pub fn rms_to_log(meansqrd: f32) -> i32 {
    if meansqrd > 0.0 {
        level2db(meansqrd.sqrt()).abs() as i32
    } else {
        120
    }
}

/// Emit one telemetry block, terminated by the literal `end`.
pub fn write_telemetry<W: Write>(out: &mut W, t: &TelemetrySnapshot) -> std::io::Result<()> {
    write!(
        out,
        "str_l_peak={}\nstr_r_peak={}\n\
         str_l_rms={}\nstr_r_rms={}\n\
         jingles_playing={}\n\
         left_elapsed={}\n\
         right_elapsed={}\n\
         left_playing={}\n\
         right_playing={}\n\
         interlude_playing={}\n\
         left_signal={}\n\
         right_signal={}\n\
         left_cid={}\n\
         right_cid={}\n\
         jingles_cid={}\n\
         interlude_cid={}\n\
         left_audio_runout={}\n\
         right_audio_runout={}\n\
         left_additional_metadata={}\n\
         right_additional_metadata={}\n\
         midi={}\n\
         silence_l={:.6}\n\
         silence_r={:.6}\n\
         end\n",
        t.str_l_peak,
        t.str_r_peak,
        t.str_l_rms,
        t.str_r_rms,
        t.jingles_playing,
        t.left_elapsed,
        t.right_elapsed,
        t.left_playing,
        t.right_playing,
        t.interlude_playing,
        t.left_signal,
        t.right_signal,
        t.left_cid,
        t.right_cid,
        t.jingles_cid,
        t.interlude_cid,
        t.left_audio_runout,
        t.right_audio_runout,
        t.left_additional_metadata,
        t.right_additional_metadata,
        t.midi,
        t.silence_l,
        t.silence_r,
    )
}

pub struct Players {
    pub left: PlayerControl,
    pub right: PlayerControl,
    pub jingles: PlayerControl,
    pub interlude: PlayerControl,
}

pub struct Dispatcher<'c> {
    control: Arc<ControlBlock>,
    players: Players,
    mics: Vec<Arc<MicShared>>,
    midi_queue: Arc<Mutex<MidiQueue>>,
    jack: Option<(&'c jack::Client, PortPatch)>,
    parser: RecordParser,
    synced: bool,
}

impl<'c> Dispatcher<'c> {
    pub fn new(
        control: Arc<ControlBlock>,
        players: Players,
        mics: Vec<Arc<MicShared>>,
        midi_queue: Arc<Mutex<MidiQueue>>,
        jack: Option<(&'c jack::Client, PortPatch)>,
    ) -> Self {
        Self {
            control,
            players,
            mics,
            midi_queue,
            jack,
            parser: RecordParser::new(),
            synced: false,
        }
    }

    /// Run the control loop until end of input, a protocol violation or
    /// a shutdown flag. Stops the player workers before returning.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) {
        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("control input error: {}", e);
                    break;
                }
            };
            match self.parser.feed_line(&line) {
                Ok(None) => {}
                Ok(Some(action)) => {
                    if self.control.should_exit() {
                        break;
                    }
                    self.handle_action(&action, out);
                    if self.control.should_exit() {
                        break;
                    }
                }
                Err(e) => {
                    error!("unparseable control line: {:?}", e.line);
                    break;
                }
            }
        }
        self.control.request_shutdown();
        self.players.left.shutdown();
        self.players.right.shutdown();
        self.players.jingles.shutdown();
        self.players.interlude.shutdown();
    }

    fn handle_action<W: Write>(&mut self, action: &str, out: &mut W) {
        if action == "sync" {
            let _ = writeln!(out, "IDJC: sync reply");
            let _ = out.flush();
            self.synced = true;
            return;
        }
        if !self.synced {
            return;
        }
        match action {
            "mixstats" => self.handle_mixstats(),
            "normalizerstats" => self.handle_normalizerstats(),
            "mic_control" => {
                let index: usize = self.parser.get("INDX").parse().unwrap_or(0);
                if let Some(mic) = self.mics.get(index) {
                    mic.apply_params(self.parser.get("AGCP"));
                }
            }
            "new_channel_mode_string" => set_roles(&self.mics, self.parser.get("CMOD")),
            "headroom" => {
                if let Ok(db) = self.parser.get("HEAD").parse::<f32>() {
                    self.control.headroom_db.set(db);
                }
            }
            "anymic" => {
                let on = self.parser.get("FLAG").starts_with('1');
                self.control.mic_on.store(on, Ordering::Relaxed);
            }
            "fademode_left" => {
                let mode = self.parser.get("FADE").parse().unwrap_or(0);
                self.players.left.set_fade_mode(mode);
            }
            "fademode_right" => {
                let mode = self.parser.get("FADE").parse().unwrap_or(0);
                self.players.right.set_fade_mode(mode);
            }
            "playleft" => self.handle_play(out, false, false),
            "playright" => self.handle_play(out, true, false),
            "playnoflushleft" => self.handle_play(out, false, true),
            "playnoflushright" => self.handle_play(out, true, true),
            "playmanyjingles" => {
                let vol2 = self.parser.get("VOL2").starts_with('1');
                self.control.use_jingles_vol_2.store(vol2, Ordering::Relaxed);
                self.handle_playmany(out, false);
            }
            "playmanyinterlude" => self.handle_playmany(out, true),
            "stopleft" => self.players.left.eject(),
            "stopright" => self.players.right.eject(),
            "stopjingles" => self.players.jingles.eject(),
            "stopinterlude" => self.players.interlude.eject(),
            "dither" => self.set_dither(true),
            "dontdither" => self.set_dither(false),
            "resamplequality" => {
                let q = self
                    .parser
                    .get("RSQT")
                    .bytes()
                    .next()
                    .map(|b| b.saturating_sub(b'0'))
                    .unwrap_or(4);
                self.players.left.set_resample_quality(q);
                self.players.right.set_resample_quality(q);
                self.players.jingles.set_resample_quality(q);
                self.players.interlude.set_resample_quality(q);
            }
            "ogginforequest" => meta::handle_info_request(out, self.parser.get("OGGP")),
            "sndfileinforequest" => meta::handle_info_request(out, self.parser.get("SNDP")),
            "avformatinforequest" => meta::handle_info_request(out, self.parser.get("AVFP")),
            "speexreadtagrequest" | "speexwritetagrequest" => {
                warn!("speex tag support not built in");
            }
            "mp3status" => {
                let _ = writeln!(out, "IDJC: mp3=1");
                let _ = out.flush();
            }
            "remakemic" => {
                let index: usize = self.parser.get("INDX").parse().unwrap_or(0);
                let target = self.parser.get("MIC").to_string();
                if let Some((client, patch)) = &self.jack {
                    patch.remake_mic(client, index, &target);
                }
            }
            "remakeaudl" => self.remake(|c, p, t| p.remake_audio(c, false, t), "AUDL"),
            "remakeaudr" => self.remake(|c, p, t| p.remake_audio(c, true, t), "AUDR"),
            "remakestrl" => self.remake(|c, p, t| p.remake_stream(c, false, t), "STRL"),
            "remakestrr" => self.remake(|c, p, t| p.remake_stream(c, true, t), "STRR"),
            "remakemidi" => self.remake(|c, p, t| p.remake_midi(c, t), "MIDI"),
            "remakedol" => self.remake(|c, p, t| p.remake_dsp_out(c, false, t), "DOL"),
            "remakedor" => self.remake(|c, p, t| p.remake_dsp_out(c, true, t), "DOR"),
            "remakedil" => self.remake(|c, p, t| p.remake_dsp_in(c, false, t), "DIL"),
            "remakedir" => self.remake(|c, p, t| p.remake_dsp_in(c, true, t), "DIR"),
            "serverbind" => {
                if let Some((client, patch)) = &self.jack {
                    patch.serverbind(client);
                }
            }
            "jackportread" => {
                let port = self.parser.get("JPRT").to_string();
                let filter = self.parser.get("JFIL").to_string();
                if let Some((client, patch)) = &self.jack {
                    let report = patch.port_report(client, &port, &filter);
                    let _ = out.write_all(report.as_bytes());
                    let _ = out.flush();
                }
            }
            "jackconnect" | "jackdisconnect" => {
                let port = self.parser.get("JPRT").to_string();
                let port2 = self.parser.get("JPT2").to_string();
                if let Some((client, patch)) = &self.jack {
                    patch.patch_pair(client, &port, &port2, action == "jackconnect");
                }
            }
            "requestlevels" => self.handle_requestlevels(out),
            other => info!("unhandled action: {}", other),
        }
    }

    fn remake<F>(&self, f: F, key: &str)
    where
        F: Fn(&jack::Client, &PortPatch, &str),
    {
        if let Some((client, patch)) = &self.jack {
            f(client, patch, self.parser.get(key));
        }
    }

    fn set_dither(&self, dither: bool) {
        self.players.left.set_dither(dither);
        self.players.right.set_dither(dither);
        self.players.jingles.set_dither(dither);
        self.players.interlude.set_dither(dither);
    }

    fn handle_play<W: Write>(&mut self, out: &mut W, right: bool, noflush: bool) {
        let path = self.parser.get("PLRP").to_string();
        let seek: u32 = self.parser.get("SEEK").parse().unwrap_or(0);
        let size: u32 = self.parser.get("SIZE").parse().unwrap_or(0);
        let rg: f32 = self.parser.get("RGDB").parse().unwrap_or(0.0);
        let player = if right {
            &self.players.right
        } else {
            &self.players.left
        };
        let context = if noflush {
            player.play_noflush(&path, seek, size, rg)
        } else {
            player.play(&path, seek, size, rg)
        };
        let _ = writeln!(out, "context_id={}", context);
        let _ = out.flush();
    }

    fn handle_playmany<W: Write>(&mut self, out: &mut W, interlude: bool) {
        let entries = parse_length_prefixed(self.parser.get("PLPL"));
        let loop_playlist = self.parser.get("LOOP").starts_with('1');
        let player = if interlude {
            &self.players.interlude
        } else {
            &self.players.jingles
        };
        let context = player.playmany(entries, loop_playlist);
        let _ = writeln!(out, "context_id={}", context);
        let _ = out.flush();
    }

    fn handle_mixstats(&mut self) {
        let Some(ms) = MixStats::parse(self.parser.get("MIXR")) else {
            error!("mixer got bad mixer string");
            self.control.request_shutdown();
            return;
        };
        let c = &self.control;
        c.volume.store(ms.volume, Ordering::Relaxed);
        c.volume2.store(ms.volume2, Ordering::Relaxed);
        c.crossfade.store(ms.crossfade, Ordering::Relaxed);
        c.jinglesvolume.store(ms.jinglesvolume, Ordering::Relaxed);
        c.jinglesvolume2.store(ms.jinglesvolume2, Ordering::Relaxed);
        c.interludevol.store(ms.interludevol, Ordering::Relaxed);
        c.mixbackvol.store(ms.mixbackvol, Ordering::Relaxed);
        c.jingles_playing.store(ms.jingles_playing, Ordering::Relaxed);
        c.left_stream.store(ms.left_stream, Ordering::Relaxed);
        c.left_audio.store(ms.left_audio, Ordering::Relaxed);
        c.right_stream.store(ms.right_stream, Ordering::Relaxed);
        c.right_audio.store(ms.right_audio, Ordering::Relaxed);
        c.stream_monitor.store(ms.stream_monitor, Ordering::Relaxed);
        c.simple_mixer.store(ms.simple_mixer, Ordering::Relaxed);
        c.mixermode.store(ms.mixermode, Ordering::Relaxed);
        c.main_play.store(ms.main_play, Ordering::Relaxed);
        c.speed_variance.store(ms.speed_variance, Ordering::Relaxed);
        c.dj_audio_level.set(ms.dj_audio_level);
        c.crosspattern.store(ms.crosspattern, Ordering::Relaxed);
        c.using_dsp.store(ms.use_dsp, Ordering::Relaxed);
        c.twodblimit.store(ms.twodblimit, Ordering::Relaxed);
        if ms.eot_alarm_set {
            c.eot_alarm_armed.store(true, Ordering::Relaxed);
        }

        for p in [
            &self.players.left,
            &self.players.right,
            &self.players.jingles,
            &self.players.interlude,
        ] {
            p.shared.fadeout_f.store(ms.fadeout_f, Ordering::Relaxed);
        }
        self.players.left.shared.newpbspeed.set(ms.left_speed);
        self.players.right.shared.newpbspeed.set(ms.right_speed);

        if ms.left_pause != self.players.left.is_paused() {
            self.players.left.set_pause(ms.left_pause);
        }
        if ms.right_pause != self.players.right.is_paused() {
            self.players.right.set_pause(ms.right_pause);
        }
    }

    fn handle_normalizerstats(&mut self) {
        let s = self.parser.get("NORM");
        let parts: Vec<&str> = s.split(':').collect();
        let parsed = (|| -> Option<()> {
            if parts.len() != 7 || !parts[0].is_empty() || !parts[6].is_empty() {
                return None;
            }
            let maxlevel: f32 = parts[1].parse().ok()?;
            let ceiling: f32 = parts[2].parse().ok()?;
            let rise: f32 = parts[3].parse().ok()?;
            let fall: f32 = parts[4].parse().ok()?;
            let active: i32 = parts[5].parse().ok()?;
            if rise <= 0.0 || fall <= 0.0 {
                return None;
            }
            self.control.norm_maxlevel.set(maxlevel);
            self.control.norm_ceiling.set(ceiling);
            self.control.norm_rise_s.set(rise);
            self.control.norm_fall_s.set(fall);
            self.control.norm_active.store(active != 0, Ordering::Relaxed);
            self.control
                .normalizer_pending
                .store(true, Ordering::Relaxed);
            Some(())
        })();
        if parsed.is_none() {
            error!("mixer got bad normalizer string");
            self.control.request_shutdown();
        }
    }

    fn handle_requestlevels<W: Write>(&mut self, out: &mut W) {
        // the controlling application has proven it is alive
        self.control.timeout.store(0, Ordering::Relaxed);

        let midi = self
            .midi_queue
            .lock()
            .map(|mut q| q.drain())
            .unwrap_or_default();

        let c = &self.control;
        let left = &self.players.left.shared;
        let right = &self.players.right.shared;
        let jingles = &self.players.jingles.shared;
        let interlude = &self.players.interlude.shared;
        let left_peak = c.left_peak.get();
        let right_peak = c.right_peak.get();

        let playing = |s: &crate::player::channel::PlayerShared| {
            (s.have_data_f.load(Ordering::Relaxed) as u32) | (s.context() & 1)
        };
        let snap = TelemetrySnapshot {
            str_l_peak: peak_to_log(c.str_peak_l.get()),
            str_r_peak: peak_to_log(c.str_peak_r.get()),
            str_l_rms: rms_to_log(c.str_meansqrd_l.get()),
            str_r_rms: rms_to_log(c.str_meansqrd_r.get()),
            jingles_playing: (c.jingles_audio.load(Ordering::Relaxed) as u32)
                | (jingles.context() & 1),
            left_elapsed: left.play_progress_ms.load(Ordering::Relaxed) / 1000,
            right_elapsed: right.play_progress_ms.load(Ordering::Relaxed) / 1000,
            left_playing: playing(left),
            right_playing: playing(right),
            interlude_playing: playing(interlude),
            left_signal: (left_peak > 0.001
                || left_peak < 0.0
                || left.pause.load(Ordering::Relaxed)) as u32,
            right_signal: (right_peak > 0.001
                || right_peak < 0.0
                || right.pause.load(Ordering::Relaxed)) as u32,
            left_cid: left.context(),
            right_cid: right.context(),
            jingles_cid: jingles.context(),
            interlude_cid: interlude.context(),
            left_audio_runout: (c.left_runout.load(Ordering::Relaxed)
                && left.context() & 1 == 0) as u32,
            right_audio_runout: (c.right_runout.load(Ordering::Relaxed)
                && right.context() & 1 == 0) as u32,
            left_additional_metadata: self.players.left.has_metadata() as u32,
            right_additional_metadata: self.players.right.has_metadata() as u32,
            midi,
            silence_l: left.silence.get(),
            silence_r: right.silence.get(),
        };
        if write_telemetry(out, &snap).is_err() {
            self.control.request_shutdown();
            return;
        }

        // accumulators restart now; the kernel applies this next block
        self.control.reset_vu.store(true, Ordering::Relaxed);

        for player in [&self.players.left, &self.players.right] {
            if let Some(md) = player.take_metadata() {
                info!("new dynamic metadata from {}", player.shared.name);
                let _ = write!(
                    out,
                    "new_metadata=d{}:{}d{}:{}d{}:{}d9:{:09}d9:{:09}x\n",
                    md.artist.len(),
                    md.artist,
                    md.title.len(),
                    md.title,
                    md.album.len(),
                    md.album,
                    md.audio_context,
                    md.rbdelay_ms,
                );
            }
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_MIXSTATS: &str =
        ":000:000:050:000:000:127:060:0:11110:00:0000:0:0:0:0:0:0.0:0.0:0:0.0:0:0:0:";

    #[test]
    fn test_mixstats_parses_the_startup_record() {
        let ms = MixStats::parse(S1_MIXSTATS).unwrap();
        assert_eq!(ms.volume, 0);
        assert_eq!(ms.crossfade, 50);
        assert_eq!(ms.interludevol, 127);
        assert_eq!(ms.mixbackvol, 60);
        assert!(ms.left_stream && ms.left_audio && ms.right_stream && ms.right_audio);
        assert!(!ms.stream_monitor);
        assert!(!ms.left_pause && !ms.right_pause);
        assert!(!ms.simple_mixer && !ms.eot_alarm_set);
        assert_eq!(ms.mixermode, 0);
        assert_eq!(ms.left_speed, 0.0);
        assert_eq!(ms.crosspattern, 0);
    }

    #[test]
    fn test_mixstats_rejects_wrong_field_count() {
        assert!(MixStats::parse(":000:000:").is_none());
        assert!(MixStats::parse("").is_none());
        // truncated mute mask
        let bad = S1_MIXSTATS.replace(":11110:", ":1110:");
        assert!(MixStats::parse(&bad).is_none());
    }

    #[test]
    fn test_mixstats_rejects_junk_digits() {
        let bad = S1_MIXSTATS.replace(":11110:", ":11x10:");
        assert!(MixStats::parse(&bad).is_none());
        let bad = S1_MIXSTATS.replace(":060:", ":abc:");
        assert!(MixStats::parse(&bad).is_none());
    }

    #[test]
    fn test_peak_to_log_bounds() {
        assert_eq!(peak_to_log(0.0), -127);
        assert_eq!(peak_to_log(-1.0), -127);
        assert_eq!(peak_to_log(1.5), 0);
        let mid = peak_to_log(0.1);
        assert!(mid <= -19 && mid >= -21, "0.1 mapped to {}", mid);
    }

    #[test]
    fn test_rms_to_log_blank_signal() {
        assert_eq!(rms_to_log(0.0), 120);
        // -20 dB sine: mean square of a*sin is a^2/2
        let a = 0.1f32;
        let db = rms_to_log(a * a / 2.0);
        assert!((db - 23).abs() <= 1, "rms db {}", db);
    }

    #[test]
    fn test_telemetry_block_fields_and_terminator() {
        let mut out = Vec::new();
        let snap = TelemetrySnapshot {
            str_l_peak: -127,
            str_r_peak: -127,
            str_l_rms: 120,
            str_r_rms: 120,
            midi: "c2.7:40".into(),
            ..Default::default()
        };
        write_telemetry(&mut out, &snap).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = [
            "str_l_peak", "str_r_peak", "str_l_rms", "str_r_rms", "jingles_playing",
            "left_elapsed", "right_elapsed", "left_playing", "right_playing",
            "interlude_playing", "left_signal", "right_signal", "left_cid", "right_cid",
            "jingles_cid", "interlude_cid", "left_audio_runout", "right_audio_runout",
            "left_additional_metadata", "right_additional_metadata", "midi", "silence_l",
            "silence_r",
        ];
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), expected.len() + 1);
        for (line, field) in lines.iter().zip(expected.iter()) {
            assert!(
                line.starts_with(&format!("{}=", field)),
                "expected {} got {}",
                field,
                line
            );
        }
        assert_eq!(*lines.last().unwrap(), "end");
        assert!(text.contains("midi=c2.7:40\n"));
    }
}
