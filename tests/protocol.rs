// Integration test: control protocol round trips
//
// Drives a dispatcher with scripted stdin content and checks the
// replies on stdout, without an audio server (the port actions are
// disabled in that configuration).

use std::io::Cursor;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use myradio_mixer::control::dispatcher::{Dispatcher, Players};
use myradio_mixer::control::state::ControlBlock;
use myradio_mixer::midi::MidiQueue;
use myradio_mixer::player::create_player;

const S1_MIXSTATS: &str =
    ":000:000:050:000:000:127:060:0:11110:00:0000:0:0:0:0:0:0.0:0.0:0:0.0:0:0:0:";

struct Rig {
    control: Arc<ControlBlock>,
    midi_queue: Arc<Mutex<MidiQueue>>,
}

fn run_script(script: &str) -> (Rig, String) {
    let control = Arc::new(ControlBlock::new());
    let midi_queue = Arc::new(Mutex::new(MidiQueue::new()));
    let (left, _la) = create_player("leftplayer", 44100).unwrap();
    let (right, _ra) = create_player("rightplayer", 44100).unwrap();
    let (jingles, _ja) = create_player("jinglesplayer", 44100).unwrap();
    let (interlude, _ia) = create_player("interludeplayer", 44100).unwrap();
    let players = Players {
        left,
        right,
        jingles,
        interlude,
    };
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&control),
        players,
        Vec::new(),
        Arc::clone(&midi_queue),
        None,
    );
    let mut out = Vec::new();
    dispatcher.run(Cursor::new(script.as_bytes().to_vec()), &mut out);
    (
        Rig {
            control,
            midi_queue,
        },
        String::from_utf8(out).unwrap(),
    )
}

#[test]
fn test_sync_reply_and_gating() {
    // commands before sync are ignored: no telemetry block emitted
    let (_rig, out) = run_script("ACTN=requestlevels\nACTN=sync\n");
    assert_eq!(out, "IDJC: sync reply\n");
}

#[test]
fn test_silent_startup_telemetry() {
    let script = format!(
        "ACTN=sync\nMIXR={}\nACTN=mixstats\nACTN=requestlevels\n",
        S1_MIXSTATS
    );
    let (_rig, out) = run_script(&script);
    assert!(out.starts_with("IDJC: sync reply\n"));
    assert!(out.contains("str_l_peak=-127\n"));
    assert!(out.contains("str_r_peak=-127\n"));
    assert!(out.contains("str_l_rms=120\n"));
    assert!(out.contains("str_r_rms=120\n"));
    // exactly one telemetry block, terminated by `end`
    assert_eq!(out.matches("\nend\n").count(), 1);
    assert!(out.trim_end().ends_with("end"));
}

#[test]
fn test_mixstats_updates_targets() {
    let mixr = ":064:032:075:010:011:012:013:1:10101:01:0000:0:1:2:1:1:1.5:0.5:1:-6.0:2:1:1:";
    let script = format!("ACTN=sync\nMIXR={}\nACTN=mixstats\n", mixr);
    let (rig, _out) = run_script(&script);
    let c = &rig.control;
    assert_eq!(c.volume.load(Ordering::Relaxed), 64);
    assert_eq!(c.volume2.load(Ordering::Relaxed), 32);
    assert_eq!(c.crossfade.load(Ordering::Relaxed), 75);
    assert!(c.jingles_playing.load(Ordering::Relaxed));
    assert!(c.left_stream.load(Ordering::Relaxed));
    assert!(!c.left_audio.load(Ordering::Relaxed));
    assert!(c.right_stream.load(Ordering::Relaxed));
    assert!(!c.right_audio.load(Ordering::Relaxed));
    assert!(c.stream_monitor.load(Ordering::Relaxed));
    assert!(c.eot_alarm_armed.load(Ordering::Relaxed));
    assert_eq!(c.mixermode.load(Ordering::Relaxed), 2);
    assert!(c.main_play.load(Ordering::Relaxed));
    assert!(c.speed_variance.load(Ordering::Relaxed));
    assert_eq!(c.dj_audio_level.get(), -6.0);
    assert_eq!(c.crosspattern.load(Ordering::Relaxed), 2);
    assert!(c.using_dsp.load(Ordering::Relaxed));
    assert!(c.twodblimit.load(Ordering::Relaxed));
}

#[test]
fn test_bad_mixstats_aborts_the_loop() {
    let script = "ACTN=sync\nMIXR=:garbage:\nACTN=mixstats\nACTN=requestlevels\n";
    let (rig, out) = run_script(script);
    assert!(rig.control.shutdown.load(Ordering::Relaxed));
    // the loop stopped before requestlevels: no telemetry block
    assert!(!out.contains("end\n"));
}

#[test]
fn test_bad_normalizer_aborts_the_loop() {
    let script = "ACTN=sync\nNORM=:nonsense:\nACTN=normalizerstats\n";
    let (rig, _out) = run_script(script);
    assert!(rig.control.shutdown.load(Ordering::Relaxed));
}

#[test]
fn test_normalizerstats_queues_a_swap() {
    let script = "ACTN=sync\nNORM=:-12.0:2.0:3.5:4.5:1:\nACTN=normalizerstats\n";
    let (rig, _out) = run_script(script);
    let c = &rig.control;
    assert!(c.normalizer_pending.load(Ordering::Relaxed));
    assert_eq!(c.norm_maxlevel.get(), -12.0);
    assert_eq!(c.norm_ceiling.get(), 2.0);
    assert_eq!(c.norm_rise_s.get(), 3.5);
    assert_eq!(c.norm_fall_s.get(), 4.5);
    assert!(c.norm_active.load(Ordering::Relaxed));
}

#[test]
fn test_playleft_reports_a_fresh_context_id() {
    let script = "ACTN=sync\nPLRP=/no/such/file.ogg\nSEEK=0\nSIZE=180\nRGDB=0.0\nACTN=playleft\n";
    let (_rig, out) = run_script(script);
    assert!(out.contains("context_id=1\n"), "got: {}", out);
}

#[test]
fn test_midi_passthrough_in_telemetry() {
    let control = Arc::new(ControlBlock::new());
    let midi_queue = Arc::new(Mutex::new(MidiQueue::new()));
    // a control change arrives between two dispatcher records
    midi_queue.lock().unwrap().push_event(&[0xB2, 0x07, 0x40]);
    let (left, _la) = create_player("leftplayer", 44100).unwrap();
    let (right, _ra) = create_player("rightplayer", 44100).unwrap();
    let (jingles, _ja) = create_player("jinglesplayer", 44100).unwrap();
    let (interlude, _ia) = create_player("interludeplayer", 44100).unwrap();
    let players = Players {
        left,
        right,
        jingles,
        interlude,
    };
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&control),
        players,
        Vec::new(),
        Arc::clone(&midi_queue),
        None,
    );
    let mut out = Vec::new();
    dispatcher.run(
        Cursor::new(b"ACTN=sync\nACTN=requestlevels\n".to_vec()),
        &mut out,
    );
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("midi=c2.7:40\n"), "got: {}", text);
    // the queue was flushed by the read
    assert!(midi_queue.lock().unwrap().is_empty());
}

#[test]
fn test_requestlevels_resets_liveness_and_vu() {
    let (rig, _out) = run_script("ACTN=sync\nACTN=requestlevels\n");
    assert_eq!(rig.control.timeout.load(Ordering::Relaxed), 0);
    assert!(rig.control.reset_vu.load(Ordering::Relaxed));
    let _ = &rig.midi_queue;
}

#[test]
fn test_headroom_and_anymic_actions() {
    let script = "ACTN=sync\nHEAD=4.5\nACTN=headroom\nFLAG=1\nACTN=anymic\n";
    let (rig, _out) = run_script(script);
    assert_eq!(rig.control.headroom_db.get(), 4.5);
    assert!(rig.control.mic_on.load(Ordering::Relaxed));
}

#[test]
fn test_mp3status_reply() {
    let (_rig, out) = run_script("ACTN=sync\nACTN=mp3status\n");
    assert!(out.contains("IDJC: mp3=1\n"));
}

#[test]
fn test_eof_requests_shutdown() {
    let (rig, _out) = run_script("ACTN=sync\n");
    assert!(rig.control.shutdown.load(Ordering::Relaxed));
}
