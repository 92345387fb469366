// myradio_mixer - point d'entrée
//
// Startup order matters: environment, signal handler, JACK client and
// ports, players and mics, then activation. The sample-rate line on
// stdout tells the controlling application the engine is up; after
// that the dispatcher owns the main thread until shutdown.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use log::{error, info};
use simplelog::{LevelFilter, WriteLogger};

use myradio_mixer::audio::client::{MixerNotifications, MixerProcess};
use myradio_mixer::audio::db;
use myradio_mixer::audio::engine::MixKernel;
use myradio_mixer::audio::ports::{PortPatch, register_ports};
use myradio_mixer::config::Config;
use myradio_mixer::control::{ControlBlock, Dispatcher, Players};
use myradio_mixer::mic::create_mics;
use myradio_mixer::midi::MidiQueue;
use myradio_mixer::player::create_player;
use myradio_mixer::watchdog;

fn main() {
    // stdout carries the control protocol; all logging goes to stderr
    let _ = WriteLogger::init(
        LevelFilter::Info,
        simplelog::Config::default(),
        io::stderr(),
    );
    watchdog::install_segv_handler();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("configuration: {}", e);
            std::process::exit(1);
        }
    };
    cfg.export_server_name();
    db::init_tables();

    let (client, _status) =
        match jack::Client::new(&cfg.client_id, jack::ClientOptions::USE_EXACT_NAME) {
            Ok(pair) => pair,
            Err(e) => {
                println!("IDJC: Error");
                let _ = io::stdout().flush();
                error!("audio server client failed to open: {}", e);
                std::process::exit(1);
            }
        };
    let sample_rate = client.sample_rate() as u32;

    let ports = match register_ports(&client, cfg.mic_qty) {
        Ok(p) => p,
        Err(e) => {
            error!("port registration failed: {}", e);
            std::process::exit(1);
        }
    };
    let mut patch = PortPatch::new(&ports, &cfg.sc_client_id);

    let control = Arc::new(ControlBlock::new());
    let midi_queue = Arc::new(Mutex::new(MidiQueue::new()));

    let player = |name| match create_player(name, sample_rate) {
        Ok(pair) => pair,
        Err(e) => {
            error!("failed to create {} module: {}", name, e);
            std::process::exit(1);
        }
    };
    let (left, left_audio) = player("leftplayer");
    let (right, right_audio) = player("rightplayer");
    let (jingles, jingles_audio) = player("jinglesplayer");
    let (interlude, interlude_audio) = player("interludeplayer");
    let (mic_shareds, mic_channels) = create_mics(cfg.mic_qty, sample_rate);

    let kernel = MixKernel::new(
        Arc::clone(&control),
        left_audio,
        right_audio,
        jingles_audio,
        interlude_audio,
        mic_channels,
        sample_rate,
    );
    let process = MixerProcess::new(kernel, ports, Arc::clone(&midi_queue));
    let notifications = MixerNotifications::new(Arc::clone(&control));

    let active = match client.activate_async(notifications, process) {
        Ok(a) => a,
        Err(e) => {
            error!("failed to activate client: {}", e);
            std::process::exit(1);
        }
    };

    // the controlling application waits on this line to avoid racing
    // the streamer
    println!("IDJC: Sample rate {}", sample_rate);
    let _ = io::stdout().flush();

    patch.capture_defaults(active.as_client());

    let watchdog_handle = match watchdog::spawn(
        vec![
            Arc::clone(&left.shared),
            Arc::clone(&right.shared),
            Arc::clone(&jingles.shared),
            Arc::clone(&interlude.shared),
        ],
        Arc::clone(&control),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start the watchdog: {}", e);
            std::process::exit(1);
        }
    };

    let players = Players {
        left,
        right,
        jingles,
        interlude,
    };
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&control),
        players,
        mic_shareds,
        Arc::clone(&midi_queue),
        Some((active.as_client(), patch)),
    );
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    dispatcher.run(stdin.lock(), &mut stdout);
    drop(dispatcher);

    info!("calling client close for mixer");
    let _ = active.deactivate();
    let _ = watchdog_handle.join();
}
