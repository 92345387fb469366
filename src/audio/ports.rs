// Ports JACK - enregistrement et câblage
//
// The port names are part of the external contract: the controlling
// application and the streamer connect to them by name. Rewiring
// happens over the control protocol (`remake*`, `jackconnect`,
// `jackportread`), always from the dispatcher thread.

use std::collections::HashMap;

use jack::{AudioIn, AudioOut, MidiIn, Port, PortFlags, Unowned};
use log::{info, warn};

const AUDIO_TYPE: &str = "32 bit float mono audio";
const MIDI_TYPE: &str = "8 bit raw midi";

/// Every port this client owns. Moves into the process handler, which
/// needs the buffers each callback.
pub struct MixerPorts {
    pub dj_out_l: Port<AudioOut>,
    pub dj_out_r: Port<AudioOut>,
    pub dsp_out_l: Port<AudioOut>,
    pub dsp_out_r: Port<AudioOut>,
    pub str_out_l: Port<AudioOut>,
    pub str_out_r: Port<AudioOut>,
    pub voip_out_l: Port<AudioOut>,
    pub voip_out_r: Port<AudioOut>,
    pub dsp_in_l: Port<AudioIn>,
    pub dsp_in_r: Port<AudioIn>,
    pub voip_in_l: Port<AudioIn>,
    pub voip_in_r: Port<AudioIn>,
    pub midi_control: Port<MidiIn>,
    pub mic_ports: Vec<Port<AudioIn>>,
}

/// Register the fixed port set plus one input per microphone channel.
pub fn register_ports(
    client: &jack::Client,
    mic_count: usize,
) -> Result<MixerPorts, jack::Error> {
    let mut mic_ports = Vec::with_capacity(mic_count);
    for n in 1..=mic_count {
        mic_ports.push(client.register_port(&format!("mic_in_{n}"), AudioIn::default())?);
    }
    Ok(MixerPorts {
        dj_out_l: client.register_port("dj_out_l", AudioOut::default())?,
        dj_out_r: client.register_port("dj_out_r", AudioOut::default())?,
        dsp_out_l: client.register_port("dsp_out_l", AudioOut::default())?,
        dsp_out_r: client.register_port("dsp_out_r", AudioOut::default())?,
        str_out_l: client.register_port("str_out_l", AudioOut::default())?,
        str_out_r: client.register_port("str_out_r", AudioOut::default())?,
        voip_out_l: client.register_port("voip_out_l", AudioOut::default())?,
        voip_out_r: client.register_port("voip_out_r", AudioOut::default())?,
        dsp_in_l: client.register_port("dsp_in_l", AudioIn::default())?,
        dsp_in_r: client.register_port("dsp_in_r", AudioIn::default())?,
        voip_in_l: client.register_port("voip_in_l", AudioIn::default())?,
        voip_in_r: client.register_port("voip_in_r", AudioIn::default())?,
        midi_control: client.register_port("midi_control", MidiIn::default())?,
        mic_ports,
    })
}

/// Dispatcher-side wiring manager: unowned handles to our ports plus
/// the default targets scanned at startup.
pub struct PortPatch {
    our: HashMap<String, Port<Unowned>>,
    sc_str_in_l: String,
    sc_str_in_r: String,
    playback: Vec<String>,
    capture: Vec<String>,
}

impl PortPatch {
    pub fn new(ports: &MixerPorts, sc_client: &str) -> Self {
        let mut our = HashMap::new();
        let mut keep = |name: &str, port: Port<Unowned>| {
            our.insert(name.to_string(), port);
        };
        keep("dj_out_l", ports.dj_out_l.clone_unowned());
        keep("dj_out_r", ports.dj_out_r.clone_unowned());
        keep("dsp_out_l", ports.dsp_out_l.clone_unowned());
        keep("dsp_out_r", ports.dsp_out_r.clone_unowned());
        keep("str_out_l", ports.str_out_l.clone_unowned());
        keep("str_out_r", ports.str_out_r.clone_unowned());
        keep("voip_out_l", ports.voip_out_l.clone_unowned());
        keep("voip_out_r", ports.voip_out_r.clone_unowned());
        keep("dsp_in_l", ports.dsp_in_l.clone_unowned());
        keep("dsp_in_r", ports.dsp_in_r.clone_unowned());
        keep("voip_in_l", ports.voip_in_l.clone_unowned());
        keep("voip_in_r", ports.voip_in_r.clone_unowned());
        keep("midi_control", ports.midi_control.clone_unowned());
        for (idx, p) in ports.mic_ports.iter().enumerate() {
            our.insert(format!("mic_in_{}", idx + 1), p.clone_unowned());
        }
        Self {
            our,
            sc_str_in_l: format!("{sc_client}:str_in_l"),
            sc_str_in_r: format!("{sc_client}:str_in_r"),
            playback: Vec::new(),
            capture: Vec::new(),
        }
    }

    /// Scan the physical ports once the client is active; these are the
    /// `default` targets of the remake commands.
    pub fn capture_defaults(&mut self, client: &jack::Client) {
        self.playback = client.ports(
            None,
            None,
            PortFlags::IS_PHYSICAL | PortFlags::IS_INPUT,
        );
        self.capture = client.ports(
            None,
            None,
            PortFlags::IS_PHYSICAL | PortFlags::IS_OUTPUT,
        );
    }

    fn full_name(&self, short: &str) -> Option<String> {
        self.our.get(short).and_then(|p| p.name().ok())
    }

    fn disconnect_all(&self, client: &jack::Client, short: &str) {
        if let Some(port) = self.our.get(short) {
            if let Err(e) = client.disconnect(port) {
                warn!("failed to disconnect {}: {}", short, e);
            }
        }
    }

    fn connect(&self, client: &jack::Client, src: &str, dst: &str) {
        if let Err(e) = client.connect_ports_by_name(src, dst) {
            warn!("cannot connect {} -> {}: {}", src, dst, e);
        }
    }

    /// Rewire one of our output ports: drop every connection, then hook
    /// it to `target`, where `default` falls back to `fallbacks` in
    /// order and an empty target leaves it unconnected.
    fn remake_output(
        &self,
        client: &jack::Client,
        short: &str,
        target: &str,
        fallbacks: &[&str],
    ) {
        self.disconnect_all(client, short);
        let Some(our) = self.full_name(short) else {
            return;
        };
        if target == "default" {
            if let Some(fb) = fallbacks.iter().find(|s| !s.is_empty()) {
                self.connect(client, &our, fb);
            }
        } else if !target.is_empty() {
            self.connect(client, &our, target);
        }
    }

    /// Same for one of our input ports (the connection runs the other
    /// way round).
    fn remake_input(&self, client: &jack::Client, short: &str, target: &str, fallback: &str) {
        self.disconnect_all(client, short);
        let Some(our) = self.full_name(short) else {
            return;
        };
        if target == "default" {
            if !fallback.is_empty() {
                self.connect(client, fallback, &our);
            }
        } else if !target.is_empty() {
            self.connect(client, target, &our);
        }
    }

    pub fn remake_mic(&self, client: &jack::Client, index: usize, target: &str) {
        let short = format!("mic_in_{}", index + 1);
        let default = self.capture.get(index).cloned().unwrap_or_default();
        self.remake_input(client, &short, target, &default);
    }

    pub fn remake_audio(&self, client: &jack::Client, right: bool, target: &str) {
        let short = if right { "dj_out_r" } else { "dj_out_l" };
        let fb = self
            .playback
            .get(right as usize)
            .map(String::as_str)
            .unwrap_or("");
        self.remake_output(client, short, target, &[fb]);
    }

    /// The stream outputs always rebind to the streamer client first,
    /// then to the named target or the rear physical pair.
    pub fn remake_stream(&self, client: &jack::Client, right: bool, target: &str) {
        let short = if right { "str_out_r" } else { "str_out_l" };
        self.disconnect_all(client, short);
        let Some(our) = self.full_name(short) else {
            return;
        };
        let sc = if right { &self.sc_str_in_r } else { &self.sc_str_in_l };
        self.connect(client, &our, sc);
        if target == "default" {
            let idx = if right { 5 } else { 4 };
            let alt = if right { 3 } else { 2 };
            if let Some(p) = self.playback.get(idx).or_else(|| self.playback.get(alt)) {
                self.connect(client, &our, p);
            }
        } else if !target.is_empty() {
            self.connect(client, &our, target);
        }
    }

    pub fn remake_midi(&self, client: &jack::Client, target: &str) {
        self.remake_input(client, "midi_control", target, "");
    }

    pub fn remake_dsp_out(&self, client: &jack::Client, right: bool, target: &str) {
        let short = if right { "dsp_out_r" } else { "dsp_out_l" };
        self.remake_output(client, short, target, &[]);
    }

    pub fn remake_dsp_in(&self, client: &jack::Client, right: bool, target: &str) {
        let short = if right { "dsp_in_r" } else { "dsp_in_l" };
        self.remake_input(client, short, target, "");
    }

    /// Rebind the stream pair to the streamer client.
    pub fn serverbind(&self, client: &jack::Client) {
        info!("remaking connection to server");
        if let Some(l) = self.full_name("str_out_l") {
            self.connect(client, &l, &self.sc_str_in_l);
        }
        if let Some(r) = self.full_name("str_out_r") {
            self.connect(client, &r, &self.sc_str_in_r);
        }
    }

    /// Connect or disconnect an arbitrary pair; the output side of the
    /// first port decides the direction.
    pub fn patch_pair(&self, client: &jack::Client, port: &str, port2: &str, connect: bool) {
        let Some(handle) = client.port_by_name(port) else {
            warn!("no such port: {}", port);
            return;
        };
        let (src, dst) = if handle.flags().contains(PortFlags::IS_OUTPUT) {
            (port, port2)
        } else {
            (port2, port)
        };
        let result = if connect {
            client.connect_ports_by_name(src, dst)
        } else {
            client.disconnect_ports_by_name(src, dst)
        };
        if let Err(e) = result {
            warn!("port patch {} / {} failed: {}", src, dst, e);
        }
    }

    /// Answer a `jackportread`: every port matching the filter, each
    /// prefixed with `@` when already connected to `portname`.
    pub fn port_report(&self, client: &jack::Client, portname: &str, filter: &str) -> String {
        let (type_pattern, flags) = match filter {
            "inputs" => (AUDIO_TYPE, PortFlags::IS_INPUT),
            "outputs" => (AUDIO_TYPE, PortFlags::IS_OUTPUT),
            "midioutputs" => (MIDI_TYPE, PortFlags::IS_OUTPUT),
            _ => (AUDIO_TYPE, PortFlags::empty()),
        };
        let queried = client.port_by_name(portname);
        let mut out = String::from("jackports=");
        for (i, name) in client
            .ports(None, Some(type_pattern), flags)
            .iter()
            .enumerate()
        {
            if i > 0 {
                out.push(' ');
            }
            let connected = queried
                .as_ref()
                .map(|p| p.is_connected_to(name).unwrap_or(false))
                .unwrap_or(false);
            if connected {
                out.push('@');
            }
            out.push_str(name);
        }
        out.push('\n');
        out
    }
}
