// Client JACK - callbacks process et notifications
//
// Thin wrapper between the audio server and the mix kernel: gathers the
// port buffers into a `BusBuffers`, forwards MIDI into the textual
// queue and hands the block to the kernel. Holds no logic of its own so
// the kernel stays testable without a running server.

use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;

use log::{info, warn};

use crate::audio::engine::{BusBuffers, MixKernel};
use crate::audio::ports::MixerPorts;
use crate::control::state::ControlBlock;
use crate::midi::MidiQueue;

pub struct MixerProcess {
    pub kernel: MixKernel,
    pub ports: MixerPorts,
    midi_queue: Arc<Mutex<MidiQueue>>,
}

impl MixerProcess {
    pub fn new(kernel: MixKernel, ports: MixerPorts, midi_queue: Arc<Mutex<MidiQueue>>) -> Self {
        Self {
            kernel,
            ports,
            midi_queue,
        }
    }
}

impl jack::ProcessHandler for MixerProcess {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        // forward incoming MIDI to the queue; the lock is only taken
        // when events actually arrived and the holder never blocks
        let mut events = self.ports.midi_control.iter(ps).peekable();
        if events.peek().is_some() {
            if let Ok(mut queue) = self.midi_queue.lock() {
                for event in events {
                    if queue.would_overflow() {
                        warn!("MIDI queue overflow, event lost");
                        continue;
                    }
                    queue.push_event(event.bytes);
                }
            }
        }

        for (mic, port) in self
            .kernel
            .mics
            .iter_mut()
            .zip(self.ports.mic_ports.iter())
        {
            mic.copy_input(port.as_slice(ps));
        }

        let mut bus = BusBuffers {
            dj_l: self.ports.dj_out_l.as_mut_slice(ps),
            dj_r: self.ports.dj_out_r.as_mut_slice(ps),
            str_l: self.ports.str_out_l.as_mut_slice(ps),
            str_r: self.ports.str_out_r.as_mut_slice(ps),
            voip_out_l: self.ports.voip_out_l.as_mut_slice(ps),
            voip_out_r: self.ports.voip_out_r.as_mut_slice(ps),
            dsp_out_l: self.ports.dsp_out_l.as_mut_slice(ps),
            dsp_out_r: self.ports.dsp_out_r.as_mut_slice(ps),
            voip_in_l: self.ports.voip_in_l.as_slice(ps),
            voip_in_r: self.ports.voip_in_r.as_slice(ps),
            dsp_in_l: self.ports.dsp_in_l.as_slice(ps),
            dsp_in_r: self.ports.dsp_in_r.as_slice(ps),
        };
        self.kernel.process_block(&mut bus);
        jack::Control::Continue
    }

    /// The server warns about block-size changes outside the realtime
    /// context; pre-sizing here keeps the callback allocation-free.
    fn buffer_size(&mut self, _: &jack::Client, size: jack::Frames) -> jack::Control {
        self.kernel.ensure_capacity(size as usize);
        jack::Control::Continue
    }
}

pub struct MixerNotifications {
    control: Arc<ControlBlock>,
}

impl MixerNotifications {
    pub fn new(control: Arc<ControlBlock>) -> Self {
        Self { control }
    }
}

impl jack::NotificationHandler for MixerNotifications {
    fn thread_init(&self, _: &jack::Client) {
        info!("audio thread started");
    }

    /// The server went away; the dispatcher loop polls this flag and
    /// exits cleanly.
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        warn!("audio server shut us down: {}", reason);
        self.control.jack_closed.store(true, Ordering::Relaxed);
    }

    fn xrun(&mut self, _: &jack::Client) -> jack::Control {
        jack::Control::Continue
    }
}
