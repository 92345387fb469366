// File d'attente MIDI - transfert des événements vers l'interface
//
// Incoming MIDI is forwarded to the controlling application as text,
// piggybacked on the telemetry reply. The queue is a fixed 1024-byte
// textual buffer; the comma-separated token format is part of the
// external protocol.

use std::fmt::Write as _;

/// Upper bound of the textual queue, protocol fixed.
pub const MIDI_QUEUE_SIZE: usize = 1024;

/// Longest single token (",c<ch>.<cc>:<val>" worst case plus margin).
const MAX_TOKEN_LEN: usize = 12;

pub struct MidiQueue {
    buf: String,
}

impl MidiQueue {
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(MIDI_QUEUE_SIZE),
        }
    }

    /// True when another event would not fit. Checked by the caller so
    /// a drop can be logged as such (an unhandled status byte is not a
    /// drop).
    pub fn would_overflow(&self) -> bool {
        self.buf.len() + MAX_TOKEN_LEN > MIDI_QUEUE_SIZE
    }

    /// Classify and append one raw MIDI event. Returns `false` when the
    /// event was dropped (queue full or unhandled status byte).
    ///
    /// The capacity check happens before formatting, so appending never
    /// grows the buffer past its preallocated capacity.
    pub fn push_event(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        if self.buf.len() + MAX_TOKEN_LEN > MIDI_QUEUE_SIZE {
            return false;
        }
        let channel = bytes[0] & 0x0F;
        match bytes[0] & 0xF0 {
            0xB0 if bytes.len() >= 3 => {
                let _ = write!(self.buf, ",c{:x}.{:x}:{:x}", channel, bytes[1], bytes[2]);
            }
            0x80 if bytes.len() >= 2 => {
                let _ = write!(self.buf, ",n{:x}.{:x}:0", channel, bytes[1]);
            }
            0x90 if bytes.len() >= 2 => {
                let _ = write!(self.buf, ",n{:x}.{:x}:7F", channel, bytes[1]);
            }
            0xE0 if bytes.len() >= 3 => {
                let wheel =
                    (0x2040i32 - bytes[2] as i32 - bytes[1] as i32 * 128).clamp(0, 0x7F);
                let _ = write!(self.buf, ",p{:x}.0:{:x}", channel, wheel);
            }
            _ => return false,
        }
        true
    }

    /// Take everything queued since the last drain, without the leading
    /// comma. Called by the dispatcher when it builds a telemetry reply.
    pub fn drain(&mut self) -> String {
        let out = if self.buf.is_empty() {
            String::new()
        } else {
            self.buf[1..].to_string()
        };
        self.buf.clear();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for MidiQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change_token() {
        let mut q = MidiQueue::new();
        assert!(q.push_event(&[0xB2, 7, 0x40]));
        assert_eq!(q.drain(), "c2.7:40");
        assert!(q.is_empty());
    }

    #[test]
    fn test_note_on_off_tokens() {
        let mut q = MidiQueue::new();
        assert!(q.push_event(&[0x90, 0x3C, 0x64]));
        assert!(q.push_event(&[0x81, 0x3C, 0x00]));
        assert_eq!(q.drain(), "n0.3c:7F,n1.3c:0");
    }

    #[test]
    fn test_pitch_wheel_mapping_and_clamp() {
        let mut q = MidiQueue::new();
        // centre position: b1=0x00, b2=0x40 -> 0x2040 - 0x40 - 0 = 0x2000, clamped
        assert!(q.push_event(&[0xE0, 0x00, 0x40]));
        assert_eq!(q.drain(), "p0.0:7f");
        // fully up clamps to zero
        assert!(q.push_event(&[0xE3, 0x7F, 0x7F]));
        assert_eq!(q.drain(), "p3.0:0");
    }

    #[test]
    fn test_overflow_drops_events() {
        let mut q = MidiQueue::new();
        let mut accepted = 0;
        for _ in 0..200 {
            if q.push_event(&[0xB0, 0x07, 0x40]) {
                accepted += 1;
            }
        }
        assert!(accepted < 200);
        let text = q.drain();
        assert!(text.len() <= MIDI_QUEUE_SIZE);
        // queue usable again after the drain
        assert!(q.push_event(&[0xB0, 0x07, 0x41]));
    }

    #[test]
    fn test_unknown_status_ignored() {
        let mut q = MidiQueue::new();
        assert!(!q.push_event(&[0xF8]));
        assert!(q.is_empty());
    }
}
