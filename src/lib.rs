// MyRadio Mixer - Library exports for tests and benchmarks

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod mic;
pub mod midi;
pub mod player;
pub mod watchdog;

// Re-export commonly used types for convenience
pub use audio::engine::{BusBuffers, MixKernel};
pub use audio::smoothing::{ControlSurface, MixTargets};
pub use control::dispatcher::{Dispatcher, MixStats, Players, TelemetrySnapshot};
pub use control::state::{ControlBlock, MixerMode};
pub use error::{MixerError, MixerResult};
pub use midi::MidiQueue;
pub use player::channel::{PlayerAudio, PlayerControl, create_player};
