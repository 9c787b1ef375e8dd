//! Gapless PCM scheduling bridge between an emulator core and the host
//! audio device.
//!
//! The emulator produces variable-length chunks of interleaved 16-bit
//! stereo samples on its own cadence. This crate buffers them against that
//! jitter, converts them to the output device's native float format, and
//! schedules each chunk to begin exactly where the previous one ended on
//! the device clock, with live master-volume control on top.
//!
//! The embedding process talks to one lazily-created process-wide
//! [`AudioBridge`], either directly or through the free functions below.
//! Sound is treated as an enhancement: when no output device exists every
//! entry point degrades to a no-op instead of reporting errors.

mod audio_bridge;
mod config;
mod protocol;
mod sample_convert;
mod scheduler;

pub use audio_bridge::AudioBridge;
pub use config::{BufferingConfig, Config, OutputConfig};
pub use protocol::{
    BridgeStats, Message, OutputMessage, OutputSampleFormat, OutputStreamInfo, PlaybackMessage,
};

use lazy_static::lazy_static;
use tokio::sync::broadcast::Receiver;

lazy_static! {
    static ref BRIDGE: AudioBridge = AudioBridge::new(Config::load_default());
}

/// Process-wide bridge instance, created on first use.
pub fn bridge() -> &'static AudioBridge {
    &BRIDGE
}

/// Submits one emulator tick's worth of interleaved 16-bit stereo samples.
///
/// See [`AudioBridge::submit_samples`].
pub fn submit_samples(interleaved: &[i16]) {
    BRIDGE.submit_samples(interleaved);
}

/// Sets the master volume, 0 for full volume down to -32 for silence.
///
/// See [`AudioBridge::set_master_volume`].
pub fn set_master_volume(attenuation: i32) {
    BRIDGE.set_master_volume(attenuation);
}

/// Returns the current master-volume attenuation.
pub fn master_volume() -> i32 {
    BRIDGE.master_volume()
}

/// Current device-clock time in seconds, or `None` when no output exists.
pub fn device_clock() -> Option<f64> {
    BRIDGE.device_clock()
}

/// Subscribes to the bridge's diagnostic event bus.
pub fn subscribe() -> Receiver<Message> {
    BRIDGE.subscribe()
}

/// Snapshot of the buffer over/underflow counters.
pub fn stats() -> BridgeStats {
    BRIDGE.stats()
}
