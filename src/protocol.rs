//! Event-bus payloads shared between the bridge and its embedder.
//!
//! Everything here is observational. Subscribers get told what the output
//! path did; nothing in the scheduling path waits for or depends on them.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Output(OutputMessage),
    Playback(PlaybackMessage),
}

/// Output-device lifecycle and control notifications.
#[derive(Debug, Clone)]
pub enum OutputMessage {
    /// The device connection was established and the stream is running.
    DeviceOpened { stream_info: OutputStreamInfo },
    /// No usable output device exists; audio is permanently disabled.
    DeviceUnavailable,
    /// The master volume changed.
    VolumeChanged { attenuation: i32, gain: f32 },
}

/// Playback-path notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    /// The device clock overtook the schedule during a producer stall and
    /// the insertion point was clamped forward. The skipped audio is gone;
    /// this only reports that the glitch happened.
    Resynced { lost_seconds: f64 },
}

/// Negotiated output stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStreamInfo {
    pub device_name: String,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
    pub sample_format: OutputSampleFormat,
}

/// Sample format of the opened output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSampleFormat {
    F32,
    I16,
    U16,
    Unknown,
}

/// Snapshot of the buffer over/underflow counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Times the device clock overtook the schedule (audible glitch).
    pub underflows: u64,
    /// Chunks dropped because the producer ran too far ahead.
    pub overflows: u64,
}
