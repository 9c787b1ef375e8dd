//! Emulator-facing audio output bridge.
//!
//! Owns the connection to the platform output device, the master gain, and
//! the scheduling state. Ingests interleaved 16-bit PCM chunks from the
//! emulator, converts them, and splices them into a gapless playback
//! timeline against the device clock.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, warn};
use tokio::sync::broadcast::{self, Receiver, Sender};

use crate::{
    config::Config,
    protocol::{
        BridgeStats, Message, OutputMessage, OutputSampleFormat, OutputStreamInfo, PlaybackMessage,
    },
    sample_convert,
    scheduler::{PendingBuffer, ScheduledBuffer, SchedulerState},
};

/// Lifecycle of the process-wide output connection.
///
/// `Ready` and `Unavailable` are both terminal: the device is opened at most
/// once and a failed bring-up permanently degrades every operation to a
/// no-op.
enum OutputState {
    Uninitialized,
    Ready(OutputHandle),
    Unavailable,
}

/// Negotiated parameters of the running output stream. The `cpal::Stream`
/// itself is owned by the output thread and never crosses threads.
struct OutputHandle {
    stream_info: OutputStreamInfo,
    sample_rate: u32,
}

/// Audio scheduling bridge between an emulator core and the output device.
pub struct AudioBridge {
    config: Config,
    output_state: Mutex<OutputState>,
    /// Pending queue + insertion point. Ingest and the scheduling pass run
    /// to completion under this lock; when the render timeline is also
    /// needed it is locked second.
    scheduler: Mutex<SchedulerState>,
    /// Buffers handed to the device, consumed by the render callback.
    timeline: Arc<Mutex<VecDeque<ScheduledBuffer>>>,
    /// Frames the render callback has produced so far. Only the callback
    /// writes it; everything else reads it lock-free.
    clock_frames: Arc<AtomicU64>,
    /// Master gain scalar as f32 bits, read once per render callback.
    gain_bits: Arc<AtomicU32>,
    attenuation: AtomicI32,
    /// Negotiated sample rate, 0 until the output is ready.
    sample_rate: AtomicU32,
    underflows: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
    bus_sender: Sender<Message>,
}

impl AudioBridge {
    /// Creates the bridge without touching the audio device. The device is
    /// opened lazily on the first `submit_samples` or `set_master_volume`
    /// call.
    pub fn new(config: Config) -> Self {
        let (bus_sender, _) = broadcast::channel(64);
        Self {
            config,
            output_state: Mutex::new(OutputState::Uninitialized),
            scheduler: Mutex::new(SchedulerState::default()),
            timeline: Arc::new(Mutex::new(VecDeque::new())),
            clock_frames: Arc::new(AtomicU64::new(0)),
            gain_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            attenuation: AtomicI32::new(0),
            sample_rate: AtomicU32::new(0),
            underflows: Arc::new(AtomicU64::new(0)),
            overflows: Arc::new(AtomicU64::new(0)),
            bus_sender,
        }
    }

    /// Subscribes to diagnostic bus traffic.
    pub fn subscribe(&self) -> Receiver<Message> {
        self.bus_sender.subscribe()
    }

    /// Ingests one chunk of interleaved 16-bit stereo samples produced at
    /// the device sample rate, then runs a scheduling pass.
    ///
    /// Panics if the slice does not split into whole L/R frames. Chunks are
    /// dropped when no output device exists or when the producer has run
    /// more than `max_lead_ms` ahead of the device clock.
    pub fn submit_samples(&self, interleaved: &[i16]) {
        assert!(
            interleaved.len() % 2 == 0,
            "interleaved stereo samples must come in whole L/R frames"
        );
        let Some(sample_rate) = self.ensure_ready() else {
            // No playback device to feed; the samples are simply gone.
            return;
        };
        let buffer = PendingBuffer::from_interleaved_i16(interleaved);

        let mut scheduler = self.scheduler.lock().unwrap();
        let now = self.clock_frames.load(Ordering::Relaxed);

        let max_lead_frames = Self::ms_to_frames(self.config.buffering.max_lead_ms, sample_rate);
        let lead_frames = scheduler.lead_frames(now);
        if lead_frames + buffer.frames() > max_lead_frames {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            debug!(
                "AudioBridge: dropping {}-frame chunk, producer is {} frames ahead",
                buffer.frames(),
                lead_frames
            );
            return;
        }

        scheduler.push(buffer);
        let prebuffer_frames = Self::ms_to_frames(self.config.buffering.prebuffer_ms, sample_rate);
        let outcome = scheduler.run_pass(now, prebuffer_frames);

        if let Some(lost_frames) = outcome.resync_frames {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            let lost_seconds = lost_frames as f64 / f64::from(sample_rate);
            debug!(
                "AudioBridge: device clock overtook the schedule, resynced {lost_seconds:.3}s forward"
            );
            let _ = self
                .bus_sender
                .send(Message::Playback(PlaybackMessage::Resynced { lost_seconds }));
        }
        if !outcome.scheduled.is_empty() {
            self.timeline.lock().unwrap().extend(outcome.scheduled);
        }
    }

    /// Sets the master volume from an attenuation value, 0 for full volume
    /// down to -32 for silence. Values outside that range clamp.
    ///
    /// Takes effect immediately, including for audio already scheduled but
    /// not yet rendered.
    pub fn set_master_volume(&self, attenuation: i32) {
        if self.ensure_ready().is_none() {
            return;
        }
        let attenuation = sample_convert::clamp_attenuation(attenuation);
        let gain = sample_convert::attenuation_to_gain(attenuation);
        self.attenuation.store(attenuation, Ordering::Relaxed);
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
        debug!("AudioBridge: master volume set to {attenuation} (gain {gain:.3})");
        let _ = self
            .bus_sender
            .send(Message::Output(OutputMessage::VolumeChanged { attenuation, gain }));
    }

    /// Returns the current master-volume attenuation.
    pub fn master_volume(&self) -> i32 {
        self.attenuation.load(Ordering::Relaxed)
    }

    /// Current device-clock time in seconds, or `None` before the output is
    /// ready (or when it never will be).
    pub fn device_clock(&self) -> Option<f64> {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        if sample_rate == 0 {
            return None;
        }
        Some(self.clock_frames.load(Ordering::Relaxed) as f64 / f64::from(sample_rate))
    }

    /// Parameters of the running output stream, once ready.
    pub fn stream_info(&self) -> Option<OutputStreamInfo> {
        match &*self.output_state.lock().unwrap() {
            OutputState::Ready(handle) => Some(handle.stream_info.clone()),
            _ => None,
        }
    }

    /// Snapshot of the buffer over/underflow counters.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            underflows: self.underflows.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    /// Idempotent lazy bring-up of the output connection. Returns the
    /// negotiated sample rate when the device is (now) ready.
    fn ensure_ready(&self) -> Option<u32> {
        let mut state = self.output_state.lock().unwrap();
        match &*state {
            OutputState::Ready(handle) => Some(handle.sample_rate),
            OutputState::Unavailable => None,
            OutputState::Uninitialized => match self.start_output() {
                Some(stream_info) => {
                    let sample_rate = stream_info.sample_rate_hz;
                    self.sample_rate.store(sample_rate, Ordering::Relaxed);
                    debug!(
                        "AudioBridge: output ready: device='{}' sr={} channels={} format={:?}",
                        stream_info.device_name,
                        stream_info.sample_rate_hz,
                        stream_info.channel_count,
                        stream_info.sample_format
                    );
                    let _ = self.bus_sender.send(Message::Output(OutputMessage::DeviceOpened {
                        stream_info: stream_info.clone(),
                    }));
                    *state = OutputState::Ready(OutputHandle {
                        stream_info,
                        sample_rate,
                    });
                    Some(sample_rate)
                }
                None => {
                    error!("AudioBridge: no usable audio output, sound disabled");
                    let _ = self
                        .bus_sender
                        .send(Message::Output(OutputMessage::DeviceUnavailable));
                    *state = OutputState::Unavailable;
                    None
                }
            },
        }
    }

    /// Spawns the thread that owns the output stream and waits for it to
    /// report whether the device came up.
    fn start_output(&self) -> Option<OutputStreamInfo> {
        let (ready_sender, ready_receiver) = mpsc::channel();
        let device_name = self.config.output.output_device_name.clone();
        let stats_interval_ms = self.config.buffering.stats_interval_ms;
        let timeline = Arc::clone(&self.timeline);
        let clock_frames = Arc::clone(&self.clock_frames);
        let gain_bits = Arc::clone(&self.gain_bits);
        let underflows = Arc::clone(&self.underflows);
        let overflows = Arc::clone(&self.overflows);

        let spawned = thread::Builder::new()
            .name("pcmbridge-output".to_string())
            .spawn(move || {
                // The cpal stream is not Send, so it is created here and
                // owned by this thread for the life of the process.
                match Self::open_output_stream(&device_name, timeline, clock_frames, gain_bits) {
                    Some((stream, stream_info)) => {
                        let _ = ready_sender.send(Some(stream_info));
                        Self::stats_loop(stream, stats_interval_ms, underflows, overflows);
                    }
                    None => {
                        let _ = ready_sender.send(None);
                    }
                }
            });
        if spawned.is_err() {
            error!("AudioBridge: failed to spawn output thread");
            return None;
        }
        ready_receiver.recv().ok().flatten()
    }

    /// Opens the configured (or default) output device and starts a stream
    /// whose callback drains the render timeline.
    fn open_output_stream(
        requested_name: &str,
        timeline: Arc<Mutex<VecDeque<ScheduledBuffer>>>,
        clock_frames: Arc<AtomicU64>,
        gain_bits: Arc<AtomicU32>,
    ) -> Option<(cpal::Stream, OutputStreamInfo)> {
        let host = cpal::default_host();
        let selected_device = if requested_name.is_empty() {
            None
        } else {
            host.output_devices().ok().and_then(|mut devices| {
                devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == requested_name)
                        .unwrap_or(false)
                })
            })
        };
        if !requested_name.is_empty() && selected_device.is_none() {
            warn!("AudioBridge: requested output device not found, falling back to system default");
        }
        let Some(device) = selected_device.or_else(|| host.default_output_device()) else {
            error!("AudioBridge: no output device available");
            return None;
        };

        // The producer emits at the device's native rate, so the stream is
        // opened at that rate and nothing is resampled.
        let native_rate = device
            .default_output_config()
            .map(|config| config.sample_rate().0)
            .unwrap_or(44_100);
        let configs = match device.supported_output_configs() {
            Ok(configs) => configs.collect::<Vec<_>>(),
            Err(e) => {
                error!("AudioBridge: error getting device configs: {e}");
                return None;
            }
        };
        if configs.is_empty() {
            error!("AudioBridge: no output configs reported for selected device");
            return None;
        }
        let Some(selected_config) = Self::choose_stream_config(&configs, native_rate) else {
            error!("AudioBridge: no matching device config found");
            return None;
        };

        let stream_config: cpal::StreamConfig = selected_config.config();
        let sample_format = selected_config.sample_format();
        let channels = usize::from(stream_config.channels);
        let stream_info = OutputStreamInfo {
            device_name: device
                .name()
                .unwrap_or_else(|_| "Unknown Device".to_string()),
            sample_rate_hz: stream_config.sample_rate.0,
            channel_count: stream_config.channels,
            sample_format: Self::output_sample_format_from_cpal(sample_format),
        };

        let stream_result = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let base = clock_frames.load(Ordering::Relaxed);
                    let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed)).clamp(0.0, 1.0);
                    let rendered = {
                        let mut timeline = timeline.lock().unwrap();
                        Self::render_frames(output, &mut timeline, base, gain, channels, |s| {
                            s.clamp(-1.0, 1.0)
                        })
                    };
                    clock_frames.store(base + rendered, Ordering::Relaxed);
                },
                |err| error!("AudioBridge: stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |output: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let base = clock_frames.load(Ordering::Relaxed);
                    let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed)).clamp(0.0, 1.0);
                    let rendered = {
                        let mut timeline = timeline.lock().unwrap();
                        Self::render_frames(output, &mut timeline, base, gain, channels, |s| {
                            (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
                        })
                    };
                    clock_frames.store(base + rendered, Ordering::Relaxed);
                },
                |err| error!("AudioBridge: stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::U16 => device.build_output_stream(
                &stream_config,
                move |output: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let base = clock_frames.load(Ordering::Relaxed);
                    let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed)).clamp(0.0, 1.0);
                    let rendered = {
                        let mut timeline = timeline.lock().unwrap();
                        Self::render_frames(output, &mut timeline, base, gain, channels, |s| {
                            ((s.clamp(-1.0, 1.0) * 0.5 + 0.5) * f32::from(u16::MAX)) as u16
                        })
                    };
                    clock_frames.store(base + rendered, Ordering::Relaxed);
                },
                |err| error!("AudioBridge: stream error: {err}"),
                None,
            ),
            other => {
                error!("AudioBridge: unsupported output sample format {other:?}");
                return None;
            }
        };

        let stream = match stream_result {
            Ok(stream) => stream,
            Err(e) => {
                error!("AudioBridge: failed to build output stream: {e}");
                return None;
            }
        };
        if let Err(e) = stream.play() {
            error!("AudioBridge: failed to start output stream: {e}");
            return None;
        }
        Some((stream, stream_info))
    }

    /// Picks the supported config closest to stereo f32 at the device's
    /// native rate.
    fn choose_stream_config(
        supported_configs: &[cpal::SupportedStreamConfigRange],
        native_rate: u32,
    ) -> Option<cpal::SupportedStreamConfig> {
        let mut best: Option<(u64, cpal::SupportedStreamConfig)> = None;
        for range in supported_configs {
            let rate = native_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            let candidate = range.with_sample_rate(cpal::SampleRate(rate));
            let channel_penalty = u64::from(candidate.channels().abs_diff(2)) * 1_000;
            let rate_penalty = u64::from(candidate.sample_rate().0.abs_diff(native_rate));
            let format_penalty = match candidate.sample_format() {
                cpal::SampleFormat::F32 => 0,
                cpal::SampleFormat::I16 => 20,
                cpal::SampleFormat::U16 => 30,
                _ => 200,
            };
            let score = channel_penalty + rate_penalty + format_penalty;
            match &best {
                Some((best_score, _)) if *best_score <= score => {}
                _ => best = Some((score, candidate)),
            }
        }
        best.map(|(_, candidate)| candidate)
    }

    fn output_sample_format_from_cpal(sample_format: cpal::SampleFormat) -> OutputSampleFormat {
        match sample_format {
            cpal::SampleFormat::F32 => OutputSampleFormat::F32,
            cpal::SampleFormat::I16 => OutputSampleFormat::I16,
            cpal::SampleFormat::U16 => OutputSampleFormat::U16,
            _ => OutputSampleFormat::Unknown,
        }
    }

    /// Fills one output callback's worth of frames from the timeline.
    ///
    /// Frames before a buffer's start time render as silence; a buffer whose
    /// start time has already passed plays immediately from its beginning.
    /// The stereo stream maps onto the device layout: mono gets the channel
    /// average, wider layouts get L, R and silence on the extra channels.
    /// Returns the number of frames rendered.
    fn render_frames<T, F>(
        output: &mut [T],
        timeline: &mut VecDeque<ScheduledBuffer>,
        base_frame: u64,
        gain: f32,
        channels: usize,
        mut convert_sample: F,
    ) -> u64
    where
        T: Copy,
        F: FnMut(f32) -> T,
    {
        let channels = channels.max(1);
        let frame_count = output.len() / channels;
        for frame_index in 0..frame_count {
            let device_frame = base_frame + frame_index as u64;
            while timeline
                .front()
                .is_some_and(|buffer| buffer.is_exhausted())
            {
                timeline.pop_front();
            }
            let (left, right) = match timeline.front_mut() {
                Some(buffer) if buffer.start_frame <= device_frame => buffer.next_frame(),
                _ => (0.0, 0.0),
            };
            let (left, right) = (left * gain, right * gain);
            let base_index = frame_index * channels;
            if channels == 1 {
                output[base_index] = convert_sample((left + right) * 0.5);
            } else {
                output[base_index] = convert_sample(left);
                output[base_index + 1] = convert_sample(right);
                for extra in 2..channels {
                    output[base_index + extra] = convert_sample(0.0);
                }
            }
        }
        frame_count as u64
    }

    /// Holds the output stream alive and periodically reports buffer
    /// over/underflow counter changes.
    fn stats_loop(
        stream: cpal::Stream,
        interval_ms: u32,
        underflows: Arc<AtomicU64>,
        overflows: Arc<AtomicU64>,
    ) {
        let _stream = stream;
        let interval = Duration::from_millis(u64::from(interval_ms.max(100)));
        let mut last_reported = (0u64, 0u64);
        loop {
            thread::sleep(interval);
            let counters = (
                underflows.load(Ordering::Relaxed),
                overflows.load(Ordering::Relaxed),
            );
            if counters != last_reported {
                debug!(
                    "AudioBridge: buffer underflows={} overflows={}",
                    counters.0, counters.1
                );
                last_reported = counters;
            }
        }
    }

    fn ms_to_frames(milliseconds: u32, sample_rate: u32) -> u64 {
        u64::from(milliseconds) * u64::from(sample_rate) / 1_000
    }
}
