//! Microphone capture using CPAL.
//!
//! The cpal stream is built, played, and dropped on a dedicated thread because
//! streams are not `Send` on every platform. The thread converts the device's
//! native format to mono frames at the configured rate and parks until it is
//! told to stop or the device disappears. Dropping the stream closes the frame
//! channel, which is how the orchestrator learns the capture ended.

use crate::audio::{
    downmix, level_channel, resample, AudioConfig, AudioFrame, AudioLevelSample, FrameAssembler,
    LevelSender, LevelSource,
};
use crate::capture::{CaptureSource, CaptureStreams};
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

enum Signal {
    Stop,
    Lost(String),
}

/// CPAL-backed [`CaptureSource`].
pub struct MicrophoneCapture {
    config: AudioConfig,
    device_name: Option<String>,
    active: Option<ActiveCapture>,
}

struct ActiveCapture {
    signal: std_mpsc::Sender<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveCapture {
    fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        let _ = self.signal.send(Signal::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl MicrophoneCapture {
    /// Capture from the default input device.
    pub fn new(config: AudioConfig) -> Self {
        info!(
            "🎤 Microphone capture configured ({}Hz, {} sample frames)",
            config.sample_rate, config.frame_samples
        );
        Self {
            config,
            device_name: None,
            active: None,
        }
    }

    /// Capture from a named input device (see [`list_input_devices`]).
    pub fn with_device(config: AudioConfig, name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::new(config)
        }
    }
}

impl CaptureSource for MicrophoneCapture {
    fn start(&mut self) -> VoiceResult<CaptureStreams> {
        if self.is_acquired() {
            return Err(VoiceError::DeviceBusy("microphone already capturing".to_string()));
        }
        // Reap a capture whose device went away.
        self.active = None;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (level_tx, level_rx) = level_channel(self.config.level_window);
        let (signal_tx, signal_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();

        let config = self.config.clone();
        let device_name = self.device_name.clone();
        let lost_tx = signal_tx.clone();

        let thread = std::thread::Builder::new()
            .name("coach-voice-capture".to_string())
            .spawn(move || {
                let stream =
                    match open_stream(&config, device_name.as_deref(), frame_tx, level_tx, lost_tx) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));
                if let Ok(Signal::Lost(msg)) = signal_rx.recv() {
                    warn!("🎤 Microphone lost: {}", msg);
                }
                drop(stream);
                info!("🎤 Microphone released");
            })?;

        let active = ActiveCapture {
            signal: signal_tx,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("✅ Audio capture started");
                self.active = Some(active);
                Ok(CaptureStreams {
                    frames: frame_rx,
                    levels: level_rx,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::AudioStream(
                "capture thread exited before the stream was ready".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if self.active.take().is_some() {
            info!("⏹️ Audio capture stopped");
        }
    }

    fn is_acquired(&self) -> bool {
        self.active.as_ref().map(ActiveCapture::is_running).unwrap_or(false)
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Converts device callbacks into frames and level samples.
struct FrameSink {
    assembler: FrameAssembler,
    frames: mpsc::UnboundedSender<AudioFrame>,
    levels: LevelSender,
    channels: usize,
    device_rate: u32,
    target_rate: u32,
}

impl FrameSink {
    fn accept(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        let mono = resample(&mono, self.device_rate, self.target_rate);
        for frame in self.assembler.push(&mono) {
            self.levels
                .send(AudioLevelSample::from_samples(LevelSource::Capture, &frame.samples));
            if self.frames.send(frame).is_err() {
                break;
            }
        }
    }
}

fn open_stream(
    config: &AudioConfig,
    device_name: Option<&str>,
    frames: mpsc::UnboundedSender<AudioFrame>,
    levels: LevelSender,
    signals: std_mpsc::Sender<Signal>,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::AudioDevice(format!("input device '{}' not found", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?,
    };

    info!(
        "📱 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();

    let mut sink = FrameSink {
        assembler: FrameAssembler::new(config),
        frames,
        levels,
        channels: stream_config.channels as usize,
        device_rate: stream_config.sample_rate.0,
        target_rate: config.sample_rate,
    };

    let on_error = move |err: cpal::StreamError| match err {
        cpal::StreamError::DeviceNotAvailable => {
            let _ = signals.send(Signal::Lost(err.to_string()));
        }
        other => warn!("Audio stream error: {}", other),
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink.accept(data),
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                sink.accept(&samples);
            },
            on_error,
            None,
        )?,
        other => {
            return Err(VoiceError::AudioDevice(format!(
                "unsupported sample format {:?} (need F32 or I16)",
                other
            )))
        }
    };

    stream.play()?;
    Ok(stream)
}

/// List available input devices
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
