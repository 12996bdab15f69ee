//! Audio frames, loudness, and the lossy level channel.
//!
//! Frames are mono f32 PCM normalized to -1.0..1.0. Level samples are a
//! best-effort telemetry side channel: a slow consumer loses the oldest samples
//! rather than stalling the producer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

/// Floor used when converting silence to decibels.
pub const MIN_DBFS: f32 = -100.0;

/// Range mapped onto 0.0..1.0 for UI meters.
const METER_FLOOR_DBFS: f32 = -60.0;

/// Default number of level samples kept for a lagging consumer.
pub const DEFAULT_LEVEL_WINDOW: usize = 32;

/// Audio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of capture channels (default: 1 for mono)
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frame size in samples (default: 480 for 30ms at 16kHz)
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,

    /// Level samples retained per consumer before the oldest are dropped
    #[serde(default = "default_level_window")]
    pub level_window: usize,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_frame_samples() -> usize {
    480
}

fn default_level_window() -> usize {
    DEFAULT_LEVEL_WINDOW
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_samples: default_frame_samples(),
            level_window: default_level_window(),
        }
    }
}

impl AudioConfig {
    pub fn frame_duration(&self) -> Duration {
        samples_duration(self.frame_samples, self.sample_rate)
    }
}

/// One fixed-size block of captured audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Capture order within one capture run, starting at 0.
    pub seq: u64,
    /// Mono samples (f32, normalized to -1.0 to 1.0)
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// When the frame was captured
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(seq: u64, samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            seq,
            samples: samples.into(),
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    pub fn dbfs(&self) -> f32 {
        rms_to_dbfs(self.rms())
    }
}

pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(samples as u64 * 1_000_000_000 / sample_rate as u64)
}

/// Root-mean-square amplitude of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

pub fn rms_to_dbfs(rms: f32) -> f32 {
    if rms <= 0.0 || !rms.is_finite() {
        return MIN_DBFS;
    }
    (20.0 * rms.log10()).max(MIN_DBFS)
}

/// Map dBFS onto 0.0..=1.0 for a meter.
pub fn normalized_level(dbfs: f32) -> f32 {
    ((dbfs - METER_FLOOR_DBFS) / -METER_FLOOR_DBFS).clamp(0.0, 1.0)
}

/// Down-mix interleaved samples to mono.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio by nearest-sample picking.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    (0..out_len)
        .map(|i| ((i as f64 * step) as usize).min(samples.len() - 1))
        .map(|idx| samples[idx])
        .collect()
}

/// Cuts an arbitrary sample stream into fixed-size, sequence-numbered frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    sample_rate: u32,
    buffer: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    pub fn new(config: &AudioConfig) -> Self {
        let frame_samples = config.frame_samples.max(1);
        Self {
            frame_samples,
            sample_rate: config.sample_rate,
            buffer: Vec::with_capacity(frame_samples),
            next_seq: 0,
        }
    }

    /// Append samples; returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() >= self.frame_samples {
                let block: Vec<f32> = std::mem::take(&mut self.buffer);
                self.buffer.reserve(self.frame_samples);
                frames.push(AudioFrame::new(self.next_seq, block, self.sample_rate));
                self.next_seq += 1;
            }
        }
        frames
    }
}

/// Where a level sample was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    Capture,
    Playback,
}

/// Timestamped loudness for UI meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevelSample {
    pub source: LevelSource,
    pub rms: f32,
    pub dbfs: f32,
    /// 0.0..=1.0 meter position
    pub level: f32,
    pub at: Instant,
}

impl AudioLevelSample {
    pub fn from_samples(source: LevelSource, samples: &[f32]) -> Self {
        let rms = rms(samples);
        let dbfs = rms_to_dbfs(rms);
        Self {
            source,
            rms,
            dbfs,
            level: normalized_level(dbfs),
            at: Instant::now(),
        }
    }
}

/// Create a lossy level channel retaining at most `window` samples per receiver.
pub fn level_channel(window: usize) -> (LevelSender, LevelReceiver) {
    let (tx, rx) = broadcast::channel(window.max(1));
    (LevelSender { tx }, LevelReceiver { rx })
}

/// Producer half. Sending never blocks and never fails visibly.
#[derive(Debug, Clone)]
pub struct LevelSender {
    tx: broadcast::Sender<AudioLevelSample>,
}

impl LevelSender {
    pub fn send(&self, sample: AudioLevelSample) {
        // No receiver means nobody is rendering a meter.
        let _ = self.tx.send(sample);
    }
}

/// Consumer half. A lagging receiver skips ahead to the oldest retained sample.
#[derive(Debug)]
pub struct LevelReceiver {
    rx: broadcast::Receiver<AudioLevelSample>,
}

impl LevelReceiver {
    /// Next sample, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<AudioLevelSample> {
        loop {
            match self.rx.recv().await {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("level consumer lagged, dropped {} samples", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<AudioLevelSample> {
        loop {
            match self.rx.try_recv() {
                Ok(sample) => return Some(sample),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_samples, 480);
        assert_eq!(config.frame_duration(), Duration::from_millis(30));
    }

    #[test]
    fn silence_floors_at_min_dbfs() {
        let frame = AudioFrame::new(0, vec![0.0f32; 480], 16000);
        assert_eq!(frame.dbfs(), MIN_DBFS);
        assert_eq!(normalized_level(frame.dbfs()), 0.0);
    }

    #[test]
    fn full_scale_square_is_zero_dbfs() {
        let samples: Vec<f32> = (0..480).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((rms_to_dbfs(rms(&samples))).abs() < 1e-3);
        assert!((normalized_level(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn resample_48k_to_16k_keeps_every_third_sample() {
        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        assert_eq!(resample(&input, 48000, 16000), vec![0.0, 3.0, 6.0]);
        assert_eq!(resample(&input, 16000, 16000), input);
    }

    #[test]
    fn assembler_emits_full_frames_in_sequence() {
        let config = AudioConfig {
            frame_samples: 4,
            ..Default::default()
        };
        let mut assembler = FrameAssembler::new(&config);
        assert!(assembler.push(&[0.1; 3]).is_empty());
        let frames = assembler.push(&[0.2; 6]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[1].seq, 1);
        assert_eq!(frames[0].samples.len(), 4);
        assert!(assembler.push(&[0.3]).is_empty());
    }

    #[test]
    fn lagging_level_receiver_keeps_newest_in_order() {
        let (tx, mut rx) = level_channel(4);
        for i in 0..10 {
            let mut sample = AudioLevelSample::from_samples(LevelSource::Capture, &[0.1]);
            sample.rms = i as f32;
            tx.send(sample);
        }
        let got: Vec<f32> = std::iter::from_fn(|| rx.try_recv()).map(|s| s.rms).collect();
        assert_eq!(got, vec![6.0, 7.0, 8.0, 9.0]);
    }
}
