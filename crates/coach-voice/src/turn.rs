//! Turn detection for conversational flow
//!
//! Decides where utterances begin and end. In automatic mode an utterance
//! opens once loudness stays above a threshold for a minimum onset and closes
//! after a silence hangover. In push-to-talk mode `press` and `manual_stop`
//! bound the utterance and loudness is ignored.
//!
//! All timing is measured in audio time (the summed duration of the frames
//! seen), so the detector behaves identically under a real microphone, a
//! scripted feed, or paused test clocks.

use crate::audio::{AudioFrame, MIN_DBFS};
use crate::settings::TurnMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why an utterance closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    SilenceTimeout,
    ManualStop,
    /// Forced cutoff at the maximum utterance length.
    MaxDuration,
    Cancelled,
}

/// Audio of one closed utterance, in capture order.
#[derive(Debug, Clone)]
pub struct UtteranceAudio {
    pub frames: Arc<[AudioFrame]>,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl UtteranceAudio {
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.frames.iter().flat_map(|f| f.samples.iter().copied())
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(|f| f.samples.len()).sum()
    }
}

/// Events emitted by the turn detector
#[derive(Debug, Clone)]
pub enum TurnEvent {
    UtteranceStarted {
        utterance_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// `audio` is `None` only when the utterance was cancelled.
    UtteranceEnded {
        utterance_id: Uuid,
        timestamp: DateTime<Utc>,
        reason: EndReason,
        audio: Option<UtteranceAudio>,
    },

    /// The utterance was shorter than the minimum viable length.
    UtteranceDiscarded {
        utterance_id: Uuid,
        timestamp: DateTime<Utc>,
        duration: Duration,
    },
}

fn default_threshold() -> f32 {
    -40.0
}
fn default_barge_in_threshold() -> f32 {
    -30.0
}
fn default_min_onset_ms() -> u64 {
    120
}
fn default_barge_in_onset_ms() -> u64 {
    300
}
fn default_hangover_ms() -> u64 {
    800
}
fn default_min_utterance_ms() -> u64 {
    250
}
fn default_max_utterance_ms() -> u64 {
    30_000
}

/// Configuration for turn detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Frame loudness counted as speech (default: -40 dBFS)
    #[serde(default = "default_threshold")]
    pub speech_threshold_dbfs: f32,

    /// Loudness required to barge in over playback (default: -30 dBFS)
    #[serde(default = "default_barge_in_threshold")]
    pub barge_in_threshold_dbfs: f32,

    /// Sustained speech needed to open an utterance (default: 120ms)
    #[serde(default = "default_min_onset_ms")]
    pub min_onset_ms: u64,

    /// Sustained speech needed to open an utterance during playback (default: 300ms)
    #[serde(default = "default_barge_in_onset_ms")]
    pub barge_in_onset_ms: u64,

    /// Silence that closes an utterance (default: 800ms)
    #[serde(default = "default_hangover_ms")]
    pub hangover_ms: u64,

    /// Shorter utterances are discarded (default: 250ms)
    #[serde(default = "default_min_utterance_ms")]
    pub min_utterance_ms: u64,

    /// Utterances are cut off at this length (default: 30s)
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            speech_threshold_dbfs: default_threshold(),
            barge_in_threshold_dbfs: default_barge_in_threshold(),
            min_onset_ms: default_min_onset_ms(),
            barge_in_onset_ms: default_barge_in_onset_ms(),
            hangover_ms: default_hangover_ms(),
            min_utterance_ms: default_min_utterance_ms(),
            max_utterance_ms: default_max_utterance_ms(),
        }
    }
}

#[derive(Debug)]
enum Phase {
    /// No utterance open. `onset` is how long the current loud run has lasted.
    Quiet {
        onset: Duration,
        pending: Vec<AudioFrame>,
    },
    Open(OpenUtterance),
}

#[derive(Debug)]
struct OpenUtterance {
    id: Uuid,
    frames: Vec<AudioFrame>,
    length: Duration,
    /// Trailing silence in automatic mode.
    silence: Duration,
}

impl Phase {
    fn quiet() -> Self {
        Phase::Quiet {
            onset: Duration::ZERO,
            pending: Vec::new(),
        }
    }
}

/// Turns a frame stream into utterance boundaries.
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnConfig,
    mode: TurnMode,
    barge_in_guard: bool,
    phase: Phase,
}

impl TurnDetector {
    pub fn new(config: TurnConfig, mode: TurnMode) -> Self {
        Self {
            config,
            mode,
            barge_in_guard: false,
            phase: Phase::quiet(),
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// Switch modes. Any open or pending utterance is dropped without events.
    pub fn set_mode(&mut self, mode: TurnMode) {
        if self.mode != mode {
            debug!("turn mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
            self.reset();
        }
    }

    /// While set, onset uses the stricter barge-in threshold and duration.
    pub fn set_barge_in_guard(&mut self, guard: bool) {
        self.barge_in_guard = guard;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open(_))
    }

    /// Forget everything, emitting nothing.
    pub fn reset(&mut self) {
        self.phase = Phase::quiet();
    }

    /// Feed one captured frame.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Vec<TurnEvent> {
        match self.mode {
            TurnMode::Automatic => self.process_automatic(frame),
            TurnMode::PushToTalk => self.process_manual(frame),
        }
    }

    /// Open an utterance in push-to-talk mode.
    pub fn press(&mut self) -> Vec<TurnEvent> {
        if self.mode != TurnMode::PushToTalk {
            debug!("press ignored in automatic mode");
            return Vec::new();
        }
        if self.is_open() {
            return Vec::new();
        }
        vec![self.open(Vec::new(), Duration::ZERO)]
    }

    /// Close the open utterance as if the speaker finished.
    pub fn manual_stop(&mut self) -> Vec<TurnEvent> {
        self.close(EndReason::ManualStop).into_iter().collect()
    }

    /// Abandon the open utterance. Its audio is dropped.
    pub fn cancel(&mut self) -> Vec<TurnEvent> {
        self.close(EndReason::Cancelled).into_iter().collect()
    }

    fn process_automatic(&mut self, frame: &AudioFrame) -> Vec<TurnEvent> {
        let dur = frame.duration();
        let dbfs = frame.dbfs();

        match &mut self.phase {
            Phase::Quiet { onset, pending } => {
                let threshold = if self.barge_in_guard {
                    self.config.barge_in_threshold_dbfs
                } else {
                    self.config.speech_threshold_dbfs
                };
                if dbfs <= MIN_DBFS || dbfs < threshold {
                    *onset = Duration::ZERO;
                    pending.clear();
                    return Vec::new();
                }
                *onset += dur;
                pending.push(frame.clone());

                let required = Duration::from_millis(if self.barge_in_guard {
                    self.config.barge_in_onset_ms
                } else {
                    self.config.min_onset_ms
                });
                if *onset < required {
                    return Vec::new();
                }
                let frames = std::mem::take(pending);
                let length = *onset;
                let mut events = vec![self.open(frames, length)];
                events.extend(self.check_max_length());
                events
            }
            Phase::Open(open) => {
                open.frames.push(frame.clone());
                open.length += dur;
                if dbfs >= self.config.speech_threshold_dbfs {
                    open.silence = Duration::ZERO;
                } else {
                    open.silence += dur;
                }
                if open.silence >= Duration::from_millis(self.config.hangover_ms) {
                    return self.close(EndReason::SilenceTimeout).into_iter().collect();
                }
                self.check_max_length().into_iter().collect()
            }
        }
    }

    fn process_manual(&mut self, frame: &AudioFrame) -> Vec<TurnEvent> {
        match &mut self.phase {
            Phase::Open(open) => {
                open.frames.push(frame.clone());
                open.length += frame.duration();
                self.check_max_length().into_iter().collect()
            }
            Phase::Quiet { .. } => Vec::new(),
        }
    }

    fn check_max_length(&mut self) -> Option<TurnEvent> {
        let max = Duration::from_millis(self.config.max_utterance_ms);
        if !matches!(&self.phase, Phase::Open(open) if open.length >= max) {
            return None;
        }
        warn!("⏱️ Max utterance length reached, cutting off");
        self.close(EndReason::MaxDuration)
    }

    fn open(&mut self, frames: Vec<AudioFrame>, length: Duration) -> TurnEvent {
        let id = Uuid::new_v4();
        info!("🎤 Utterance {} started", id);
        self.phase = Phase::Open(OpenUtterance {
            id,
            frames,
            length,
            silence: Duration::ZERO,
        });
        TurnEvent::UtteranceStarted {
            utterance_id: id,
            timestamp: Utc::now(),
        }
    }

    fn close(&mut self, reason: EndReason) -> Option<TurnEvent> {
        let open = match std::mem::replace(&mut self.phase, Phase::quiet()) {
            Phase::Open(open) => open,
            quiet => {
                self.phase = quiet;
                return None;
            }
        };

        let timestamp = Utc::now();
        if reason == EndReason::Cancelled {
            debug!("🚫 Utterance {} cancelled", open.id);
            return Some(TurnEvent::UtteranceEnded {
                utterance_id: open.id,
                timestamp,
                reason,
                audio: None,
            });
        }

        let spoken = open.length.saturating_sub(open.silence);
        if spoken < Duration::from_millis(self.config.min_utterance_ms) {
            debug!("⏭️ Utterance {} too short ({:?}), discarding", open.id, spoken);
            return Some(TurnEvent::UtteranceDiscarded {
                utterance_id: open.id,
                timestamp,
                duration: spoken,
            });
        }

        info!("✅ Utterance {} ended ({:?}, {:?})", open.id, reason, open.length);
        let sample_rate = open.frames.first().map(|f| f.sample_rate).unwrap_or_default();
        Some(TurnEvent::UtteranceEnded {
            utterance_id: open.id,
            timestamp,
            reason,
            audio: Some(UtteranceAudio {
                frames: open.frames.into(),
                sample_rate,
                duration: open.length,
            }),
        })
    }
}
