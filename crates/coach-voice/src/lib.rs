//! # Coach Voice - Real-Time Voice Conversation Engine
//!
//! Drives a spoken conversation with a coaching assistant: capture the user's
//! speech, decide when a turn is over, transcribe it, ask the response backend
//! for a reply, and stream the synthesized reply to the speaker. The user can
//! talk over the coach (barge-in) and the reply stops within one event.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   Conversation Orchestrator                       │
//! │            (one actor, one ordered event queue)                   │
//! │                                                                   │
//! │  ┌──────────────┐  frames  ┌──────────────┐  utterance            │
//! │  │   Capture    │ ───────→ │    Turn      │ ─────────┐            │
//! │  │ (cpal/script)│          │  Detector    │          ↓            │
//! │  └──────────────┘          └──────────────┘   ┌──────────────┐    │
//! │         ↑ barge-in                            │ Transcriber  │    │
//! │         │                                     │  (STT API)   │    │
//! │  ┌──────────────┐  chunks  ┌──────────────┐   └──────┬───────┘    │
//! │  │   Playback   │ ←─────── │ Synthesizer  │   ┌──────↓───────┐    │
//! │  │(rodio/script)│          │ (ElevenLabs) │ ← │  Responder   │    │
//! │  └──────────────┘          └──────────────┘   │   (LLM API)  │    │
//! │                                               └──────────────┘    │
//! │  state · levels · captions · errors  ──→  UiFeedback              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every backend call carries a cancellation token and the cycle number it
//! was issued under; late results from an abandoned cycle are discarded.

pub mod audio;
pub mod capture;
pub mod client;
pub mod config;
mod dispatch;
pub mod error;
pub mod feedback;
#[cfg(feature = "hardware")]
pub mod microphone;
pub mod orchestrator;
pub mod playback;
pub mod response;
pub mod scripted;
pub mod session;
pub mod settings;
#[cfg(feature = "hardware")]
pub mod speaker;
pub mod state;
pub mod stt;
pub mod synthesis;
pub mod turn;

pub use audio::{AudioConfig, AudioFrame, AudioLevelSample, LevelReceiver, LevelSource};
pub use capture::{CaptureSource, CaptureStreams};
pub use client::{CallPolicy, ClientError, ClientTimeouts};
pub use config::VoiceConfig;
pub use error::{FailureKind, VoiceError, VoiceResult};
pub use feedback::{ErrorNotice, StateChange, TracingFeedback, UiFeedback};
#[cfg(feature = "hardware")]
pub use microphone::{list_input_devices, MicrophoneCapture};
pub use orchestrator::{Command, ConversationOrchestrator, VoiceComponents, VoiceHandle};
pub use playback::{PlaybackChunk, PlaybackHandle, PlaybackNotice, PlaybackNoticeKind, PlaybackSink};
pub use response::{ChatCompletionResponder, ChatRole, ChatTurn, Responder};
pub use session::{HistoryEntry, TranscriptSegment, UtteranceRecord, VoiceSession};
pub use settings::{SelectedVoice, TurnMode, VoiceSettings};
#[cfg(feature = "hardware")]
pub use speaker::SpeakerPlayback;
pub use state::{next_state, Trigger, VoiceState};
pub use stt::{Transcriber, WhisperApiTranscriber};
pub use synthesis::{ElevenLabsSynthesizer, SynthesisRequest, Synthesizer};
pub use turn::{EndReason, TurnConfig, TurnDetector, TurnEvent, UtteranceAudio};
