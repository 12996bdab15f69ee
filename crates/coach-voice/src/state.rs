//! The conversation state machine.
//!
//! `VoiceState` is the single source of truth for where a session is. The
//! transition table below is the only way it changes; UI flags such as
//! "is listening" or "show spinner" are projections of it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
    Interrupted,
    Error,
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    SessionStart,
    UtteranceCaptured,
    UtteranceDiscarded,
    EmptyTranscript,
    TranscriptionFailed,
    ResponseFailed,
    ResponseReceived,
    PlaybackCompleted,
    BargeIn,
    ManualInterrupt,
    SynthesisFailed,
    PlaybackFailed,
    /// Leaving `Interrupted` for the new utterance.
    Resume,
    Retry,
    CaptureFailed,
    Fatal,
    Teardown,
}

/// The transition table. `None` means the trigger is not legal in `from`.
pub fn next_state(from: VoiceState, trigger: Trigger) -> Option<VoiceState> {
    use Trigger as T;
    use VoiceState as S;

    match (from, trigger) {
        (_, T::Teardown) | (_, T::Fatal) => Some(S::Idle),

        (S::Idle, T::SessionStart) => Some(S::Listening),
        (S::Error, T::SessionStart) | (S::Error, T::Retry) => Some(S::Listening),
        (S::Idle, T::CaptureFailed) | (S::Error, T::CaptureFailed) => Some(S::Error),

        (S::Listening, T::UtteranceCaptured) => Some(S::Processing),
        (S::Listening, T::UtteranceDiscarded) => Some(S::Listening),
        (S::Listening, T::CaptureFailed) => Some(S::Error),

        (S::Processing, T::TranscriptionFailed) | (S::Processing, T::ResponseFailed) => {
            Some(S::Error)
        }
        (S::Processing, T::PlaybackFailed) => Some(S::Error),
        (S::Processing, T::EmptyTranscript) => Some(S::Listening),
        (S::Processing, T::ResponseReceived) => Some(S::Speaking),

        (S::Speaking, T::PlaybackCompleted) => Some(S::Listening),
        (S::Speaking, T::BargeIn) | (S::Speaking, T::ManualInterrupt) => Some(S::Interrupted),
        (S::Speaking, T::SynthesisFailed)
        | (S::Speaking, T::PlaybackFailed)
        | (S::Speaking, T::CaptureFailed) => Some(S::Error),

        (S::Interrupted, T::Resume) => Some(S::Listening),
        (S::Interrupted, T::CaptureFailed) => Some(S::Error),

        _ => None,
    }
}

impl VoiceState {
    /// The microphone should be live in this state (barge-in adds `Speaking`).
    pub fn is_capturing_expected(self, barge_in_enabled: bool) -> bool {
        match self {
            VoiceState::Listening | VoiceState::Interrupted => true,
            VoiceState::Speaking => barge_in_enabled,
            _ => false,
        }
    }

    /// Waiting on a backend; the UI shows progress.
    pub fn is_busy(self) -> bool {
        self == VoiceState::Processing
    }

    pub fn is_error(self) -> bool {
        self == VoiceState::Error
    }

    pub fn is_speaking(self) -> bool {
        self == VoiceState::Speaking
    }

    /// A session exists (anything but `Idle`).
    pub fn is_active(self) -> bool {
        self != VoiceState::Idle
    }

    pub fn label(self) -> &'static str {
        match self {
            VoiceState::Idle => "Tap to talk",
            VoiceState::Listening => "Listening…",
            VoiceState::Processing => "Thinking…",
            VoiceState::Speaking => "Speaking",
            VoiceState::Interrupted => "Go ahead",
            VoiceState::Error => "Something went wrong",
        }
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
