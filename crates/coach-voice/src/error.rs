//! Error types for the voice conversation engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClientError;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device busy: {0}")]
    DeviceBusy(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Service error: {0}")]
    Service(String),

    /// A result arrived for a cycle that has since been superseded.
    #[error("Stale result discarded (cycle {cycle}, current {current})")]
    StaleResultDiscarded { cycle: u64, current: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Voice session channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(String),
}

/// Coarse failure category surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    DeviceBusy,
    Device,
    Network,
    Timeout,
    Service,
    Internal,
}

impl VoiceError {
    /// Fatal errors end the session and are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VoiceError::PermissionDenied(_))
    }

    /// Errors worth another attempt after a delay or backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoiceError::DeviceBusy(_) | VoiceError::Network(_) | VoiceError::Timeout
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            VoiceError::PermissionDenied(_) => FailureKind::PermissionDenied,
            VoiceError::DeviceBusy(_) => FailureKind::DeviceBusy,
            VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) | VoiceError::Playback(_) => {
                FailureKind::Device
            }
            VoiceError::Network(_) => FailureKind::Network,
            VoiceError::Timeout => FailureKind::Timeout,
            VoiceError::Service(_) => FailureKind::Service,
            VoiceError::StaleResultDiscarded { .. }
            | VoiceError::Config(_)
            | VoiceError::ChannelClosed
            | VoiceError::Io(_) => FailureKind::Internal,
        }
    }
}

impl From<ClientError> for VoiceError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout => VoiceError::Timeout,
            ClientError::Network(msg) => VoiceError::Network(msg),
            ClientError::Service(msg) => VoiceError::Service(msg),
        }
    }
}

impl From<std::io::Error> for VoiceError {
    fn from(err: std::io::Error) -> Self {
        VoiceError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

impl From<hound::Error> for VoiceError {
    fn from(err: hound::Error) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

#[cfg(feature = "hardware")]
mod device_errors {
    use super::VoiceError;

    fn looks_like_permission(msg: &str) -> bool {
        let lower = msg.to_lowercase();
        lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    }

    impl From<cpal::DevicesError> for VoiceError {
        fn from(err: cpal::DevicesError) -> Self {
            VoiceError::AudioDevice(err.to_string())
        }
    }

    impl From<cpal::DefaultStreamConfigError> for VoiceError {
        fn from(err: cpal::DefaultStreamConfigError) -> Self {
            let msg = err.to_string();
            match err {
                cpal::DefaultStreamConfigError::DeviceNotAvailable => VoiceError::DeviceBusy(msg),
                _ => VoiceError::AudioDevice(msg),
            }
        }
    }

    impl From<cpal::BuildStreamError> for VoiceError {
        fn from(err: cpal::BuildStreamError) -> Self {
            let msg = err.to_string();
            match err {
                cpal::BuildStreamError::DeviceNotAvailable => VoiceError::DeviceBusy(msg),
                cpal::BuildStreamError::BackendSpecific { .. } if looks_like_permission(&msg) => {
                    VoiceError::PermissionDenied(msg)
                }
                _ => VoiceError::AudioStream(msg),
            }
        }
    }

    impl From<cpal::PlayStreamError> for VoiceError {
        fn from(err: cpal::PlayStreamError) -> Self {
            let msg = err.to_string();
            match err {
                cpal::PlayStreamError::DeviceNotAvailable => VoiceError::DeviceBusy(msg),
                cpal::PlayStreamError::BackendSpecific { .. } if looks_like_permission(&msg) => {
                    VoiceError::PermissionDenied(msg)
                }
                _ => VoiceError::AudioStream(msg),
            }
        }
    }
}
