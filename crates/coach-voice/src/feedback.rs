//! UI feedback bridge.
//!
//! The orchestrator pushes state changes, level samples, captions, and error
//! notices through [`UiFeedback`]. Implementations must return quickly; a UI
//! that needs to do real work should hand the value to its own thread.

use crate::audio::AudioLevelSample;
use crate::error::{FailureKind, VoiceError};
use crate::session::TranscriptSegment;
use crate::state::{Trigger, VoiceState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: VoiceState,
    pub to: VoiceState,
    pub trigger: Trigger,
    pub at: DateTime<Utc>,
}

/// A failure the user should see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: FailureKind,
    pub message: String,
    /// Offer a retry button.
    pub retryable: bool,
    /// Too many failures in a row; suggest trying again later.
    pub give_up: bool,
}

impl ErrorNotice {
    pub fn from_error(err: &VoiceError, give_up: bool) -> Self {
        Self {
            kind: err.failure_kind(),
            message: short_reason(err),
            retryable: !err.is_fatal() && !give_up,
            give_up,
        }
    }
}

fn short_reason(err: &VoiceError) -> String {
    match err {
        VoiceError::PermissionDenied(_) => "Microphone access is off.".to_string(),
        VoiceError::DeviceBusy(_) => "The microphone is in use by another app.".to_string(),
        VoiceError::Network(_) => "Connection problem.".to_string(),
        VoiceError::Timeout => "The coach took too long to answer.".to_string(),
        VoiceError::Service(_) => "The coach is unavailable right now.".to_string(),
        VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) | VoiceError::Playback(_) => {
            "Audio device problem.".to_string()
        }
        other => other.to_string(),
    }
}

/// Push interface implemented by the UI layer.
pub trait UiFeedback: Send + Sync {
    fn on_state(&self, change: &StateChange);
    fn on_level(&self, sample: &AudioLevelSample);
    fn on_transcript(&self, segment: &TranscriptSegment);
    fn on_error(&self, notice: &ErrorNotice);
}

/// Logs everything through `tracing`. Useful headless and in demos.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl UiFeedback for TracingFeedback {
    fn on_state(&self, change: &StateChange) {
        info!("🔄 {} -> {} ({:?})", change.from, change.to, change.trigger);
    }

    fn on_level(&self, sample: &AudioLevelSample) {
        debug!("level {:?} {:.1} dBFS", sample.source, sample.dbfs);
    }

    fn on_transcript(&self, segment: &TranscriptSegment) {
        if segment.is_final {
            info!("📝 [{}] {}", segment.seq, segment.text);
        } else {
            debug!("📝 [{}] {}…", segment.seq, segment.text);
        }
    }

    fn on_error(&self, notice: &ErrorNotice) {
        if notice.give_up {
            error!("❌ {} (giving up, try again later)", notice.message);
        } else {
            warn!("⚠️ {} (retryable: {})", notice.message, notice.retryable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_not_retryable() {
        let notice = ErrorNotice::from_error(&VoiceError::PermissionDenied("os".into()), false);
        assert_eq!(notice.kind, FailureKind::PermissionDenied);
        assert!(!notice.retryable);
    }

    #[test]
    fn give_up_withdraws_retry() {
        let notice = ErrorNotice::from_error(&VoiceError::Timeout, true);
        assert!(notice.give_up);
        assert!(!notice.retryable);
        assert_eq!(notice.message, "The coach took too long to answer.");
    }
}
