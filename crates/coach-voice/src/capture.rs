//! Audio capture source contract.
//!
//! A capture source owns the microphone. Only the orchestrator calls `start`
//! and `stop`; everything downstream sees frames and levels through the
//! channels handed out by `start`.

use crate::audio::{AudioFrame, LevelReceiver};
use crate::error::VoiceResult;
use tokio::sync::mpsc;

/// Channels produced by one capture run.
#[derive(Debug)]
pub struct CaptureStreams {
    /// Frames in capture order. Closes when the capture stops or the device is lost.
    pub frames: mpsc::UnboundedReceiver<AudioFrame>,
    /// Lossy loudness telemetry derived from the frames.
    pub levels: LevelReceiver,
}

/// Exclusive owner of a microphone.
pub trait CaptureSource: Send {
    /// Acquire the device and begin producing frames.
    ///
    /// Fails with `PermissionDenied` when the user declined microphone access
    /// and `DeviceBusy` when a capture is already running or the hardware is
    /// claimed elsewhere.
    fn start(&mut self) -> VoiceResult<CaptureStreams>;

    /// Release the device. Calling this while not capturing is a no-op.
    fn stop(&mut self);

    /// Whether the device is currently held.
    fn is_acquired(&self) -> bool;
}
