//! Deterministic in-memory devices and backends.
//!
//! Used by the demo and the test suites to run whole conversations without
//! audio hardware or network access. Everything here is driven by tokio time,
//! so tests under a paused clock run instantly and reproducibly.

use crate::audio::{
    level_channel, AudioConfig, AudioFrame, AudioLevelSample, LevelSender, LevelSource,
};
use crate::capture::{CaptureSource, CaptureStreams};
use crate::client::ClientError;
use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::feedback::{ErrorNotice, StateChange, UiFeedback};
use crate::orchestrator::{ConversationOrchestrator, VoiceComponents, VoiceHandle};
use crate::playback::{
    ChunkSender, PlaybackChunk, PlaybackHandle, PlaybackNotice, PlaybackNoticeKind, PlaybackSink,
    PlaybackStreams,
};
use crate::response::{ChatTurn, Responder};
use crate::session::TranscriptSegment;
use crate::state::VoiceState;
use crate::stt::{PartialSink, Transcriber};
use crate::synthesis::{SynthesisRequest, Synthesizer, SYNTHESIS_SAMPLE_RATE};
use crate::turn::UtteranceAudio;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const SCENARIO_TRANSCRIPT: &str = "I feel anxious today";
pub const SCENARIO_REPLY: &str = "That sounds tough, want to talk about it?";

const SPEECH_AMPLITUDE: f32 = 0.3;
const REPLY_AMPLITUDE: f32 = 0.1;
/// 250ms per synthesized chunk.
const CHUNK_SAMPLES: usize = 4000;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn tone(len: usize, amplitude: f32, offset: u64) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * ((offset as usize * len + i) as f32 * 0.2).sin())
        .collect()
}

// -----------------------------------------------------------------------------
// Device log
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    CaptureAcquired,
    CaptureReleased,
    PlaybackAcquired(PlaybackHandle),
    ChunkRendered { handle: PlaybackHandle, seq: u32 },
    PlaybackCancelled(PlaybackHandle),
    PlaybackReleased(PlaybackHandle),
}

/// Ordered record of everything the scripted devices did.
#[derive(Debug, Clone)]
pub struct DeviceLog {
    tx: Arc<watch::Sender<Vec<DeviceEvent>>>,
}

impl Default for DeviceLog {
    fn default() -> Self {
        Self {
            tx: Arc::new(watch::channel(Vec::new()).0),
        }
    }
}

impl DeviceLog {
    pub fn record(&self, event: DeviceEvent) {
        debug!("device: {:?}", event);
        self.tx.send_modify(|events| events.push(event));
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.tx.borrow().clone()
    }

    /// Sequence numbers of every rendered chunk, in render order.
    pub fn rendered(&self) -> Vec<u32> {
        self.tx
            .borrow()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::ChunkRendered { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    pub fn capture_held(&self) -> bool {
        let events = self.tx.borrow();
        let acquired = events.iter().filter(|e| **e == DeviceEvent::CaptureAcquired).count();
        let released = events.iter().filter(|e| **e == DeviceEvent::CaptureReleased).count();
        acquired > released
    }

    pub fn playback_held(&self) -> bool {
        let events = self.tx.borrow();
        let acquired = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::PlaybackAcquired(_)))
            .count();
        let released = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::PlaybackReleased(_)))
            .count();
        acquired > released
    }

    pub async fn wait_until(&self, mut done: impl FnMut(&[DeviceEvent]) -> bool) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|events| done(events)).await;
    }
}

// -----------------------------------------------------------------------------
// Capture
// -----------------------------------------------------------------------------

#[derive(Default)]
struct MicState {
    live: Option<(mpsc::UnboundedSender<AudioFrame>, LevelSender)>,
    next_seq: u64,
    start_failures: VecDeque<VoiceError>,
}

/// Capture source fed by a [`MicFeeder`].
pub struct ScriptedCapture {
    mic: Arc<Mutex<MicState>>,
    log: DeviceLog,
    level_window: usize,
}

/// Test-side control of a [`ScriptedCapture`].
#[derive(Clone)]
pub struct MicFeeder {
    mic: Arc<Mutex<MicState>>,
    config: AudioConfig,
}

pub fn scripted_capture(config: &AudioConfig, log: DeviceLog) -> (ScriptedCapture, MicFeeder) {
    let mic = Arc::new(Mutex::new(MicState::default()));
    (
        ScriptedCapture {
            mic: Arc::clone(&mic),
            log,
            level_window: config.level_window,
        },
        MicFeeder {
            mic,
            config: config.clone(),
        },
    )
}

impl CaptureSource for ScriptedCapture {
    fn start(&mut self) -> VoiceResult<CaptureStreams> {
        let mut mic = lock(&self.mic);
        if mic.live.is_some() {
            return Err(VoiceError::DeviceBusy("scripted microphone already capturing".to_string()));
        }
        if let Some(err) = mic.start_failures.pop_front() {
            return Err(err);
        }
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (level_tx, level_rx) = level_channel(self.level_window);
        mic.live = Some((frame_tx, level_tx));
        mic.next_seq = 0;
        self.log.record(DeviceEvent::CaptureAcquired);
        Ok(CaptureStreams {
            frames: frame_rx,
            levels: level_rx,
        })
    }

    fn stop(&mut self) {
        if lock(&self.mic).live.take().is_some() {
            self.log.record(DeviceEvent::CaptureReleased);
        }
    }

    fn is_acquired(&self) -> bool {
        lock(&self.mic).live.is_some()
    }
}

impl Drop for ScriptedCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MicFeeder {
    /// Push `duration` of speech. Returns the number of frames delivered.
    pub fn speech(&self, duration: Duration) -> usize {
        self.feed(duration, true)
    }

    pub fn silence(&self, duration: Duration) -> usize {
        self.feed(duration, false)
    }

    /// One loud frame, not delivered anywhere.
    pub fn speech_frame(&self, seq: u64) -> AudioFrame {
        AudioFrame::new(
            seq,
            tone(self.config.frame_samples, SPEECH_AMPLITUDE, seq),
            self.config.sample_rate,
        )
    }

    pub fn is_live(&self) -> bool {
        lock(&self.mic).live.is_some()
    }

    /// Make the next `start` fail with `err`. Calls queue up.
    pub fn fail_next_start(&self, err: VoiceError) {
        lock(&self.mic).start_failures.push_back(err);
    }

    /// Simulate the device going away mid-capture. The frame stream closes
    /// but the source still counts as acquired until stopped.
    pub fn disconnect(&self) {
        let mut mic = lock(&self.mic);
        if let Some((frames, levels)) = mic.live.take() {
            drop(frames);
            // Keep a closed sender so the source still reads as acquired.
            let (closed, _) = mpsc::unbounded_channel();
            mic.live = Some((closed, levels));
        }
    }

    fn feed(&self, duration: Duration, speech: bool) -> usize {
        let frame_ms = self.config.frame_duration().as_millis().max(1);
        let count = (duration.as_millis() / frame_ms) as usize;
        let mut mic = lock(&self.mic);
        let mut delivered = 0;
        for _ in 0..count {
            let seq = mic.next_seq;
            let Some((frames, levels)) = mic.live.as_ref() else {
                break;
            };
            let samples = if speech {
                tone(self.config.frame_samples, SPEECH_AMPLITUDE, seq)
            } else {
                vec![0.0; self.config.frame_samples]
            };
            let frame = AudioFrame::new(seq, samples, self.config.sample_rate);
            levels.send(AudioLevelSample::from_samples(LevelSource::Capture, &frame.samples));
            if frames.send(frame).is_err() {
                break;
            }
            mic.next_seq += 1;
            delivered += 1;
        }
        delivered
    }
}

// -----------------------------------------------------------------------------
// Playback
// -----------------------------------------------------------------------------

struct ActiveRender {
    handle: PlaybackHandle,
    done: Arc<Mutex<bool>>,
    cancel: CancellationToken,
}

/// Playback sink that "renders" each chunk by waiting for its duration.
pub struct ScriptedPlayback {
    log: DeviceLog,
    next_handle: u64,
    active: Option<ActiveRender>,
    play_failures: Arc<Mutex<VecDeque<VoiceError>>>,
}

impl ScriptedPlayback {
    pub fn new(log: DeviceLog) -> Self {
        Self {
            log,
            next_handle: 0,
            active: None,
            play_failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue failures for upcoming `play` calls.
    pub fn failures(&self) -> Arc<Mutex<VecDeque<VoiceError>>> {
        Arc::clone(&self.play_failures)
    }
}

impl PlaybackSink for ScriptedPlayback {
    fn play(
        &mut self,
        mut chunks: mpsc::Receiver<PlaybackChunk>,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
    ) -> VoiceResult<PlaybackStreams> {
        if let Some(active) = &self.active {
            let handle = active.handle;
            self.cancel(handle);
        }
        if let Some(err) = lock(&self.play_failures).pop_front() {
            return Err(err);
        }

        self.next_handle += 1;
        let handle = PlaybackHandle(self.next_handle);
        let done = Arc::new(Mutex::new(false));
        let cancel = CancellationToken::new();
        let (level_tx, level_rx) = level_channel(crate::audio::DEFAULT_LEVEL_WINDOW);
        self.log.record(DeviceEvent::PlaybackAcquired(handle));

        let log = self.log.clone();
        let task_done = Arc::clone(&done);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,
                    chunk = chunks.recv() => chunk,
                };
                let Some(chunk) = next else {
                    let mut done = lock(&task_done);
                    if !*done {
                        *done = true;
                        log.record(DeviceEvent::PlaybackReleased(handle));
                        let _ = notices.send(PlaybackNotice {
                            handle,
                            kind: PlaybackNoticeKind::Finished,
                        });
                    }
                    return;
                };

                let render = crate::audio::samples_duration(chunk.samples.len(), chunk.sample_rate);
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,
                    _ = tokio::time::sleep(render) => {}
                }

                let done = lock(&task_done);
                if *done {
                    return;
                }
                log.record(DeviceEvent::ChunkRendered {
                    handle,
                    seq: chunk.seq,
                });
                level_tx.send(AudioLevelSample::from_samples(LevelSource::Playback, &chunk.samples));
                let _ = notices.send(PlaybackNotice {
                    handle,
                    kind: PlaybackNoticeKind::ChunkRendered { seq: chunk.seq },
                });
            }
        });

        self.active = Some(ActiveRender {
            handle,
            done,
            cancel,
        });
        Ok(PlaybackStreams {
            handle,
            levels: level_rx,
        })
    }

    fn cancel(&mut self, handle: PlaybackHandle) {
        let matches = self.active.as_ref().map(|a| a.handle == handle).unwrap_or(false);
        if !matches {
            return;
        }
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            let mut done = lock(&active.done);
            if !*done {
                *done = true;
                self.log.record(DeviceEvent::PlaybackCancelled(handle));
                self.log.record(DeviceEvent::PlaybackReleased(handle));
            }
        }
    }

    fn is_acquired(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| !*lock(&a.done))
            .unwrap_or(false)
    }
}

impl Drop for ScriptedPlayback {
    fn drop(&mut self) {
        if let Some(handle) = self.active.as_ref().map(|a| a.handle) {
            self.cancel(handle);
        }
    }
}

// -----------------------------------------------------------------------------
// Backends
// -----------------------------------------------------------------------------

/// Returns a fixed transcript, revealing it word by word as partials.
pub struct ScriptedTranscriber {
    text: Mutex<String>,
    delay: Duration,
    outcomes: Mutex<VecDeque<Result<String, ClientError>>>,
    received: Mutex<Vec<Vec<u64>>>,
}

impl ScriptedTranscriber {
    pub fn new(text: impl Into<String>, delay: Duration) -> Self {
        Self {
            text: Mutex::new(text.into()),
            delay,
            outcomes: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *lock(&self.text) = text.into();
    }

    /// Override the next call's result.
    pub fn push_outcome(&self, outcome: Result<String, ClientError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Frame sequence numbers of every utterance received.
    pub fn received(&self) -> Vec<Vec<u64>> {
        lock(&self.received).clone()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(
        &self,
        audio: UtteranceAudio,
        partials: PartialSink,
    ) -> Result<String, ClientError> {
        lock(&self.received).push(audio.frames.iter().map(|f| f.seq).collect());
        let outcome = lock(&self.outcomes).pop_front();
        let text = lock(&self.text).clone();

        let words: Vec<&str> = text.split_whitespace().collect();
        let step = self.delay / (words.len() as u32 + 1);
        for n in 1..words.len() {
            tokio::time::sleep(step).await;
            partials.partial(words[..n].join(" "));
        }
        tokio::time::sleep(step).await;
        outcome.unwrap_or(Ok(text))
    }
}

/// Returns a fixed reply after a delay.
pub struct ScriptedResponder {
    reply: Mutex<String>,
    delay: Duration,
    outcomes: Mutex<VecDeque<Result<String, ClientError>>>,
    requests: Mutex<Vec<(String, Vec<ChatTurn>)>>,
}

impl ScriptedResponder {
    pub fn new(reply: impl Into<String>, delay: Duration) -> Self {
        Self {
            reply: Mutex::new(reply.into()),
            delay,
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_outcome(&self, outcome: Result<String, ClientError>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Every transcript and history the responder was called with.
    pub fn requests(&self) -> Vec<(String, Vec<ChatTurn>)> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, transcript: &str, history: &[ChatTurn]) -> Result<String, ClientError> {
        lock(&self.requests).push((transcript.to_string(), history.to_vec()));
        let outcome = lock(&self.outcomes).pop_front();
        tokio::time::sleep(self.delay).await;
        outcome.unwrap_or_else(|| Ok(lock(&self.reply).clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Chunks(u32),
    Fail(ClientError),
    /// Push this many chunks, then fail.
    FailAfter(u32, ClientError),
    /// Push this many chunks, then go quiet without finishing.
    StallAfter(u32),
}

/// Produces a fixed number of tone chunks per request.
pub struct ScriptedSynthesizer {
    chunks: u32,
    interval: Duration,
    outcomes: Mutex<VecDeque<SynthesisOutcome>>,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl ScriptedSynthesizer {
    pub fn new(chunks: u32, interval: Duration) -> Self {
        Self {
            chunks,
            interval,
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_outcome(&self, outcome: SynthesisOutcome) {
        lock(&self.outcomes).push_back(outcome);
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        chunks: ChunkSender,
    ) -> Result<(), ClientError> {
        lock(&self.requests).push(request);
        let outcome = lock(&self.outcomes)
            .pop_front()
            .unwrap_or(SynthesisOutcome::Chunks(self.chunks));
        let (count, failure, stall) = match outcome {
            SynthesisOutcome::Chunks(n) => (n, None, false),
            SynthesisOutcome::Fail(err) => (0, Some(err), false),
            SynthesisOutcome::FailAfter(n, err) => (n, Some(err), false),
            SynthesisOutcome::StallAfter(n) => (n, None, true),
        };
        for i in 0..count {
            tokio::time::sleep(self.interval).await;
            chunks
                .push(tone(CHUNK_SAMPLES, REPLY_AMPLITUDE, i as u64), SYNTHESIS_SAMPLE_RATE)
                .await?;
        }
        if stall {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// -----------------------------------------------------------------------------
// Feedback
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub changes: Vec<StateChange>,
    pub errors: Vec<ErrorNotice>,
    pub transcripts: Vec<TranscriptSegment>,
    pub levels: usize,
}

/// UI bridge that remembers everything it was told.
#[derive(Debug)]
pub struct RecordingFeedback {
    tx: watch::Sender<Recorded>,
}

impl Default for RecordingFeedback {
    fn default() -> Self {
        Self {
            tx: watch::channel(Recorded::default()).0,
        }
    }
}

impl RecordingFeedback {
    pub fn snapshot(&self) -> Recorded {
        self.tx.borrow().clone()
    }

    /// States visited, starting with the first `from`.
    pub fn state_path(&self) -> Vec<VoiceState> {
        let recorded = self.tx.borrow();
        let mut path = Vec::with_capacity(recorded.changes.len() + 1);
        if let Some(first) = recorded.changes.first() {
            path.push(first.from);
        }
        path.extend(recorded.changes.iter().map(|c| c.to));
        path
    }

    pub fn errors(&self) -> Vec<ErrorNotice> {
        self.tx.borrow().errors.clone()
    }

    pub fn transcripts(&self) -> Vec<TranscriptSegment> {
        self.tx.borrow().transcripts.clone()
    }

    pub fn current_state(&self) -> VoiceState {
        self.tx
            .borrow()
            .changes
            .last()
            .map(|c| c.to)
            .unwrap_or_default()
    }

    pub async fn wait_until(&self, mut done: impl FnMut(&Recorded) -> bool) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|recorded| done(recorded)).await;
    }

    /// Wait until the recorded state path ends with `tail`.
    pub async fn wait_for_path(&self, tail: &[VoiceState]) {
        self.wait_until(|r| {
            let to: Vec<VoiceState> = r.changes.iter().map(|c| c.to).collect();
            to.ends_with(tail)
        })
        .await;
    }
}

impl UiFeedback for RecordingFeedback {
    fn on_state(&self, change: &StateChange) {
        self.tx.send_modify(|r| r.changes.push(*change));
    }

    fn on_level(&self, _sample: &AudioLevelSample) {
        self.tx.send_modify(|r| r.levels += 1);
    }

    fn on_transcript(&self, segment: &TranscriptSegment) {
        self.tx.send_modify(|r| r.transcripts.push(segment.clone()));
    }

    fn on_error(&self, notice: &ErrorNotice) {
        self.tx.send_modify(|r| r.errors.push(notice.clone()));
    }
}

// -----------------------------------------------------------------------------
// Rig
// -----------------------------------------------------------------------------

/// A fully scripted engine plus the handles used to drive and observe it.
pub struct ScriptedRig {
    pub handle: VoiceHandle,
    pub mic: MicFeeder,
    pub devices: DeviceLog,
    pub ui: Arc<RecordingFeedback>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub responder: Arc<ScriptedResponder>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    playback_failures: Arc<Mutex<VecDeque<VoiceError>>>,
    task: Option<JoinHandle<()>>,
}

impl ScriptedRig {
    /// Build the coaching scenario without running it.
    pub fn build(config: VoiceConfig) -> (ConversationOrchestrator, Self) {
        Self::build_with_ui(config, Arc::new(RecordingFeedback::default()), None)
    }

    /// Like [`ScriptedRig::build`], also forwarding every callback to `extra`.
    pub fn build_with_ui(
        config: VoiceConfig,
        ui: Arc<RecordingFeedback>,
        extra: Option<Arc<dyn UiFeedback>>,
    ) -> (ConversationOrchestrator, Self) {
        let devices = DeviceLog::default();
        let (capture, mic) = scripted_capture(&config.audio, devices.clone());
        let playback = ScriptedPlayback::new(devices.clone());
        let playback_failures = playback.failures();
        let transcriber = Arc::new(ScriptedTranscriber::new(
            SCENARIO_TRANSCRIPT,
            Duration::from_millis(300),
        ));
        let responder = Arc::new(ScriptedResponder::new(
            SCENARIO_REPLY,
            Duration::from_millis(400),
        ));
        let synthesizer = Arc::new(ScriptedSynthesizer::new(3, Duration::from_millis(20)));

        let feedback: Arc<dyn UiFeedback> = match extra {
            Some(extra) => Arc::new(Tee {
                first: Arc::clone(&ui) as Arc<dyn UiFeedback>,
                second: extra,
            }),
            None => Arc::clone(&ui) as Arc<dyn UiFeedback>,
        };

        let components = VoiceComponents {
            capture: Box::new(capture),
            playback: Box::new(playback),
            transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            responder: Arc::clone(&responder) as Arc<dyn Responder>,
            synthesizer: Arc::clone(&synthesizer) as Arc<dyn Synthesizer>,
        };
        let (orchestrator, handle) = ConversationOrchestrator::new(config, components, feedback);
        let rig = Self {
            handle,
            mic,
            devices,
            ui,
            transcriber,
            responder,
            synthesizer,
            playback_failures,
            task: None,
        };
        (orchestrator, rig)
    }

    /// Build and spawn the run loop.
    pub fn spawn(config: VoiceConfig) -> Self {
        let (orchestrator, mut rig) = Self::build(config);
        rig.task = Some(tokio::spawn(orchestrator.run()));
        rig
    }

    /// Make the next `play` call fail with `err`. Calls queue up.
    pub fn fail_next_play(&self, err: VoiceError) {
        lock(&self.playback_failures).push_back(err);
    }

    /// Attach a run loop started elsewhere so [`ScriptedRig::finish`] can await it.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Shut the loop down and wait for it to release everything.
    pub async fn finish(mut self) {
        let _ = self.handle.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Forwards every callback to two bridges.
struct Tee {
    first: Arc<dyn UiFeedback>,
    second: Arc<dyn UiFeedback>,
}

impl UiFeedback for Tee {
    fn on_state(&self, change: &StateChange) {
        self.first.on_state(change);
        self.second.on_state(change);
    }

    fn on_level(&self, sample: &AudioLevelSample) {
        self.first.on_level(sample);
        self.second.on_level(sample);
    }

    fn on_transcript(&self, segment: &TranscriptSegment) {
        self.first.on_transcript(segment);
        self.second.on_transcript(segment);
    }

    fn on_error(&self, notice: &ErrorNotice) {
        self.first.on_error(notice);
        self.second.on_error(notice);
    }
}
