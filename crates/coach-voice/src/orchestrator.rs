//! Conversation orchestrator: the single actor owning a voice session.
//!
//! Every input (UI commands, capture frames, backend results, playback
//! progress) arrives on one ordered queue and is handled to completion before
//! the next is looked at. Handling is synchronous; anything slow is spawned
//! through [`crate::dispatch`] and comes back later as another event, tagged
//! with the cycle that was current when it was issued. A result whose cycle no
//! longer matches is dropped without side effects.
//!
//! The orchestrator is the only caller of the capture source and playback
//! sink, and the only writer of [`VoiceState`].

use crate::audio::AudioFrame;
use crate::capture::CaptureSource;
use crate::client::ClientError;
use crate::config::VoiceConfig;
use crate::dispatch;
use crate::error::{VoiceError, VoiceResult};
use crate::feedback::{ErrorNotice, StateChange, UiFeedback};
use crate::playback::{chunk_channel, PlaybackHandle, PlaybackNotice, PlaybackNoticeKind, PlaybackSink};
use crate::response::Responder;
use crate::session::{HistoryEntry, TranscriptSegment, UtteranceRecord, VoiceSession};
use crate::settings::{TurnMode, VoiceSettings};
use crate::state::{next_state, Trigger, VoiceState};
use crate::stt::Transcriber;
use crate::synthesis::{SynthesisRequest, Synthesizer};
use crate::turn::{EndReason, TurnDetector, TurnEvent, UtteranceAudio};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Requests from the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartSession,
    ManualPress,
    ManualStop,
    Retry,
    UpdateSettings(VoiceSettings),
    Teardown,
    /// Teardown and end the run loop.
    Shutdown,
}

/// Everything the actor reacts to.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Command(Command),
    Frame {
        epoch: u64,
        frame: AudioFrame,
    },
    CaptureLost {
        epoch: u64,
    },
    Partial {
        cycle: u64,
        text: String,
    },
    TranscriptReady {
        cycle: u64,
        result: Result<String, ClientError>,
    },
    ResponseReady {
        cycle: u64,
        result: Result<String, ClientError>,
    },
    SynthesisDone {
        cycle: u64,
        result: Result<(), ClientError>,
    },
    Playback {
        cycle: u64,
        notice: PlaybackNotice,
    },
}

/// Hardware and backends driven by the orchestrator.
pub struct VoiceComponents {
    pub capture: Box<dyn CaptureSource>,
    pub playback: Box<dyn PlaybackSink>,
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Cloneable handle for the UI layer.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl VoiceHandle {
    fn send(&self, command: Command) -> VoiceResult<()> {
        self.tx
            .send(SessionEvent::Command(command))
            .map_err(|_| VoiceError::ChannelClosed)
    }

    pub fn start_session(&self) -> VoiceResult<()> {
        self.send(Command::StartSession)
    }

    /// Push-to-talk press (or interrupt playback and talk).
    pub fn manual_press(&self) -> VoiceResult<()> {
        self.send(Command::ManualPress)
    }

    /// End the current utterance, or cut off the coach while it is speaking.
    pub fn manual_stop(&self) -> VoiceResult<()> {
        self.send(Command::ManualStop)
    }

    pub fn retry(&self) -> VoiceResult<()> {
        self.send(Command::Retry)
    }

    /// Takes effect at the next cycle boundary.
    pub fn update_settings(&self, settings: VoiceSettings) -> VoiceResult<()> {
        self.send(Command::UpdateSettings(settings))
    }

    pub fn teardown(&self) -> VoiceResult<()> {
        self.send(Command::Teardown)
    }

    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(Command::Shutdown)
    }
}

/// Utterance currently open in the turn detector.
#[derive(Debug, Clone, Copy)]
struct OpenUtterance {
    id: Uuid,
    started_at: DateTime<Utc>,
}

/// The reply being spoken.
#[derive(Debug)]
struct ActiveReply {
    response_id: Uuid,
    text: String,
    handle: PlaybackHandle,
    pumps: CancellationToken,
}

pub struct ConversationOrchestrator {
    config: VoiceConfig,
    state: VoiceState,
    session: Option<VoiceSession>,
    settings: VoiceSettings,
    pending_settings: Option<VoiceSettings>,

    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    ui: Arc<dyn UiFeedback>,

    detector: TurnDetector,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    /// Bumped whenever outstanding work becomes stale.
    cycle: u64,
    /// Bumped on every capture start and stop.
    capture_epoch: u64,
    capture_live: bool,
    capture_pumps: Option<CancellationToken>,
    /// Token of the in-flight backend call, if any.
    work: Option<CancellationToken>,
    reply: Option<ActiveReply>,

    utterance: Option<OpenUtterance>,
    /// The utterance being transcribed or answered.
    in_flight: Option<UtteranceRecord>,
    caption_seq: u32,

    consecutive_failures: u32,
    gave_up: bool,
    shutdown: bool,
}

impl ConversationOrchestrator {
    pub fn new(
        config: VoiceConfig,
        components: VoiceComponents,
        ui: Arc<dyn UiFeedback>,
    ) -> (Self, VoiceHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let settings = config.settings.clone().normalized();
        let detector = TurnDetector::new(config.turn.clone(), settings.turn_mode);
        let handle = VoiceHandle {
            tx: events_tx.clone(),
        };

        info!("🎙️ Conversation orchestrator ready");
        let orchestrator = Self {
            config,
            state: VoiceState::Idle,
            session: None,
            settings,
            pending_settings: None,
            capture: components.capture,
            playback: components.playback,
            transcriber: components.transcriber,
            responder: components.responder,
            synthesizer: components.synthesizer,
            ui,
            detector,
            events_tx,
            events_rx,
            cycle: 0,
            capture_epoch: 0,
            capture_live: false,
            capture_pumps: None,
            work: None,
            reply: None,
            utterance: None,
            in_flight: None,
            caption_seq: 0,
            consecutive_failures: 0,
            gave_up: false,
            shutdown: false,
        };
        (orchestrator, handle)
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn session(&self) -> Option<&VoiceSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn handle(&self) -> VoiceHandle {
        VoiceHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Drain the queue until shutdown.
    pub async fn run(mut self) {
        info!("▶️ Voice loop running");
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
            if self.shutdown {
                break;
            }
        }
        self.release_all();
        info!("⏹️ Voice loop stopped");
    }

    /// Handle one queued event. Returns `false` if the queue is closed.
    pub(crate) async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// One tick.
    pub(crate) fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(command) => self.on_command(command),
            SessionEvent::Frame { epoch, frame } => {
                if epoch != self.capture_epoch || !self.capture_live {
                    return;
                }
                let turns = self.detector.process_frame(&frame);
                self.on_turn_events(turns);
            }
            SessionEvent::CaptureLost { epoch } => self.on_capture_lost(epoch),
            SessionEvent::Partial { cycle, text } => {
                if self.is_current(cycle) && self.state == VoiceState::Processing {
                    self.caption(text, false);
                }
            }
            SessionEvent::TranscriptReady { cycle, result } => {
                if self.is_current(cycle) {
                    self.on_transcript(result);
                }
            }
            SessionEvent::ResponseReady { cycle, result } => {
                if self.is_current(cycle) {
                    self.on_response(result);
                }
            }
            SessionEvent::SynthesisDone { cycle, result } => {
                if self.is_current(cycle) {
                    self.on_synthesis_done(result);
                }
            }
            SessionEvent::Playback { cycle, notice } => {
                if self.is_current(cycle) {
                    self.on_playback(notice);
                }
            }
        }
    }

    fn is_current(&self, cycle: u64) -> bool {
        if cycle == self.cycle {
            return true;
        }
        let stale = VoiceError::StaleResultDiscarded {
            cycle,
            current: self.cycle,
        };
        debug!("{}", stale);
        false
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        debug!("command {:?} in {}", command, self.state);
        match command {
            Command::StartSession => self.start_session(),
            Command::ManualPress => self.manual_press(),
            Command::ManualStop => self.manual_stop(),
            Command::Retry => self.retry(),
            Command::UpdateSettings(settings) => {
                self.pending_settings = Some(settings.normalized());
                self.apply_pending_settings();
            }
            Command::Teardown => self.teardown(),
            Command::Shutdown => {
                self.teardown();
                self.shutdown = true;
            }
        }
    }

    fn start_session(&mut self) {
        match self.state {
            VoiceState::Idle => {
                self.apply_pending_settings();
                let session = VoiceSession::new(self.settings.clone());
                info!("🆕 Voice session {} starting", session.id);
                self.session = Some(session);
                self.consecutive_failures = 0;
                self.gave_up = false;
                self.begin_listening(Trigger::SessionStart);
            }
            VoiceState::Error => {
                info!("🔁 Restarting voice session after error");
                self.consecutive_failures = 0;
                self.gave_up = false;
                if self.session.is_none() {
                    self.session = Some(VoiceSession::new(self.settings.clone()));
                }
                self.begin_listening(Trigger::SessionStart);
            }
            _ => debug!("session already active"),
        }
    }

    fn retry(&mut self) {
        if self.state != VoiceState::Error {
            debug!("retry ignored in {}", self.state);
            return;
        }
        if self.gave_up {
            warn!("retry refused after {} consecutive failures", self.consecutive_failures);
            return;
        }
        self.begin_listening(Trigger::Retry);
    }

    /// Acquire the microphone and enter `Listening` via `trigger`.
    fn begin_listening(&mut self, trigger: Trigger) {
        match self.start_capture(false) {
            Ok(()) => {
                self.transition(trigger);
                self.apply_pending_settings();
            }
            Err(err) => self.fail(Trigger::CaptureFailed, err),
        }
    }

    fn manual_press(&mut self) {
        match self.state {
            VoiceState::Listening => {
                let turns = self.detector.press();
                self.on_turn_events(turns);
            }
            VoiceState::Speaking => {
                self.interrupt(Trigger::ManualInterrupt);
                if self.state == VoiceState::Listening {
                    let turns = self.detector.press();
                    self.on_turn_events(turns);
                }
            }
            _ => debug!("press ignored in {}", self.state),
        }
    }

    fn manual_stop(&mut self) {
        match self.state {
            VoiceState::Listening => {
                let turns = self.detector.manual_stop();
                self.on_turn_events(turns);
            }
            VoiceState::Speaking => self.interrupt(Trigger::ManualInterrupt),
            _ => debug!("manual stop ignored in {}", self.state),
        }
    }

    fn teardown(&mut self) {
        if self.state == VoiceState::Idle && self.session.is_none() {
            self.release_all();
            return;
        }
        info!("🧹 Tearing down voice session");
        self.release_all();
        self.transition(Trigger::Teardown);
        self.session = None;
        self.apply_pending_settings();
    }

    // ---------------------------------------------------------------------
    // Turn detection
    // ---------------------------------------------------------------------

    fn on_turn_events(&mut self, turns: Vec<TurnEvent>) {
        for turn in turns {
            match turn {
                TurnEvent::UtteranceStarted {
                    utterance_id,
                    timestamp,
                } => self.on_utterance_started(utterance_id, timestamp),
                TurnEvent::UtteranceEnded {
                    utterance_id,
                    timestamp,
                    reason,
                    audio,
                } => self.on_utterance_ended(utterance_id, timestamp, reason, audio),
                TurnEvent::UtteranceDiscarded { utterance_id, .. } => {
                    debug!("utterance {} discarded", utterance_id);
                    self.utterance = None;
                    if self.state == VoiceState::Listening {
                        self.transition(Trigger::UtteranceDiscarded);
                        self.apply_pending_settings();
                    }
                }
            }
        }
    }

    fn on_utterance_started(&mut self, id: Uuid, at: DateTime<Utc>) {
        self.utterance = Some(OpenUtterance { id, started_at: at });
        self.caption_seq = 0;
        if self.state == VoiceState::Speaking {
            self.interrupt(Trigger::BargeIn);
        }
    }

    fn on_utterance_ended(
        &mut self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        reason: EndReason,
        audio: Option<UtteranceAudio>,
    ) {
        let started_at = self
            .utterance
            .take()
            .filter(|u| u.id == id)
            .map(|u| u.started_at)
            .unwrap_or(ended_at);
        let audio = match audio {
            Some(audio) if self.state == VoiceState::Listening => audio,
            _ => return,
        };

        self.in_flight = Some(UtteranceRecord {
            id,
            started_at,
            ended_at,
            end_reason: reason,
            duration: audio.duration,
            transcript: None,
        });
        self.stop_capture();
        self.transition(Trigger::UtteranceCaptured);

        self.cycle += 1;
        let cancel = self.new_work_token();
        dispatch::spawn_transcription(
            Arc::clone(&self.transcriber),
            audio,
            self.config.clients.transcription(),
            self.cycle,
            self.events_tx.clone(),
            cancel,
        );
    }

    /// Cut off the reply: cancel playback and synthesis, then `Interrupted` -> `Listening`.
    fn interrupt(&mut self, trigger: Trigger) {
        if self.state != VoiceState::Speaking {
            return;
        }
        info!("✋ Interrupting reply ({:?})", trigger);
        self.cancel_work();
        if let Some(reply) = self.cancel_playback() {
            if let Some(session) = self.session.as_mut() {
                session.push(HistoryEntry::Assistant {
                    response_id: reply.response_id,
                    text: reply.text,
                    interrupted: true,
                });
            }
        }
        self.cycle += 1;
        self.consecutive_failures = 0;
        self.transition(trigger);

        self.detector.set_barge_in_guard(false);
        match self.start_capture(false) {
            Ok(()) => {
                self.transition(Trigger::Resume);
                self.apply_pending_settings();
            }
            Err(err) => self.fail(Trigger::CaptureFailed, err),
        }
    }

    fn on_capture_lost(&mut self, epoch: u64) {
        if epoch != self.capture_epoch || !self.capture_live {
            return;
        }
        warn!("🎤 Capture stream ended unexpectedly");
        self.stop_capture();
        match self.state {
            VoiceState::Listening | VoiceState::Interrupted => self.fail(
                Trigger::CaptureFailed,
                VoiceError::AudioDevice("microphone stream ended".to_string()),
            ),
            // Playback carries on without barge-in.
            _ => {}
        }
    }

    // ---------------------------------------------------------------------
    // Backend results
    // ---------------------------------------------------------------------

    fn on_transcript(&mut self, result: Result<String, ClientError>) {
        if self.state != VoiceState::Processing {
            return;
        }
        self.work = None;
        let mut record = match self.in_flight.take() {
            Some(record) => record,
            None => return,
        };

        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                self.push_history(HistoryEntry::User { utterance: record });
                self.fail(Trigger::TranscriptionFailed, err.into());
                return;
            }
        };

        record.transcript = Some(text.clone());
        if text.is_empty() {
            info!("🔇 Empty transcript, listening again");
            self.push_history(HistoryEntry::User { utterance: record });
            self.transition(Trigger::EmptyTranscript);
            match self.start_capture(false) {
                Ok(()) => self.apply_pending_settings(),
                Err(err) => self.fail(Trigger::CaptureFailed, err),
            }
            return;
        }

        self.caption(text.clone(), true);
        let history = self
            .session
            .as_ref()
            .map(|s| s.chat_context(self.config.history_turns))
            .unwrap_or_default();
        self.in_flight = Some(record);

        let cancel = self.new_work_token();
        dispatch::spawn_response(
            Arc::clone(&self.responder),
            text,
            history,
            self.config.clients.response(),
            self.cycle,
            self.events_tx.clone(),
            cancel,
        );
    }

    fn on_response(&mut self, result: Result<String, ClientError>) {
        if self.state != VoiceState::Processing {
            return;
        }
        self.work = None;
        if let Some(record) = self.in_flight.take() {
            self.push_history(HistoryEntry::User { utterance: record });
        }

        let text = match result {
            Ok(text) => text,
            Err(err) => {
                self.fail(Trigger::ResponseFailed, err.into());
                return;
            }
        };

        let response_id = Uuid::new_v4();
        let (chunks_tx, chunks_rx) = chunk_channel(response_id, self.config.chunk_buffer);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let streams = match self.playback.play(chunks_rx, notice_tx) {
            Ok(streams) => streams,
            Err(err) => {
                self.fail(Trigger::PlaybackFailed, err);
                return;
            }
        };

        let pumps = CancellationToken::new();
        dispatch::spawn_notice_pump(notice_rx, self.cycle, self.events_tx.clone(), pumps.clone());
        dispatch::spawn_level_pump(streams.levels, Arc::clone(&self.ui), pumps.clone());
        self.reply = Some(ActiveReply {
            response_id,
            text: text.clone(),
            handle: streams.handle,
            pumps,
        });

        self.transition(Trigger::ResponseReceived);

        let request = SynthesisRequest::new(response_id, text, &self.settings);
        let cancel = self.new_work_token();
        dispatch::spawn_synthesis(
            Arc::clone(&self.synthesizer),
            request,
            chunks_tx,
            self.config.clients.synthesis(),
            self.cycle,
            self.events_tx.clone(),
            cancel,
        );

        if self.settings.barge_in_enabled && self.settings.turn_mode == TurnMode::Automatic {
            if let Err(err) = self.start_capture(true) {
                warn!("barge-in unavailable for this reply: {}", err);
            }
        }
    }

    fn on_synthesis_done(&mut self, result: Result<(), ClientError>) {
        if self.state != VoiceState::Speaking {
            return;
        }
        self.work = None;
        if let Err(err) = result {
            self.fail(Trigger::SynthesisFailed, err.into());
        }
    }

    fn on_playback(&mut self, notice: PlaybackNotice) {
        if self.state != VoiceState::Speaking {
            return;
        }
        match &self.reply {
            Some(reply) if reply.handle == notice.handle => {}
            _ => return,
        }
        match notice.kind {
            PlaybackNoticeKind::ChunkRendered { seq } => debug!("chunk {} rendered", seq),
            PlaybackNoticeKind::Failed(msg) => {
                self.fail(Trigger::PlaybackFailed, VoiceError::Playback(msg));
            }
            PlaybackNoticeKind::Finished => {
                if let Some(reply) = self.cancel_playback() {
                    self.push_history(HistoryEntry::Assistant {
                        response_id: reply.response_id,
                        text: reply.text,
                        interrupted: false,
                    });
                }
                self.cancel_work();
                self.consecutive_failures = 0;
                self.detector.set_barge_in_guard(false);
                match self.start_capture(false) {
                    Ok(()) => {
                        self.transition(Trigger::PlaybackCompleted);
                        self.apply_pending_settings();
                    }
                    Err(err) => self.fail(Trigger::CaptureFailed, err),
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    /// Start capture unless it is already live. `guarded` applies the barge-in onset rules.
    fn start_capture(&mut self, guarded: bool) -> VoiceResult<()> {
        if self.capture_live {
            self.detector.set_barge_in_guard(guarded);
            return Ok(());
        }
        let streams = self.capture.start()?;
        self.capture_epoch += 1;
        self.capture_live = true;
        self.detector.reset();
        self.detector.set_barge_in_guard(guarded);

        let pumps = CancellationToken::new();
        dispatch::spawn_frame_pump(
            streams.frames,
            self.capture_epoch,
            self.events_tx.clone(),
            pumps.clone(),
        );
        dispatch::spawn_level_pump(streams.levels, Arc::clone(&self.ui), pumps.clone());
        self.capture_pumps = Some(pumps);
        debug!("capture {} live", self.capture_epoch);
        Ok(())
    }

    fn stop_capture(&mut self) {
        if let Some(pumps) = self.capture_pumps.take() {
            pumps.cancel();
        }
        self.capture.stop();
        if self.capture_live {
            self.capture_live = false;
            self.capture_epoch += 1;
        }
        self.detector.reset();
        self.utterance = None;
    }

    fn cancel_playback(&mut self) -> Option<ActiveReply> {
        let reply = self.reply.take()?;
        reply.pumps.cancel();
        self.playback.cancel(reply.handle);
        Some(reply)
    }

    fn new_work_token(&mut self) -> CancellationToken {
        self.cancel_work();
        let token = CancellationToken::new();
        self.work = Some(token.clone());
        token
    }

    fn cancel_work(&mut self) {
        if let Some(token) = self.work.take() {
            token.cancel();
        }
    }

    /// Cancel everything outstanding and release both devices.
    fn release_all(&mut self) {
        self.cancel_work();
        self.cancel_playback();
        self.stop_capture();
        self.in_flight = None;
        self.cycle += 1;
    }

    // ---------------------------------------------------------------------
    // State, settings, feedback
    // ---------------------------------------------------------------------

    fn transition(&mut self, trigger: Trigger) {
        let from = self.state;
        let to = match next_state(from, trigger) {
            Some(to) => to,
            None => {
                warn!("ignoring {:?} in {}", trigger, from);
                return;
            }
        };
        self.state = to;
        if let Some(session) = self.session.as_mut() {
            session.state = to;
        }
        if from != to {
            info!("🔄 {} -> {} ({:?})", from, to, trigger);
            self.ui.on_state(&StateChange {
                from,
                to,
                trigger,
                at: Utc::now(),
            });
        }
    }

    /// Release resources, move to `Error` via `trigger`, and tell the UI.
    fn fail(&mut self, trigger: Trigger, err: VoiceError) {
        if err.is_fatal() {
            self.fail_fatal(err);
            return;
        }
        warn!("⚠️ {} ({:?})", err, trigger);
        self.release_all();
        self.transition(trigger);
        self.consecutive_failures += 1;
        self.gave_up = self.consecutive_failures >= self.config.max_consecutive_failures;
        self.ui.on_error(&ErrorNotice::from_error(&err, self.gave_up));
        self.apply_pending_settings();
    }

    fn fail_fatal(&mut self, err: VoiceError) {
        error!("❌ {}; ending session", err);
        self.release_all();
        self.transition(Trigger::Fatal);
        self.session = None;
        self.ui.on_error(&ErrorNotice::from_error(&err, false));
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if let Some(session) = self.session.as_mut() {
            session.push(entry);
        }
    }

    fn caption(&mut self, text: String, is_final: bool) {
        let utterance_id = match &self.in_flight {
            Some(record) => record.id,
            None => return,
        };
        let seq = self.caption_seq;
        self.caption_seq += 1;
        if self.settings.captions_enabled {
            self.ui.on_transcript(&TranscriptSegment {
                utterance_id,
                seq,
                text,
                is_final,
            });
        }
    }

    fn at_cycle_boundary(&self) -> bool {
        match self.state {
            VoiceState::Idle | VoiceState::Error => true,
            VoiceState::Listening => !self.detector.is_open(),
            _ => false,
        }
    }

    fn apply_pending_settings(&mut self) {
        if self.pending_settings.is_none() || !self.at_cycle_boundary() {
            return;
        }
        if let Some(settings) = self.pending_settings.take() {
            info!("⚙️ Applying updated voice settings");
            self.detector.set_mode(settings.turn_mode);
            if let Some(session) = self.session.as_mut() {
                session.settings = settings.clone();
            }
            self.settings = settings;
        }
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        self.cancel_work();
        self.cancel_playback();
        if let Some(pumps) = self.capture_pumps.take() {
            pumps.cancel();
        }
        self.capture.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{DeviceEvent, ScriptedRig};
    use std::time::Duration;

    fn barge_in_config() -> VoiceConfig {
        let mut config = VoiceConfig::default();
        config.settings.barge_in_enabled = true;
        config
    }

    /// Step until `done` holds.
    async fn step_until(
        orch: &mut ConversationOrchestrator,
        mut done: impl FnMut(&ConversationOrchestrator) -> bool,
    ) {
        for _ in 0..10_000 {
            if done(orch) {
                return;
            }
            assert!(orch.step().await, "queue closed");
        }
        panic!("condition never reached (state {})", orch.state());
    }

    /// Drive one utterance through to `Speaking`.
    async fn reach_speaking(orch: &mut ConversationOrchestrator, rig: &ScriptedRig) {
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        assert_eq!(orch.state(), VoiceState::Listening);
        rig.mic.speech(Duration::from_secs(3));
        rig.mic.silence(Duration::from_millis(1200));
        step_until(orch, |o| o.state() == VoiceState::Speaking).await;
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_completes_within_one_tick() {
        let (mut orch, rig) = ScriptedRig::build(barge_in_config());
        reach_speaking(&mut orch, &rig).await;
        rig.devices
            .wait_until(|events| events.iter().any(|e| matches!(e, DeviceEvent::ChunkRendered { .. })))
            .await;
        let capture_epoch = orch.capture_epoch;
        assert!(orch.capture_live);

        let mut barged = false;
        for seq in 0..40u64 {
            let frame = rig.mic.speech_frame(seq);
            orch.handle_event(SessionEvent::Frame {
                epoch: capture_epoch,
                frame,
            });
            if orch.state() != VoiceState::Speaking {
                barged = true;
                break;
            }
        }
        assert!(barged);
        // Same tick: Speaking -> Interrupted -> Listening, playback gone.
        assert_eq!(orch.state(), VoiceState::Listening);
        let path = rig.ui.state_path();
        assert_eq!(
            &path[path.len() - 3..],
            &[VoiceState::Speaking, VoiceState::Interrupted, VoiceState::Listening]
        );
        assert!(!rig.devices.playback_held());
        let rendered = rig.devices.rendered();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rig.devices.rendered(), rendered);
        assert!(matches!(
            orch.session().unwrap().history().last(),
            Some(HistoryEntry::Assistant { interrupted: true, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_results_have_no_effect() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        reach_speaking(&mut orch, &rig).await;
        let before_states = rig.ui.state_path();
        let before_captions = rig.ui.transcripts().len();
        let before_history = orch.session().unwrap().history().len();
        let stale = orch.cycle - 1;

        orch.handle_event(SessionEvent::Partial {
            cycle: stale,
            text: "old".into(),
        });
        orch.handle_event(SessionEvent::TranscriptReady {
            cycle: stale,
            result: Ok("old transcript".into()),
        });
        orch.handle_event(SessionEvent::ResponseReady {
            cycle: stale,
            result: Err(ClientError::Timeout),
        });
        orch.handle_event(SessionEvent::SynthesisDone {
            cycle: stale,
            result: Err(ClientError::Service("gone".into())),
        });

        assert_eq!(orch.state(), VoiceState::Speaking);
        assert_eq!(rig.ui.state_path(), before_states);
        assert_eq!(rig.ui.transcripts().len(), before_captions);
        assert!(rig.ui.errors().is_empty());
        assert_eq!(orch.session().unwrap().history().len(), before_history);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_teardown_are_idempotent() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        orch.handle_event(SessionEvent::Command(Command::ManualStop));
        orch.handle_event(SessionEvent::Command(Command::Teardown));
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(rig.ui.state_path().len() <= 1);

        orch.handle_event(SessionEvent::Command(Command::StartSession));
        orch.handle_event(SessionEvent::Command(Command::ManualStop));
        orch.handle_event(SessionEvent::Command(Command::ManualStop));
        assert_eq!(orch.state(), VoiceState::Listening);
        orch.handle_event(SessionEvent::Command(Command::Teardown));
        orch.handle_event(SessionEvent::Command(Command::Teardown));
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(!rig.devices.capture_held());
        assert!(orch.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_fatal() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        rig.mic
            .fail_next_start(VoiceError::PermissionDenied("user declined".into()));
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        assert_eq!(orch.state(), VoiceState::Idle);
        assert!(orch.session().is_none());
        let errors = rig.ui.errors();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_microphone_is_retryable_then_gives_up() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        for _ in 0..3 {
            rig.mic.fail_next_start(VoiceError::DeviceBusy("in use".into()));
        }
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        assert_eq!(orch.state(), VoiceState::Error);
        orch.handle_event(SessionEvent::Command(Command::Retry));
        orch.handle_event(SessionEvent::Command(Command::Retry));
        let errors = rig.ui.errors();
        assert_eq!(errors.len(), 3);
        assert!(errors[2].give_up);

        // Refused until a fresh session start.
        orch.handle_event(SessionEvent::Command(Command::Retry));
        assert_eq!(orch.state(), VoiceState::Error);
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        assert_eq!(orch.state(), VoiceState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_wait_for_cycle_boundary() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        reach_speaking(&mut orch, &rig).await;
        let updated = VoiceSettings {
            stability: 0.9,
            ..VoiceSettings::default()
        };
        orch.handle_event(SessionEvent::Command(Command::UpdateSettings(updated)));
        assert_eq!(orch.settings().stability, 0.5);

        step_until(&mut orch, |o| o.state() == VoiceState::Listening).await;
        assert_eq!(orch.settings().stability, 0.9);
        assert_eq!(orch.session().unwrap().settings.stability, 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_interrupt_applies_queued_settings() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        reach_speaking(&mut orch, &rig).await;
        let updated = VoiceSettings {
            stability: 0.9,
            ..VoiceSettings::default()
        };
        orch.handle_event(SessionEvent::Command(Command::UpdateSettings(updated)));
        assert_eq!(orch.settings().stability, 0.5);

        orch.handle_event(SessionEvent::Command(Command::ManualStop));
        assert_eq!(orch.state(), VoiceState::Listening);
        assert_eq!(orch.settings().stability, 0.9);

        rig.mic.speech(Duration::from_secs(1));
        rig.mic.silence(Duration::from_secs(1));
        step_until(&mut orch, |o| o.state() == VoiceState::Speaking).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let requests = rig.synthesizer.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].stability, 0.9);
    }

    #[tokio::test(start_paused = true)]
    async fn transcription_failure_surfaces_recoverable_error() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        rig.transcriber.push_outcome(Err(ClientError::Service("500".into())));
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        rig.mic.speech(Duration::from_secs(1));
        rig.mic.silence(Duration::from_secs(1));
        step_until(&mut orch, |o| o.state() == VoiceState::Error).await;

        let errors = rig.ui.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].retryable);
        assert!(!rig.devices.capture_held());

        orch.handle_event(SessionEvent::Command(Command::Retry));
        assert_eq!(orch.state(), VoiceState::Listening);
        assert!(rig.devices.capture_held());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_microphone_moves_to_error() {
        let (mut orch, rig) = ScriptedRig::build(VoiceConfig::default());
        orch.handle_event(SessionEvent::Command(Command::StartSession));
        rig.mic.disconnect();
        step_until(&mut orch, |o| o.state() == VoiceState::Error).await;
        assert!(!rig.devices.capture_held());
    }
}
