//! Background tasks feeding the orchestrator's queue.
//!
//! Nothing here touches session state. Each task forwards what it produces as
//! a tagged [`SessionEvent`] and stops when its cancellation token fires; the
//! orchestrator decides whether a result is still current.

use crate::audio::{AudioFrame, LevelReceiver};
use crate::client::{call_with_retry, retry_while, CallPolicy, ClientError};
use crate::feedback::UiFeedback;
use crate::orchestrator::SessionEvent;
use crate::playback::{ChunkSender, PlaybackNotice};
use crate::response::{ChatTurn, Responder};
use crate::stt::{PartialSink, Transcriber};
use crate::synthesis::{SynthesisRequest, Synthesizer};
use crate::turn::UtteranceAudio;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Forward capture frames tagged with their capture epoch.
pub(crate) fn spawn_frame_pump(
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    epoch: u64,
    events: EventSender,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if events.send(SessionEvent::Frame { epoch, frame }).is_err() {
                            break;
                        }
                    }
                    None => {
                        if !cancel.is_cancelled() {
                            let _ = events.send(SessionEvent::CaptureLost { epoch });
                        }
                        break;
                    }
                },
            }
        }
        debug!("frame pump for capture {} finished", epoch);
    });
}

/// Push level samples straight to the UI, off the actor.
pub(crate) fn spawn_level_pump(
    mut levels: LevelReceiver,
    ui: Arc<dyn UiFeedback>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sample = levels.recv() => match sample {
                    Some(sample) => ui.on_level(&sample),
                    None => break,
                },
            }
        }
    });
}

/// Forward playback progress tagged with the cycle it belongs to.
pub(crate) fn spawn_notice_pump(
    mut notices: mpsc::UnboundedReceiver<PlaybackNotice>,
    cycle: u64,
    events: EventSender,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                notice = notices.recv() => match notice {
                    Some(notice) => {
                        if events.send(SessionEvent::Playback { cycle, notice }).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });
}

/// Transcribe one utterance. Partials are forwarded before the final result.
pub(crate) fn spawn_transcription(
    transcriber: Arc<dyn Transcriber>,
    audio: UtteranceAudio,
    policy: CallPolicy,
    cycle: u64,
    events: EventSender,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let (sink, mut partial_rx) = PartialSink::channel();
        let call = call_with_retry(&policy, &cancel, "transcription", || {
            let transcriber = Arc::clone(&transcriber);
            let audio = audio.clone();
            let sink = sink.clone();
            async move { transcriber.transcribe(audio, sink).await }
        });
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                outcome = &mut call => break outcome,
                Some(text) = partial_rx.recv() => {
                    if !cancel.is_cancelled() {
                        let _ = events.send(SessionEvent::Partial { cycle, text });
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        while let Ok(text) = partial_rx.try_recv() {
            let _ = events.send(SessionEvent::Partial { cycle, text });
        }
        if let Some(result) = outcome {
            let _ = events.send(SessionEvent::TranscriptReady { cycle, result });
        }
    });
}

/// Ask the response backend for the coach's reply.
pub(crate) fn spawn_response(
    responder: Arc<dyn Responder>,
    transcript: String,
    history: Vec<ChatTurn>,
    policy: CallPolicy,
    cycle: u64,
    events: EventSender,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let outcome = call_with_retry(&policy, &cancel, "response", || {
            let responder = Arc::clone(&responder);
            let transcript = transcript.clone();
            let history = history.clone();
            async move { responder.respond(&transcript, &history).await }
        })
        .await;

        if let Some(result) = outcome {
            if !cancel.is_cancelled() {
                let _ = events.send(SessionEvent::ResponseReady { cycle, result });
            }
        }
    });
}

/// Stream synthesized audio into playback.
///
/// The policy timeout bounds the wait for the first chunk and each gap after
/// it. Once a chunk has been handed over the call is never retried, since a
/// retry would replay audio the user already heard.
pub(crate) fn spawn_synthesis(
    synthesizer: Arc<dyn Synthesizer>,
    request: SynthesisRequest,
    chunks: ChunkSender,
    policy: CallPolicy,
    cycle: u64,
    events: EventSender,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let limit = policy.timeout;
        let outcome = retry_while(
            &policy,
            &cancel,
            "synthesis",
            || chunks.sent() == 0,
            || {
                let synthesizer = Arc::clone(&synthesizer);
                let request = request.clone();
                let chunks = chunks.clone();
                async move {
                    tokio::select! {
                        res = synthesizer.synthesize(request, chunks.clone()) => res,
                        _ = chunks.stalled(limit) => Err(ClientError::Timeout),
                    }
                }
            },
        )
        .await;
        // Closing the pipe lets playback drain and finish.
        drop(chunks);

        if let Some(result) = outcome {
            if !cancel.is_cancelled() {
                let _ = events.send(SessionEvent::SynthesisDone { cycle, result });
            }
        }
    });
}
