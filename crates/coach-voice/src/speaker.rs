//! Speaker playback using Rodio.
//!
//! Each `play` gets its own output thread holding the `OutputStream` (which is
//! not `Send`). The `Sink` is shared with the caller so `cancel` can stop
//! output from the orchestrator's thread without waiting for the renderer.

use crate::audio::{level_channel, AudioLevelSample, LevelSender, LevelSource};
use crate::error::{VoiceError, VoiceResult};
use crate::playback::{
    PlaybackChunk, PlaybackHandle, PlaybackNotice, PlaybackNoticeKind, PlaybackSink,
    PlaybackStreams,
};
use rodio::{OutputStream, Sink};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Rodio-backed [`PlaybackSink`].
pub struct SpeakerPlayback {
    next_handle: u64,
    level_window: usize,
    active: Option<ActivePlayback>,
}

struct ActivePlayback {
    handle: PlaybackHandle,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ActivePlayback {
    fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for ActivePlayback {
    fn drop(&mut self) {
        self.shared.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("playback thread panicked");
            }
        }
    }
}

/// State shared between the caller and the output thread.
struct Shared {
    cancelled: Mutex<bool>,
    sink: Mutex<Option<Arc<Sink>>>,
}

impl Shared {
    fn lock_cancelled(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel(&self) {
        let mut cancelled = self.lock_cancelled();
        *cancelled = true;
        if let Some(sink) = self.sink.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            sink.stop();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.lock_cancelled()
    }

    /// Deliver a notice unless the playback was cancelled.
    fn notify(&self, notices: &mpsc::UnboundedSender<PlaybackNotice>, notice: PlaybackNotice) -> bool {
        let cancelled = self.lock_cancelled();
        if *cancelled {
            return false;
        }
        notices.send(notice).is_ok()
    }
}

impl SpeakerPlayback {
    pub fn new() -> Self {
        info!("🔊 Speaker playback ready");
        Self {
            next_handle: 0,
            level_window: crate::audio::DEFAULT_LEVEL_WINDOW,
            active: None,
        }
    }
}

impl Default for SpeakerPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for SpeakerPlayback {
    fn play(
        &mut self,
        chunks: mpsc::Receiver<PlaybackChunk>,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
    ) -> VoiceResult<PlaybackStreams> {
        if let Some(previous) = self.active.take() {
            debug!("replacing playback {:?}", previous.handle);
        }

        self.next_handle += 1;
        let handle = PlaybackHandle(self.next_handle);
        let shared = Arc::new(Shared {
            cancelled: Mutex::new(false),
            sink: Mutex::new(None),
        });
        let (level_tx, level_rx) = level_channel(self.level_window);
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("coach-voice-playback".to_string())
            .spawn(move || {
                let (_stream, stream_handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let sink = match Sink::try_new(&stream_handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                *thread_shared.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&sink));
                let _ = ready_tx.send(Ok(()));
                render(handle, chunks, &sink, &thread_shared, &notices, &level_tx);
                sink.stop();
                debug!("🔊 Output released for {:?}", handle);
            })?;

        let active = ActivePlayback {
            handle,
            shared,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("▶️ Playback {:?} started", handle);
                self.active = Some(active);
                Ok(PlaybackStreams {
                    handle,
                    levels: level_rx,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Playback(
                "playback thread exited before output was ready".to_string(),
            )),
        }
    }

    fn cancel(&mut self, handle: PlaybackHandle) {
        match &self.active {
            Some(active) if active.handle == handle => {
                self.active = None;
                info!("⏹️ Playback {:?} cancelled", handle);
            }
            _ => debug!("cancel for inactive playback {:?} ignored", handle),
        }
    }

    fn is_acquired(&self) -> bool {
        self.active.as_ref().map(ActivePlayback::is_running).unwrap_or(false)
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        self.active = None;
    }
}

fn render(
    handle: PlaybackHandle,
    mut chunks: mpsc::Receiver<PlaybackChunk>,
    sink: &Sink,
    shared: &Shared,
    notices: &mpsc::UnboundedSender<PlaybackNotice>,
    levels: &LevelSender,
) {
    // Sequence numbers of appended chunks not yet reported as rendered.
    let mut queued: VecDeque<(u32, AudioLevelSample)> = VecDeque::new();
    let mut closed = false;

    loop {
        if shared.is_cancelled() {
            return;
        }

        let mut received = false;
        if !closed {
            match chunks.try_recv() {
                Ok(chunk) => {
                    received = true;
                    let level = AudioLevelSample::from_samples(LevelSource::Playback, &chunk.samples);
                    sink.append(rodio::buffer::SamplesBuffer::new(
                        1,
                        chunk.sample_rate,
                        chunk.samples.to_vec(),
                    ));
                    queued.push_back((chunk.seq, level));
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => closed = true,
            }
        }

        // Sources still in the sink are the tail of `queued`.
        while queued.len() > sink.len() {
            if let Some((seq, level)) = queued.pop_front() {
                levels.send(level);
                let notice = PlaybackNotice {
                    handle,
                    kind: PlaybackNoticeKind::ChunkRendered { seq },
                };
                if !shared.notify(notices, notice) {
                    return;
                }
            }
        }

        if closed && queued.is_empty() && sink.empty() {
            shared.notify(
                notices,
                PlaybackNotice {
                    handle,
                    kind: PlaybackNoticeKind::Finished,
                },
            );
            return;
        }

        if !received {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}
