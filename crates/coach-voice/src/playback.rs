//! Audio playback sink contract and the ordered chunk pipe feeding it.
//!
//! Synthesizers push audio through a [`ChunkSender`], which stamps every chunk
//! with its position in the response. The sink renders chunks strictly in that
//! order and reports progress as [`PlaybackNotice`]s. `cancel` is immediate:
//! once it returns, no further chunk of that playback is rendered.

use crate::audio::LevelReceiver;
use crate::client::ClientError;
use crate::error::VoiceResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Chunks buffered between a synthesizer and the speaker.
pub const DEFAULT_CHUNK_BUFFER: usize = 16;

/// One block of synthesized audio.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub response_id: Uuid,
    /// Position within the response, starting at 0.
    pub seq: u32,
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

/// Create the pipe between a synthesizer and a playback sink.
pub fn chunk_channel(
    response_id: Uuid,
    capacity: usize,
) -> (ChunkSender, mpsc::Receiver<PlaybackChunk>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChunkSender {
            response_id,
            tx,
            activity: Arc::new(watch::channel(PipeActivity::default()).0),
        },
        rx,
    )
}

#[derive(Debug, Clone, Copy, Default)]
struct PipeActivity {
    sent: u32,
    /// Pushes currently blocked on a full buffer.
    waiting: u32,
}

/// Producer half of the chunk pipe. Sequence numbers are assigned here.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    response_id: Uuid,
    tx: mpsc::Sender<PlaybackChunk>,
    activity: Arc<watch::Sender<PipeActivity>>,
}

impl ChunkSender {
    pub fn response_id(&self) -> Uuid {
        self.response_id
    }

    /// Queue a chunk for playback, waiting while the buffer is full.
    pub async fn push(
        &self,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
    ) -> Result<(), ClientError> {
        self.activity.send_modify(|a| a.waiting += 1);
        let reserved = self.tx.reserve().await;
        let mut seq = None;
        self.activity.send_modify(|a| {
            a.waiting -= 1;
            if reserved.is_ok() {
                seq = Some(a.sent);
                a.sent += 1;
            }
        });
        let (permit, seq) = match (reserved, seq) {
            (Ok(permit), Some(seq)) => (permit, seq),
            _ => return Err(ClientError::Service("playback stopped".to_string())),
        };
        permit.send(PlaybackChunk {
            response_id: self.response_id,
            seq,
            samples: samples.into(),
            sample_rate,
        });
        Ok(())
    }

    /// Number of chunks handed to playback so far.
    pub fn sent(&self) -> u32 {
        self.activity.borrow().sent
    }

    /// Resolves once the producer has gone `limit` without handing over a
    /// chunk. Time spent waiting for the speaker to make room does not count.
    pub async fn stalled(&self, limit: Duration) {
        let mut rx = self.activity.subscribe();
        loop {
            let waiting = rx.borrow_and_update().waiting > 0;
            if waiting {
                if rx.changed().await.is_err() {
                    return std::future::pending().await;
                }
            } else if tokio::time::timeout(limit, rx.changed()).await.is_err() {
                return;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Identifies one `play` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackNoticeKind {
    /// The chunk has been rendered to the output device.
    ChunkRendered { seq: u32 },
    /// The chunk stream closed and every chunk was rendered.
    Finished,
    Failed(String),
}

/// Progress report from a playback sink. Nothing is reported after `cancel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackNotice {
    pub handle: PlaybackHandle,
    pub kind: PlaybackNoticeKind,
}

/// What `play` returns.
#[derive(Debug)]
pub struct PlaybackStreams {
    pub handle: PlaybackHandle,
    pub levels: LevelReceiver,
}

/// Exclusive owner of the speaker.
pub trait PlaybackSink: Send {
    /// Start rendering `chunks` back to back. An active playback is cancelled first.
    fn play(
        &mut self,
        chunks: mpsc::Receiver<PlaybackChunk>,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
    ) -> VoiceResult<PlaybackStreams>;

    /// Stop output immediately and drop anything buffered. Stale handles are ignored.
    fn cancel(&mut self, handle: PlaybackHandle);

    /// Whether the output device is currently held.
    fn is_acquired(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_numbers_chunks_in_push_order() {
        let id = Uuid::new_v4();
        let (tx, mut rx) = chunk_channel(id, 4);
        let other = tx.clone();
        tx.push(vec![0.0f32; 4], 16000).await.unwrap();
        other.push(vec![0.0f32; 4], 16000).await.unwrap();
        tx.push(vec![0.0f32; 4], 16000).await.unwrap();
        assert_eq!(tx.sent(), 3);

        let seqs: Vec<u32> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .flatten()
            .map(|c| {
                assert_eq!(c.response_id, id);
                c.seq
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_on_a_full_buffer_is_not_a_stall() {
        let (tx, mut rx) = chunk_channel(Uuid::new_v4(), 1);
        tx.push(vec![0.0f32; 4], 16000).await.unwrap();
        let producer = tx.clone();
        let blocked = tokio::spawn(async move { producer.push(vec![0.0f32; 4], 16000).await });

        let limit = Duration::from_millis(100);
        let stall = tokio::time::timeout(Duration::from_secs(5), tx.stalled(limit)).await;
        assert!(stall.is_err());

        assert!(rx.recv().await.is_some());
        assert!(blocked.await.unwrap().is_ok());
        assert_eq!(tx.sent(), 2);
        let started = tokio::time::Instant::now();
        tx.stalled(limit).await;
        assert!(started.elapsed() >= limit);
    }

    #[tokio::test]
    async fn push_fails_once_playback_is_gone() {
        let (tx, rx) = chunk_channel(Uuid::new_v4(), 1);
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.push(vec![0.1f32], 16000).await.is_err());
        assert_eq!(tx.sent(), 0);
    }
}
