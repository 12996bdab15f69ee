//! **Speech-to-Text (STT)**: turn one closed utterance into text.
//!
//! Implement [`Transcriber`] for any backend. Partial hypotheses go through the
//! [`PartialSink`] as they arrive; the returned string is the final transcript.
//! An empty final transcript means nothing intelligible was said.

use crate::client::ClientError;
use crate::turn::UtteranceAudio;
use async_trait::async_trait;
use futures::StreamExt;
use std::io::Cursor;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Receives partial transcripts for the utterance being transcribed.
#[derive(Debug, Clone)]
pub struct PartialSink {
    tx: mpsc::UnboundedSender<String>,
}

impl PartialSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver its partials arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::channel().0
    }

    /// Report the current best hypothesis for the whole utterance so far.
    pub fn partial(&self, text: impl Into<String>) {
        let _ = self.tx.send(text.into());
    }
}

/// Backend converting utterance audio to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: UtteranceAudio,
        partials: PartialSink,
    ) -> Result<String, ClientError>;
}

/// Encode utterance audio as 16-bit mono WAV for upload.
pub fn encode_wav(audio: &UtteranceAudio) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + audio.sample_count() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for s in audio.samples() {
            writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0).round() as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Production STT backend: OpenAI-compatible transcription API.
///
/// Models that support streamed transcription (`gpt-4o-transcribe` family) are
/// called with `stream=true` and report deltas as partials; `whisper-1`
/// returns only the final text.
#[derive(Debug, Clone)]
pub struct WhisperApiTranscriber {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl WhisperApiTranscriber {
    /// Build from environment: STT_API_URL, STT_API_KEY (or OPENAI_API_KEY), STT_MODEL.
    pub fn from_env() -> crate::error::VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                crate::error::VoiceError::Config(
                    "STT requires STT_API_KEY or OPENAI_API_KEY".to_string(),
                )
            })?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> crate::error::VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn streams(&self) -> bool {
        model_streams(&self.model)
    }
}

fn model_streams(model: &str) -> bool {
    model.starts_with("gpt-4o")
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(
        &self,
        audio: UtteranceAudio,
        partials: PartialSink,
    ) -> Result<String, ClientError> {
        if audio.sample_count() == 0 {
            return Ok(String::new());
        }
        let wav = encode_wav(&audio).map_err(|e| ClientError::Service(e.to_string()))?;
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ClientError::Service(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if self.streams() {
            form = form.text("stream", "true");
        }

        debug!("STT request: {} ({:?} of audio)", url, audio.duration);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Service(format!("STT API error {}: {}", status, body)));
        }

        let text = if self.streams() {
            read_transcript_events(res, &partials).await?
        } else {
            let json: serde_json::Value = res.json().await?;
            json.get("text")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .trim()
                .to_string()
        };
        info!("📝 Transcript: \"{}\"", text);
        Ok(text)
    }
}

/// Consume a `text/event-stream` transcription response.
async fn read_transcript_events(
    res: reqwest::Response,
    partials: &PartialSink,
) -> Result<String, ClientError> {
    let mut body = res.bytes_stream();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut so_far = String::new();

    while let Some(bytes) = body.next().await {
        line_buf.extend_from_slice(&bytes?);
        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            match parse_transcript_event(line.trim()) {
                Some(TranscriptEvent::Delta(delta)) => {
                    so_far.push_str(&delta);
                    partials.partial(so_far.trim());
                }
                Some(TranscriptEvent::Done(text)) => return Ok(text.trim().to_string()),
                None => {}
            }
        }
    }
    // Stream ended without a done event; the accumulated deltas are all we have.
    Ok(so_far.trim().to_string())
}

#[derive(Debug, PartialEq)]
enum TranscriptEvent {
    Delta(String),
    Done(String),
}

fn parse_transcript_event(line: &str) -> Option<TranscriptEvent> {
    let data = line.strip_prefix("data:")?.trim();
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    match json.get("type")?.as_str()? {
        "transcript.text.delta" => Some(TranscriptEvent::Delta(
            json.get("delta")?.as_str()?.to_string(),
        )),
        "transcript.text.done" => Some(TranscriptEvent::Done(
            json.get("text")?.as_str()?.to_string(),
        )),
        _ => None,
    }
}
