//! Text-to-speech: response text plus voice settings in, ordered playable chunks out.

use crate::client::ClientError;
use crate::error::{VoiceError, VoiceResult};
use crate::playback::ChunkSender;
use crate::settings::{SelectedVoice, VoiceSettings};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";
/// Output rate requested from the backend (`pcm_16000`).
pub const SYNTHESIS_SAMPLE_RATE: u32 = 16000;
/// 250ms of audio per playback chunk.
const CHUNK_SAMPLES: usize = 4000;

/// Everything the synthesis backend needs for one response.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub response_id: Uuid,
    pub text: String,
    pub voice: SelectedVoice,
    pub stability: f32,
    pub similarity_boost: f32,
    pub low_latency: bool,
}

impl SynthesisRequest {
    pub fn new(response_id: Uuid, text: impl Into<String>, settings: &VoiceSettings) -> Self {
        Self {
            response_id,
            text: text.into(),
            voice: settings.selected_voice.clone(),
            stability: settings.stability,
            similarity_boost: settings.similarity_boost,
            low_latency: settings.low_latency_mode,
        }
    }
}

/// Backend streaming synthesized audio into a [`ChunkSender`].
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Push chunks in playback order. Returning `Ok` means the response is complete.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        chunks: ChunkSender,
    ) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct TtsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: TtsVoiceSettings,
}

#[derive(Serialize)]
struct TtsVoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs streaming TTS (`/v1/text-to-speech/{voice}/stream`).
pub struct ElevenLabsSynthesizer {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    /// Build from environment: ELEVENLABS_API_KEY, optional ELEVENLABS_API_URL.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY")
            .map(|k| k.trim().to_string())
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("ELEVENLABS_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("ELEVENLABS_API_URL").unwrap_or_else(|_| ELEVENLABS_API_BASE.to_string());
        Ok(Self::new(base_url, api_key))
    }

    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        }
    }
}

fn model_for(low_latency: bool) -> &'static str {
    if low_latency {
        "eleven_turbo_v2_5"
    } else {
        "eleven_multilingual_v2"
    }
}

fn stream_url(base: &str, request: &SynthesisRequest) -> String {
    let mut url = format!(
        "{}/v1/text-to-speech/{}/stream?output_format=pcm_16000",
        base.trim_end_matches('/'),
        request.voice.voice_id()
    );
    if request.low_latency {
        url.push_str("&optimize_streaming_latency=3");
    }
    url
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        chunks: ChunkSender,
    ) -> Result<(), ClientError> {
        let url = stream_url(&self.base_url, &request);
        let body = TtsBody {
            text: &request.text,
            model_id: model_for(request.low_latency),
            voice_settings: TtsVoiceSettings {
                stability: request.stability,
                similarity_boost: request.similarity_boost,
            },
        };
        debug!("TTS request: {} ({} chars)", url, request.text.len());

        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ClientError::Service(format!("TTS API error {}: {}", status, text)));
        }

        let mut decoder = PcmDecoder::new(CHUNK_SAMPLES);
        let mut stream = res.bytes_stream();
        while let Some(bytes) = stream.next().await {
            for block in decoder.push(&bytes?) {
                chunks.push(block, SYNTHESIS_SAMPLE_RATE).await?;
            }
        }
        if let Some(tail) = decoder.finish() {
            chunks.push(tail, SYNTHESIS_SAMPLE_RATE).await?;
        }
        info!("🔊 Synthesized {} chunks for {}", chunks.sent(), request.response_id);
        Ok(())
    }
}

/// Decodes 16-bit little-endian PCM bytes into fixed-size f32 blocks.
/// Network reads may split a sample across two reads.
#[derive(Debug)]
pub struct PcmDecoder {
    block_samples: usize,
    carry: Option<u8>,
    pending: Vec<f32>,
}

impl PcmDecoder {
    pub fn new(block_samples: usize) -> Self {
        let block_samples = block_samples.max(1);
        Self {
            block_samples,
            carry: None,
            pending: Vec::with_capacity(block_samples),
        }
    }

    /// Decode `bytes`, returning every block they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        let mut rest = bytes;
        if let Some(lo) = self.carry.take() {
            match rest.split_first() {
                Some((&hi, tail)) => {
                    self.emit(i16::from_le_bytes([lo, hi]), &mut blocks);
                    rest = tail;
                }
                None => {
                    self.carry = Some(lo);
                    return blocks;
                }
            }
        }
        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            self.emit(i16::from_le_bytes([pair[0], pair[1]]), &mut blocks);
        }
        self.carry = pairs.remainder().first().copied();
        blocks
    }

    /// Whatever is left once the byte stream ends. A dangling odd byte is dropped.
    pub fn finish(&mut self) -> Option<Vec<f32>> {
        self.carry = None;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    fn emit(&mut self, sample: i16, blocks: &mut Vec<Vec<f32>>) {
        self.pending.push(sample as f32 / 32768.0);
        if self.pending.len() >= self.block_samples {
            let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_samples));
            blocks.push(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_samples() {
        let mut d = PcmDecoder::new(2);
        // 0x4000 = 16384, split across reads.
        assert!(d.push(&[0x00]).is_empty());
        assert!(d.push(&[0x40]).is_empty());
        let blocks = d.push(&[0x00, 0xC0, 0xFF]);
        assert_eq!(blocks, vec![vec![0.5, -0.5]]);
        let blocks = d.push(&[0x7F]);
        assert!(blocks.is_empty());
        assert_eq!(d.finish(), Some(vec![32767.0 / 32768.0]));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn low_latency_switches_model_and_query() {
        let settings = VoiceSettings {
            low_latency_mode: true,
            selected_voice: SelectedVoice::Lily,
            ..Default::default()
        };
        let request = SynthesisRequest::new(Uuid::new_v4(), "hello", &settings);
        let url = stream_url("https://api.elevenlabs.io/", &request);
        assert_eq!(
            url,
            "https://api.elevenlabs.io/v1/text-to-speech/pFZP5JQG7iQjIQuC4Bku/stream?output_format=pcm_16000&optimize_streaming_latency=3"
        );
        assert_eq!(model_for(true), "eleven_turbo_v2_5");
        assert_eq!(model_for(false), "eleven_multilingual_v2");
    }

    #[test]
    fn request_carries_settings() {
        let settings = VoiceSettings {
            stability: 0.3,
            similarity_boost: 0.9,
            ..Default::default()
        };
        let request = SynthesisRequest::new(Uuid::new_v4(), "hi", &settings);
        assert_eq!(request.stability, 0.3);
        assert_eq!(request.similarity_boost, 0.9);
        assert!(!request.low_latency);
    }
}
