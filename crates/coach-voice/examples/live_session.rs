//! Live Session: talk to the coach through the default microphone and speaker.
//!
//! Needs `--features hardware` plus API keys in `.env`:
//! - **STT**: `STT_API_KEY` (or `OPENAI_API_KEY`), optional `STT_API_URL` / `STT_MODEL`.
//! - **LLM**: `LLM_API_KEY` (or `OPENROUTER_API_KEY`), optional `LLM_API_URL` / `LLM_MODEL`.
//! - **TTS**: `ELEVENLABS_API_KEY`, voice from `COACH_VOICE_VOICE`.
//! - Session settings come from the flat `COACH_VOICE_*` variables (`COACH_VOICE_BARGE_IN=true`, ...).
//!
//! Commands on stdin: `p` press, `s` stop, `r` retry, `q` quit.

use coach_voice::{
    list_input_devices, ChatCompletionResponder, ConversationOrchestrator, ElevenLabsSynthesizer,
    MicrophoneCapture, SpeakerPlayback, TracingFeedback, VoiceComponents, VoiceConfig,
    VoiceSettings, WhisperApiTranscriber,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match list_input_devices() {
        Ok(devices) => info!("🎤 Input devices: {:?}", devices),
        Err(e) => warn!("Could not list input devices: {}", e),
    }

    let mut config = VoiceConfig::load()?;
    config.settings = VoiceSettings::from_env();

    let components = VoiceComponents {
        capture: Box::new(MicrophoneCapture::new(config.audio.clone())),
        playback: Box::new(SpeakerPlayback::new()),
        transcriber: Arc::new(WhisperApiTranscriber::from_env()?),
        responder: Arc::new(ChatCompletionResponder::from_env()?),
        synthesizer: Arc::new(ElevenLabsSynthesizer::from_env()?),
    };
    let (orchestrator, handle) =
        ConversationOrchestrator::new(config, components, Arc::new(TracingFeedback));
    let run = tokio::spawn(orchestrator.run());

    handle.start_session()?;
    info!("Talk to the coach. Commands: p=press s=stop r=retry q=quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let sent = match line.trim() {
            "p" => handle.manual_press(),
            "s" => handle.manual_stop(),
            "r" => handle.retry(),
            "q" => break,
            _ => continue,
        };
        if sent.is_err() {
            break;
        }
    }

    let _ = handle.shutdown();
    let _ = run.await;
    Ok(())
}
