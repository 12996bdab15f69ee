//! Engine configuration.
//!
//! `VoiceConfig::load` reads an optional TOML file (`$COACH_VOICE_CONFIG`,
//! default `config/voice.toml`) and then environment overrides such as
//! `COACH_VOICE_TURN__HANGOVER_MS=600` or `COACH_VOICE_SETTINGS__BARGE_IN_ENABLED=true`.

use crate::audio::AudioConfig;
use crate::client::ClientTimeouts;
use crate::error::VoiceResult;
use crate::playback::DEFAULT_CHUNK_BUFFER;
use crate::settings::VoiceSettings;
use crate::turn::TurnConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_max_failures() -> u32 {
    3
}

fn default_history_turns() -> usize {
    10
}

fn default_chunk_buffer() -> usize {
    DEFAULT_CHUNK_BUFFER
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Initial settings for new sessions.
    #[serde(default)]
    pub settings: VoiceSettings,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub clients: ClientTimeouts,
    /// Consecutive failures before the UI is told to give up.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// Prior turns sent with each response request.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Synthesized chunks buffered ahead of the speaker.
    #[serde(default = "default_chunk_buffer")]
    pub chunk_buffer: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            settings: VoiceSettings::default(),
            audio: AudioConfig::default(),
            turn: TurnConfig::default(),
            clients: ClientTimeouts::default(),
            max_consecutive_failures: default_max_failures(),
            history_turns: default_history_turns(),
            chunk_buffer: default_chunk_buffer(),
        }
    }
}

impl VoiceConfig {
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("COACH_VOICE_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("COACH_VOICE").separator("__"))
            .build()?;
        let mut loaded: VoiceConfig = built.try_deserialize()?;
        loaded.settings = loaded.settings.normalized();
        info!(
            "⚙️ Voice config loaded (barge-in: {}, turn mode: {:?})",
            loaded.settings.barge_in_enabled, loaded.settings.turn_mode
        );
        Ok(loaded)
    }
}
