//! User-facing voice settings.
//!
//! A settings snapshot is taken when a session starts and stays fixed for the
//! duration of one utterance/response cycle. Updates made mid-cycle are held by
//! the orchestrator and applied at the next cycle boundary.

use serde::{Deserialize, Serialize};

/// Synthesis voice. Premade voices map to ElevenLabs voice ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedVoice {
    #[default]
    Rachel,
    Sarah,
    Laura,
    George,
    Brian,
    Lily,
    /// Any other voice id known to the synthesis backend.
    Custom(String),
}

impl SelectedVoice {
    pub fn voice_id(&self) -> &str {
        match self {
            SelectedVoice::Rachel => "21m00Tcm4TlvDq8ikWAM",
            SelectedVoice::Sarah => "EXAVITQu4vr4xnSDxMaL",
            SelectedVoice::Laura => "FGY2WhTYpPnrIDTdsKH5",
            SelectedVoice::George => "JBFqnCBsd6RMkjVDRZzb",
            SelectedVoice::Brian => "nPczCjzI2devNBz1zQrb",
            SelectedVoice::Lily => "pFZP5JQG7iQjIQuC4Bku",
            SelectedVoice::Custom(id) => id.as_str(),
        }
    }

    /// Parse a voice name (case-insensitive); anything unrecognised is treated as a raw voice id.
    pub fn parse(name: &str) -> Self {
        let s = name.trim();
        if s.eq_ignore_ascii_case("rachel") {
            SelectedVoice::Rachel
        } else if s.eq_ignore_ascii_case("sarah") {
            SelectedVoice::Sarah
        } else if s.eq_ignore_ascii_case("laura") {
            SelectedVoice::Laura
        } else if s.eq_ignore_ascii_case("george") {
            SelectedVoice::George
        } else if s.eq_ignore_ascii_case("brian") {
            SelectedVoice::Brian
        } else if s.eq_ignore_ascii_case("lily") {
            SelectedVoice::Lily
        } else {
            SelectedVoice::Custom(s.to_string())
        }
    }
}

/// How utterance boundaries are decided. The two modes never run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Loudness-based onset and silence hangover.
    #[default]
    Automatic,
    /// Press starts an utterance, release ends it. Loudness is ignored.
    PushToTalk,
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_true() -> bool {
    true
}

/// Voice settings for one session.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | COACH_VOICE_BARGE_IN | false | Let new speech interrupt playback. |
/// | COACH_VOICE_LOW_LATENCY | false | Favor faster, lower-fidelity synthesis. |
/// | COACH_VOICE_CAPTIONS | true | Surface partial/final transcripts to the UI. |
/// | COACH_VOICE_STABILITY | 0.5 | Synthesis voice stability (0–1). |
/// | COACH_VOICE_SIMILARITY_BOOST | 0.75 | Synthesis fidelity to the reference voice (0–1). |
/// | COACH_VOICE_VOICE | rachel | Voice name or raw voice id. |
/// | COACH_VOICE_TURN_MODE | automatic | "automatic" \| "push_to_talk". |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default)]
    pub barge_in_enabled: bool,
    #[serde(default)]
    pub low_latency_mode: bool,
    #[serde(default = "default_true")]
    pub captions_enabled: bool,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default)]
    pub selected_voice: SelectedVoice,
    #[serde(default)]
    pub turn_mode: TurnMode,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            barge_in_enabled: false,
            low_latency_mode: false,
            captions_enabled: true,
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            selected_voice: SelectedVoice::default(),
            turn_mode: TurnMode::Automatic,
        }
    }
}

impl VoiceSettings {
    /// Load settings from environment. Unset or invalid values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            barge_in_enabled: env_bool("COACH_VOICE_BARGE_IN", defaults.barge_in_enabled),
            low_latency_mode: env_bool("COACH_VOICE_LOW_LATENCY", defaults.low_latency_mode),
            captions_enabled: env_bool("COACH_VOICE_CAPTIONS", defaults.captions_enabled),
            stability: env_unit("COACH_VOICE_STABILITY", defaults.stability),
            similarity_boost: env_unit("COACH_VOICE_SIMILARITY_BOOST", defaults.similarity_boost),
            selected_voice: std::env::var("COACH_VOICE_VOICE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SelectedVoice::parse(&v))
                .unwrap_or(defaults.selected_voice),
            turn_mode: match std::env::var("COACH_VOICE_TURN_MODE") {
                Ok(v) if v.trim().eq_ignore_ascii_case("push_to_talk") => TurnMode::PushToTalk,
                _ => TurnMode::Automatic,
            },
        }
    }

    /// Clamp the synthesis sliders into [0, 1]. NaN falls back to the default.
    pub fn normalized(mut self) -> Self {
        self.stability = clamp_unit(self.stability, default_stability());
        self.similarity_boost = clamp_unit(self.similarity_boost, default_similarity_boost());
        self
    }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

fn env_unit(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .map(|v| clamp_unit(v, default))
        .unwrap_or(default)
}
