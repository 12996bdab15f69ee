//! Session record owned by the orchestrator.

use crate::response::ChatTurn;
use crate::settings::VoiceSettings;
use crate::state::VoiceState;
use crate::turn::EndReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A finished user utterance. Raw audio is not kept once transcription completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub duration: Duration,
    /// `None` until transcription completes.
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    User {
        utterance: UtteranceRecord,
    },
    Assistant {
        response_id: Uuid,
        text: String,
        /// The reply was cut off by the user.
        interrupted: bool,
    },
}

/// Caption text for one utterance. Partials are superseded by later segments
/// and never stored in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub utterance_id: Uuid,
    /// Increases by one per segment within an utterance, starting at 0.
    pub seq: u32,
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: VoiceState,
    /// Snapshot in force for the current cycle.
    pub settings: VoiceSettings,
    history: Vec<HistoryEntry>,
}

impl VoiceSession {
    pub fn new(settings: VoiceSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: VoiceState::Idle,
            settings,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// The last `limit` transcribed turns, oldest first.
    pub fn chat_context(&self, limit: usize) -> Vec<ChatTurn> {
        let turns: Vec<ChatTurn> = self
            .history
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::User { utterance } => utterance
                    .transcript
                    .as_ref()
                    .filter(|t| !t.is_empty())
                    .map(ChatTurn::user),
                HistoryEntry::Assistant { text, .. } => Some(ChatTurn::assistant(text.clone())),
            })
            .collect();
        let skip = turns.len().saturating_sub(limit);
        turns.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ChatRole;

    fn user(text: Option<&str>) -> HistoryEntry {
        HistoryEntry::User {
            utterance: UtteranceRecord {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                ended_at: Utc::now(),
                end_reason: EndReason::SilenceTimeout,
                duration: Duration::from_secs(1),
                transcript: text.map(str::to_string),
            },
        }
    }

    #[test]
    fn chat_context_skips_untranscribed_and_keeps_tail() {
        let mut session = VoiceSession::new(VoiceSettings::default());
        session.push(user(Some("first")));
        session.push(HistoryEntry::Assistant {
            response_id: Uuid::new_v4(),
            text: "reply one".into(),
            interrupted: false,
        });
        session.push(user(None));
        session.push(user(Some("second")));
        session.push(HistoryEntry::Assistant {
            response_id: Uuid::new_v4(),
            text: "reply two".into(),
            interrupted: true,
        });

        let ctx = session.chat_context(3);
        let texts: Vec<&str> = ctx.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["reply one", "second", "reply two"]);
        assert_eq!(ctx[1].role, ChatRole::User);
        assert_eq!(session.history().len(), 5);
    }

    #[test]
    fn new_session_starts_idle() {
        let session = VoiceSession::new(VoiceSettings::default());
        assert_eq!(session.state, VoiceState::Idle);
        assert!(session.history().is_empty());
    }
}
