//! Response generation: final transcript plus conversation history in, reply text out.

use crate::client::ClientError;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

/// Spoken replies should stay short enough to interrupt comfortably.
const COACH_SYSTEM_PROMPT: &str = "You are a warm, attentive wellbeing coach speaking out loud. \
    Answer in one to three short spoken sentences. No lists, markdown, or emoji. \
    Reflect what the user said, then ask at most one gentle question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn handed to the response backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// Backend producing the coach's reply.
#[async_trait]
pub trait Responder: Send + Sync {
    /// `history` excludes `transcript` and is oldest first.
    async fn respond(&self, transcript: &str, history: &[ChatTurn]) -> Result<String, ClientError>;
}

// OpenAI-compatible request/response
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// OpenAI-compatible `/chat/completions` responder (OpenRouter, OpenAI, local servers).
pub struct ChatCompletionResponder {
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl ChatCompletionResponder {
    /// Build from environment: LLM_API_URL, LLM_API_KEY (or OPENROUTER_API_KEY), LLM_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map(|k| k.trim().to_string())
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                VoiceError::Config("responses require LLM_API_KEY or OPENROUTER_API_KEY".to_string())
            })?;
        let mut responder = Self::new(key);
        if let Ok(url) = std::env::var("LLM_API_URL") {
            responder.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            responder = responder.with_model(&model);
        }
        Ok(responder)
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: COACH_SYSTEM_PROMPT.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

fn build_messages(system: &str, transcript: &str, history: &[ChatTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: system.to_string(),
    });
    for turn in history {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        messages.push(ChatMessage {
            role: role.to_string(),
            content: turn.text.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: transcript.to_string(),
    });
    messages
}

#[async_trait]
impl Responder for ChatCompletionResponder {
    async fn respond(&self, transcript: &str, history: &[ChatTurn]) -> Result<String, ClientError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(&self.system_prompt, transcript, history),
            temperature: Some(0.7),
            max_tokens: Some(200),
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("LLM request: {} ({} history turns)", url, history.len());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ClientError::Service(format!("LLM API error {}: {}", status, text)));
        }

        let parsed: ChatResponse = res.json().await?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ClientError::Service("LLM returned no content".to_string()))?;
        info!("💬 Response: \"{}\"", reply);
        Ok(reply)
    }
}
