//! Reply generation: the conversational model behind the agent.

use crate::booking::{ConversationTurn, Speaker};
use crate::config::AgentConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::prompt::{render_hint, system_prompt};
use crate::session::ReplyHint;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Produces the assistant's next line from recent history and booking context.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, context: &[ConversationTurn], hint: &ReplyHint) -> VoiceResult<String>;
}

/// OpenAI-compatible chat completions backend.
///
/// Works with any server exposing `/chat/completions` (OpenAI, OpenRouter, a local proxy).
#[derive(Debug, Clone)]
pub struct OpenAiReplyGenerator {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    termination_marker: String,
    client: reqwest::Client,
}

impl OpenAiReplyGenerator {
    /// Build from agent config. Fails when no API key is configured.
    pub fn from_config(config: &AgentConfig) -> VoiceResult<Self> {
        let api_key = config
            .llm_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                VoiceError::Config("reply generation requires OPENAI_API_KEY".to_string())
            })?;
        let generator = Self::new(
            config.llm_api_url.clone(),
            api_key,
            config.llm_model.clone(),
            config.generation_timeout(),
        )?;
        Ok(Self {
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            termination_marker: config.termination_marker.clone(),
            ..generator
        })
    }

    /// Create with explicit settings (e.g. for tests or non-config wiring).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 256,
            termination_marker: "[CALL_COMPLETE]".to_string(),
            client,
        })
    }

    fn request_body(&self, context: &[ConversationTurn], hint: &ReplyHint) -> Value {
        json!({
            "model": self.model,
            "messages": build_messages(&system_prompt(&self.termination_marker), context, hint),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiReplyGenerator {
    async fn generate(&self, context: &[ConversationTurn], hint: &ReplyHint) -> VoiceResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("Requesting reply from {} ({} context turns)", self.model, context.len());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(context, hint))
            .send()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "chat API error {}: {}",
                status, body
            )));
        }
        let json: Value = res.json().await?;
        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(VoiceError::Generation("empty completion".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Chat messages: system prompt, then the context window, then the booking hint.
pub fn build_messages(system: &str, context: &[ConversationTurn], hint: &ReplyHint) -> Vec<Value> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(json!({ "role": "system", "content": system }));
    for turn in context {
        let role = match turn.speaker {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": turn.text }));
    }
    messages.push(json!({ "role": "system", "content": render_hint(hint) }));
    messages
}

/// Offline generator: repeats the last user utterance. Used when no API key is set.
#[derive(Debug, Default)]
pub struct EchoReplyGenerator;

#[async_trait]
impl ReplyGenerator for EchoReplyGenerator {
    async fn generate(&self, context: &[ConversationTurn], _hint: &ReplyHint) -> VoiceResult<String> {
        let last = context
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::User)
            .map(|t| t.text.as_str())
            .unwrap_or_default();
        info!("Echo reply for: {}", last);
        Ok(format!("You said: {}", last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingRecord;
    use chrono::Utc;

    fn turn(speaker: Speaker, text: &str) -> ConversationTurn {
        ConversationTurn {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn hint() -> ReplyHint {
        let booking = BookingRecord::new();
        ReplyHint {
            missing_fields: booking.missing_fields(),
            booking,
            request_confirmation: false,
        }
    }

    #[test]
    fn messages_wrap_context_with_system_entries() {
        let context = vec![
            turn(Speaker::Assistant, "Hello"),
            turn(Speaker::User, "pickup from Delhi"),
        ];
        let messages = build_messages("SYSTEM", &context, &hint());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "SYSTEM");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "pickup from Delhi");
        assert_eq!(messages[3]["role"], "system");
        assert!(messages[3]["content"]
            .as_str()
            .unwrap()
            .contains("Still missing"));
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = AgentConfig::default();
        assert!(matches!(
            OpenAiReplyGenerator::from_config(&config),
            Err(VoiceError::Config(_))
        ));

        let config = AgentConfig {
            llm_api_key: Some("sk-test".into()),
            llm_max_tokens: 64,
            ..AgentConfig::default()
        };
        let generator = OpenAiReplyGenerator::from_config(&config).unwrap();
        assert_eq!(generator.max_tokens, 64);
        let body = generator.request_body(&[turn(Speaker::User, "hi there")], &hint());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 64);
        assert!(body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("[CALL_COMPLETE]"));
    }

    #[tokio::test]
    async fn echo_repeats_last_user_turn() {
        let context = vec![
            turn(Speaker::User, "first"),
            turn(Speaker::Assistant, "ok"),
            turn(Speaker::User, "drop to Pune"),
        ];
        let reply = EchoReplyGenerator.generate(&context, &hint()).await.unwrap();
        assert_eq!(reply, "You said: drop to Pune");
    }
}
