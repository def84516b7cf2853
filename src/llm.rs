//! LLM client seam.
//!
//! The runtime talks to one [`LlmClient`]. The production implementation
//! targets any OpenAI-compatible chat completions server (Ollama, vLLM,
//! llama.cpp server) over blocking HTTP, driven from `spawn_blocking` so
//! async workers never stall. [`ScriptedLlm`] is the offline/mock
//! implementation used in evaluation mode and tests.

use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// One chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// A chat-completion client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the assistant text.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Run a completion that is expected to return a JSON object; code fences
/// and surrounding prose are stripped before parsing.
pub async fn chat_json(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
) -> Result<serde_json::Value> {
    let text = client.chat(messages).await?;
    parse_json_reply(&text)
}

/// Extract the first JSON object from an LLM reply.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    let candidate = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}').unwrap_or(trimmed.len() - 1);
        &trimmed[start..=end]
    } else {
        trimmed
    };
    serde_json::from_str(candidate)
        .map_err(|e| AssistantError::Llm(format!("unparseable JSON reply: {e}")))
}

/// OpenAI-compatible HTTP client.
pub struct ApiLlmClient {
    config: LlmConfig,
    agent: ureq::Agent,
}

impl ApiLlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            config: config.clone(),
            agent,
        }
    }

    fn request_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.api_model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": false,
        });

        let mut request = self.agent.post(&url);
        if !self.config.api_key.is_empty() {
            request = request.set("Authorization", &format!("Bearer {}", self.config.api_key));
        }
        let response = request
            .send_json(body)
            .map_err(|e| AssistantError::Llm(format!("request failed: {e}")))?;
        let parsed: serde_json::Value = response
            .into_json()
            .map_err(|e| AssistantError::Llm(format!("bad response body: {e}")))?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| AssistantError::Llm("response missing message content".to_owned()))
    }
}

#[async_trait]
impl LlmClient for ApiLlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = AssistantError::Llm("no attempts made".to_owned());
        for attempt in 0..attempts {
            if attempt > 0 {
                // Bounded linear backoff between retries.
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            let config_messages = messages.to_vec();
            let url = self.config.api_url.clone();
            let this = self.clone_for_blocking();
            let outcome =
                tokio::task::spawn_blocking(move || this.request_once(&config_messages))
                    .await
                    .map_err(|e| AssistantError::Llm(format!("worker join: {e}")))?;
            match outcome {
                Ok(text) => {
                    debug!(len = text.len(), "LLM reply received");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(attempt, url = %url, "LLM call failed: {e}");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

impl ApiLlmClient {
    fn clone_for_blocking(&self) -> Self {
        Self {
            config: self.config.clone(),
            agent: self.agent.clone(),
        }
    }
}

/// Scripted client: canned replies matched by substring against the last
/// user message, recorded for later inspection. Used when no endpoint is
/// configured and throughout the test suites.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Mutex<Vec<(String, String)>>,
    fallback: Mutex<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: Mutex::new("好的".to_owned()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `response` whenever the last user message contains
    /// `pattern`. Rules are checked in insertion order.
    #[must_use]
    pub fn with_rule(self, pattern: &str, response: &str) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_owned(), response.to_owned()));
        self
    }

    /// Reply used when no rule matches.
    #[must_use]
    pub fn with_fallback(self, response: &str) -> Self {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = response.to_owned();
        self
    }

    /// The prompts this client has seen, oldest first.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(last_user.clone());

        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        for (pattern, response) in rules.iter() {
            if last_user.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.fallback.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_rules_match_in_order() {
        let llm = ScriptedLlm::new()
            .with_rule("导航", "{\"selected_agent\": \"navigation_agent\"}")
            .with_rule("音乐", "{\"selected_agent\": \"music_agent\"}")
            .with_fallback("{\"selected_agent\": \"chat_agent\"}");

        let reply = llm
            .chat(&[ChatMessage::user("帮我导航到机场")])
            .await
            .expect("reply");
        assert!(reply.contains("navigation_agent"));

        let reply = llm.chat(&[ChatMessage::user("今天天气")]).await.expect("reply");
        assert!(reply.contains("chat_agent"));
        assert_eq!(llm.recorded_calls().len(), 2);
    }

    #[test]
    fn json_reply_parses_with_fences() {
        let value =
            parse_json_reply("```json\n{\"action\": \"final\", \"text\": \"好\"}\n```").expect("parse");
        assert_eq!(value["action"], "final");
    }

    #[test]
    fn json_reply_parses_with_prose() {
        let value = parse_json_reply("Here you go: {\"a\": 1} hope that helps").expect("parse");
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn garbage_reply_errors() {
        assert!(parse_json_reply("no json here").is_err());
    }
}
