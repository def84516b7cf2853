//! Orchestrator: picks an agent for an utterance.
//!
//! Two branches: with an active session the utterance is first classified
//! as an answer to the pending prompt (route back to the same agent as a
//! resume) or a fresh intent; without one it is pure selection. Selection
//! asks the LLM with a structured prompt; any LLM failure falls back to
//! keyword matching against agent capabilities, defaulting to
//! `chat_agent`.

use crate::bus::SessionAction;
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, LlmClient, chat_json};
use crate::memory::MemorySubsystem;
use crate::session::{SessionManager, SessionState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Default agent when nothing else matches.
pub const FALLBACK_AGENT: &str = "chat_agent";

/// The orchestrator's routing decision.
#[derive(Debug, Clone)]
pub struct OrchestratorDecision {
    pub selected_agent: String,
    pub confidence: f32,
    pub reasoning: String,
    pub parameters: serde_json::Value,
    /// Resume the active session or open a new one.
    pub action: SessionAction,
    /// The session being resumed, when `action` is `Resume`.
    pub session_id: Option<String>,
}

pub struct Orchestrator {
    agents: Vec<AgentConfig>,
    llm: Arc<dyn LlmClient>,
    sessions: Arc<SessionManager>,
    memory: Arc<MemorySubsystem>,
    queries: AtomicU64,
    llm_fallbacks: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        agents: Vec<AgentConfig>,
        llm: Arc<dyn LlmClient>,
        sessions: Arc<SessionManager>,
        memory: Arc<MemorySubsystem>,
    ) -> Self {
        Self {
            agents: agents.into_iter().filter(|a| a.enabled).collect(),
            llm,
            sessions,
            memory,
            queries: AtomicU64::new(0),
            llm_fallbacks: AtomicU64::new(0),
        }
    }

    /// Route one utterance.
    pub async fn decide(&self, query: &str, user_id: &str) -> OrchestratorDecision {
        self.queries.fetch_add(1, Ordering::Relaxed);

        if let Some(active) = self.sessions.get_active_session(user_id) {
            if active.state == SessionState::WaitingInput {
                let is_answer = self.classify_answer(query, &active.agent_name, active.pending_prompt.as_deref()).await;
                if is_answer {
                    debug!(agent = %active.agent_name, "utterance classified as answer to pending prompt");
                    return OrchestratorDecision {
                        selected_agent: active.agent_name.clone(),
                        confidence: 0.9,
                        reasoning: "answer to the pending session prompt".to_owned(),
                        parameters: serde_json::Value::Null,
                        action: SessionAction::Resume,
                        session_id: Some(active.session_id),
                    };
                }
            }
        }

        let mut decision = self.select(query).await;
        // A fresh intent may still land on the agent that is already
        // active; the adapter resumes rather than stacking a twin session.
        if let Some(active) = self.sessions.get_active_session(user_id) {
            if active.agent_name == decision.selected_agent {
                decision.action = SessionAction::Resume;
                decision.session_id = Some(active.session_id);
            }
        }
        decision
    }

    async fn classify_answer(
        &self,
        query: &str,
        agent_name: &str,
        pending_prompt: Option<&str>,
    ) -> bool {
        let prompt = format!(
            "助手 {agent_name} 正在等待用户回答问题: \"{}\"\n\
             用户说: \"{query}\"\n\
             判断用户是在回答这个问题，还是提出了一个新的、无关的请求。\n\
             只输出JSON: {{\"is_answer\": true/false}}",
            pending_prompt.unwrap_or("(无提示)"),
        );
        match chat_json(
            self.llm.as_ref(),
            &[
                ChatMessage::system("你是车载语音助手的意图分类器，只输出JSON。"),
                ChatMessage::user(prompt),
            ],
        )
        .await
        {
            Ok(value) => value["is_answer"].as_bool().unwrap_or(true),
            Err(e) => {
                warn!("answer classification failed, using rules: {e}");
                self.llm_fallbacks.fetch_add(1, Ordering::Relaxed);
                // Rule fallback: stay with the pending agent unless the
                // utterance clearly names another agent's domain.
                !self
                    .rule_match(query)
                    .is_some_and(|matched| matched != agent_name)
            }
        }
    }

    async fn select(&self, query: &str) -> OrchestratorDecision {
        let roster: Vec<serde_json::Value> = self
            .agents
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "description": a.description,
                    "capabilities": a.capabilities,
                })
            })
            .collect();
        let recent = self.memory.recall_recent(5);
        let history: Vec<serde_json::Value> = recent
            .iter()
            .map(|m| serde_json::json!({"user": m.query, "assistant": m.response}))
            .collect();
        let profile = self.memory.long_term();

        let prompt = format!(
            "为用户的请求选择最合适的Agent。\n\n\
             可用Agents:\n{}\n\n\
             最近对话:\n{}\n\n\
             用户画像摘要: {}\n\n\
             用户请求: \"{query}\"\n\n\
             只输出JSON: {{\"selected_agent\": \"...\", \"confidence\": 0.0-1.0, \
             \"reasoning\": \"...\", \"parameters\": {{}}}}",
            serde_json::to_string(&roster).unwrap_or_default(),
            serde_json::to_string(&history).unwrap_or_default(),
            profile.summary,
        );

        match chat_json(
            self.llm.as_ref(),
            &[
                ChatMessage::system("你是车载语音助手的调度器，只输出JSON。"),
                ChatMessage::user(prompt),
            ],
        )
        .await
        {
            Ok(value) => {
                let name = value["selected_agent"].as_str().unwrap_or_default();
                if self.agents.iter().any(|a| a.name == name) {
                    return OrchestratorDecision {
                        selected_agent: name.to_owned(),
                        confidence: value["confidence"].as_f64().unwrap_or(0.5) as f32,
                        reasoning: value["reasoning"].as_str().unwrap_or_default().to_owned(),
                        parameters: value.get("parameters").cloned().unwrap_or_default(),
                        action: SessionAction::New,
                        session_id: None,
                    };
                }
                warn!(selected = name, "LLM selected unknown agent, using rules");
                self.rule_decision(query)
            }
            Err(e) => {
                warn!("agent selection failed, using rules: {e}");
                self.llm_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.rule_decision(query)
            }
        }
    }

    /// Keyword match against declared capabilities; the longest matching
    /// keyword wins so `播放音乐` beats a stray single-character hit.
    fn rule_match(&self, query: &str) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for agent in &self.agents {
            for capability in &agent.capabilities {
                if !capability.is_empty() && query.contains(capability.as_str()) {
                    let len = capability.chars().count();
                    if best.is_none_or(|(_, best_len)| len > best_len) {
                        best = Some((agent.name.as_str(), len));
                    }
                }
            }
        }
        best.map(|(name, _)| name)
    }

    fn rule_decision(&self, query: &str) -> OrchestratorDecision {
        let (agent, confidence, reasoning) = match self.rule_match(query) {
            Some(name) => (name.to_owned(), 0.6, "capability keyword match".to_owned()),
            None => (
                FALLBACK_AGENT.to_owned(),
                0.3,
                "no capability matched, defaulting to chat".to_owned(),
            ),
        };
        OrchestratorDecision {
            selected_agent: agent,
            confidence,
            reasoning,
            parameters: serde_json::Value::Null,
            action: SessionAction::New,
            session_id: None,
        }
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "queries": self.queries.load(Ordering::Relaxed),
            "llm_fallbacks": self.llm_fallbacks.load(Ordering::Relaxed),
        })
    }
}
