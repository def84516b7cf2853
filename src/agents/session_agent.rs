//! Slot-filling session agent.
//!
//! The canonical `Session` flavor: a fixed list of slots, each with the
//! prompt used to ask for it. Every turn folds the user's answer into the
//! slot state carried by the session context, then either asks for the
//! next missing slot (`waiting_input`) or completes. The agent never sees
//! or sets `session_id`; the adapter persists the returned state between
//! turns.

use super::{AgentContext, AgentResponse, SessionHandler};
use tracing::debug;

/// One slot: a context key and the prompt that elicits it.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    pub key: String,
    pub prompt: String,
}

impl SlotSpec {
    pub fn new(key: &str, prompt: &str) -> Self {
        Self {
            key: key.to_owned(),
            prompt: prompt.to_owned(),
        }
    }
}

/// Multi-turn slot-filling agent.
pub struct SlotFillingAgent {
    name: String,
    slots: Vec<SlotSpec>,
    /// Completion template; `{key}` placeholders expand to slot values.
    completion_template: String,
}

impl SlotFillingAgent {
    pub fn new(name: &str, slots: Vec<SlotSpec>, completion_template: &str) -> Self {
        Self {
            name: name.to_owned(),
            slots,
            completion_template: completion_template.to_owned(),
        }
    }

    fn render_completion(&self, filled: &serde_json::Map<String, serde_json::Value>) -> String {
        let mut message = self.completion_template.clone();
        for (key, value) in filled {
            if let Some(text) = value.as_str() {
                message = message.replace(&format!("{{{key}}}"), text);
            }
        }
        message
    }
}

impl SessionHandler for SlotFillingAgent {
    fn process(&self, query: &str, ctx: &AgentContext) -> AgentResponse {
        // Recover slot state stored by the adapter on the previous turn.
        let prior = ctx
            .session
            .as_ref()
            .and_then(|s| s.context.get("agent_state"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let mut filled = prior
            .get("slots")
            .and_then(|s| s.as_object())
            .cloned()
            .unwrap_or_default();

        // The current utterance answers whichever slot we asked for last.
        if let Some(awaiting) = prior.get("awaiting").and_then(|a| a.as_str()) {
            if !query.trim().is_empty() {
                debug!(agent = %self.name, slot = awaiting, "slot filled");
                filled.insert(awaiting.to_owned(), serde_json::json!(query.trim()));
            }
        }

        match self.slots.iter().find(|s| !filled.contains_key(&s.key)) {
            Some(missing) => {
                let state = serde_json::json!({
                    "slots": filled,
                    "awaiting": missing.key,
                });
                AgentResponse::waiting(&self.name, query, missing.prompt.clone()).with_data(state)
            }
            None => {
                let message = self.render_completion(&filled);
                AgentResponse {
                    agent: self.name.clone(),
                    query: query.to_owned(),
                    status: super::AgentStatus::Completed,
                    message,
                    prompt: None,
                    data: Some(serde_json::json!({ "slots": filled })),
                    session_id: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStatus;
    use crate::session::{SessionManager, SessionState};
    use crate::config::SessionConfig;

    fn hotel_agent() -> SlotFillingAgent {
        SlotFillingAgent::new(
            "hotel_agent",
            vec![
                SlotSpec::new("city", "请问哪个城市?"),
                SlotSpec::new("date", "请问哪天入住?"),
            ],
            "好的，已为您预订{date}在{city}的酒店",
        )
    }

    #[test]
    fn first_turn_asks_first_slot() {
        let agent = hotel_agent();
        let response = agent.process("帮我订个酒店", &AgentContext::default());
        assert_eq!(response.status, AgentStatus::WaitingInput);
        assert_eq!(response.prompt.as_deref(), Some("请问哪个城市?"));
        assert_eq!(response.data.as_ref().expect("state")["awaiting"], "city");
    }

    #[test]
    fn turns_fill_slots_until_completion() {
        let agent = hotel_agent();
        let manager = SessionManager::new(SessionConfig::default());
        let session = manager.create("hotel_agent", "u1", 60, false).expect("session");

        // Turn 1: ask for city.
        let mut ctx = AgentContext {
            user_id: "u1".to_owned(),
            session: manager.get_session(&session.session_id),
            ..AgentContext::default()
        };
        let r1 = agent.process("帮我订个酒店", &ctx);
        manager.update_context(&session.session_id, "agent_state", r1.data.expect("state"));

        // Turn 2: city answered, ask for date.
        ctx.session = manager.get_session(&session.session_id);
        let r2 = agent.process("上海", &ctx);
        assert_eq!(r2.status, AgentStatus::WaitingInput);
        assert_eq!(r2.prompt.as_deref(), Some("请问哪天入住?"));
        manager.update_context(&session.session_id, "agent_state", r2.data.expect("state"));

        // Turn 3: date answered, completed.
        ctx.session = manager.get_session(&session.session_id);
        let r3 = agent.process("周五", &ctx);
        assert_eq!(r3.status, AgentStatus::Completed);
        assert_eq!(r3.message, "好的，已为您预订周五在上海的酒店");

        // The agent itself never set a session id.
        assert!(r3.session_id.is_none());
        assert_eq!(
            manager.get_session(&session.session_id).map(|s| s.state),
            Some(SessionState::Running)
        );
    }
}
