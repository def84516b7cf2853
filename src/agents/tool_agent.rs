//! Tool-using agent: LLM function calling over the tool registry.
//!
//! The LLM is asked for structured JSON actions
//! (`call_tool` / `ask_user` / `final`); when a model answers in plain
//! text instead, an interrogative heuristic decides between
//! `waiting_input` and a final reply. Returning `waiting_input` instead
//! of a terminal status is what turns this single implementation into a
//! multi-turn agent, without a hand-coded dialogue state machine.

use super::{AgentContext, AgentResponse};
use crate::exec::ToolManager;
use crate::llm::{ChatMessage, LlmClient, parse_json_reply};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bound on tool-call rounds within one invocation.
const MAX_TOOL_ROUNDS: usize = 4;

/// Tokens that mark a plain-text reply as a question to the user.
const INTERROGATIVE_TOKENS: &[&str] = &[
    "什么", "哪", "几", "吗", "呢", "如何", "怎么", "请问", "多少", "what", "which", "how",
];

/// Returns true when a plain-text LLM reply reads as a question.
pub fn looks_like_question(text: &str) -> bool {
    if text.contains('?') || text.contains('？') {
        return true;
    }
    INTERROGATIVE_TOKENS.iter().any(|t| text.contains(t))
}

/// A tool-using agent bound to a subset of the registry.
pub struct ToolUsingAgent {
    name: String,
    system_prompt: String,
    /// Registry tool names this agent may call; empty means chat-only.
    tool_names: Vec<String>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolManager>,
}

impl ToolUsingAgent {
    pub fn new(
        name: &str,
        system_prompt: &str,
        tool_names: Vec<String>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolManager>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            system_prompt: system_prompt.to_owned(),
            tool_names,
            llm,
            tools,
        }
    }

    fn tool_schemas(&self) -> Vec<serde_json::Value> {
        self.tool_names
            .iter()
            .filter_map(|name| self.tools.registry().get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema(),
                })
            })
            .collect()
    }

    fn build_system_message(&self) -> ChatMessage {
        let schemas = self.tool_schemas();
        let mut content = self.system_prompt.clone();
        if schemas.is_empty() {
            content.push_str("\n直接用一两句话回答用户。");
        } else {
            content.push_str(&format!(
                "\n可用工具:\n{}\n\n\
                 每一步只输出一个JSON对象，三种形式之一:\n\
                 {{\"action\": \"call_tool\", \"tool\": \"工具名\", \"arguments\": {{...}}}}\n\
                 {{\"action\": \"ask_user\", \"prompt\": \"向用户提问\"}}\n\
                 {{\"action\": \"final\", \"message\": \"给用户的最终答复\"}}\n\
                 缺少必要参数时用 ask_user 追问，不要编造参数。",
                serde_json::to_string(&schemas).unwrap_or_default()
            ));
        }
        ChatMessage::system(content)
    }

    /// Run one invocation.
    pub async fn execute(&self, query: &str, ctx: &AgentContext) -> AgentResponse {
        let mut messages = vec![self.build_system_message()];
        if let Some(session) = &ctx.session {
            if !session.context.is_empty() {
                messages.push(ChatMessage::system(format!(
                    "会话上下文: {}",
                    serde_json::to_string(&session.context).unwrap_or_default()
                )));
            }
        }
        if !ctx.parameters.is_null() {
            messages.push(ChatMessage::system(format!(
                "调度器提取的参数: {}",
                ctx.parameters
            )));
        }
        messages.push(ChatMessage::user(query.to_owned()));

        let mut tools_used: Vec<serde_json::Value> = Vec::new();
        for round in 0..=MAX_TOOL_ROUNDS {
            let reply = match self.llm.chat(&messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(agent = %self.name, "LLM call failed: {e}");
                    return AgentResponse::error(&self.name, query, "抱歉，我这边出了点问题");
                }
            };

            let Ok(action) = parse_json_reply(&reply) else {
                // Plain text: question heuristic decides the status.
                let text = reply.trim().to_owned();
                return if looks_like_question(&text) {
                    AgentResponse::waiting(&self.name, query, text)
                } else {
                    self.finish(query, text, &tools_used)
                };
            };

            match action["action"].as_str() {
                Some("ask_user") => {
                    let prompt = action["prompt"].as_str().unwrap_or("请再说一遍?").to_owned();
                    return AgentResponse::waiting(&self.name, query, prompt);
                }
                Some("final") => {
                    let message = action["message"].as_str().unwrap_or_default().to_owned();
                    return self.finish(query, message, &tools_used);
                }
                Some("call_tool") => {
                    let tool_name = action["tool"].as_str().unwrap_or_default().to_owned();
                    let arguments = action
                        .get("arguments")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);
                    debug!(agent = %self.name, tool = %tool_name, round, "tool call");
                    let observation = match self.tools.execute(&tool_name, &arguments) {
                        Ok(output) => {
                            tools_used.push(serde_json::json!({
                                "tool": &tool_name,
                                "arguments": &arguments,
                                "message": &output.message,
                            }));
                            serde_json::json!({
                                "tool": tool_name,
                                "success": output.success,
                                "message": output.message,
                                "data": output.data,
                            })
                        }
                        Err(e) => {
                            warn!(agent = %self.name, tool = %tool_name, "tool failed: {e}");
                            serde_json::json!({
                                "tool": tool_name,
                                "success": false,
                                "message": e.to_string(),
                            })
                        }
                    };
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(format!("工具结果: {observation}")));
                }
                _ => {
                    return self.finish(
                        query,
                        action["message"]
                            .as_str()
                            .unwrap_or("好的")
                            .to_owned(),
                        &tools_used,
                    );
                }
            }
        }
        warn!(agent = %self.name, "tool round limit reached");
        AgentResponse::error(&self.name, query, "抱歉，这个请求太复杂了")
    }

    fn finish(
        &self,
        query: &str,
        message: String,
        tools_used: &[serde_json::Value],
    ) -> AgentResponse {
        let mut response = AgentResponse::success(&self.name, query, message);
        if !tools_used.is_empty() {
            response = response.with_data(serde_json::json!({ "tools_used": tools_used }));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentStatus;
    use crate::llm::ScriptedLlm;

    fn agent(llm: ScriptedLlm) -> ToolUsingAgent {
        ToolUsingAgent::new(
            "music_agent",
            "你是车载音乐助手。",
            vec!["play_music".to_owned(), "set_volume".to_owned()],
            Arc::new(llm),
            Arc::new(ToolManager::new()),
        )
    }

    #[test]
    fn question_heuristic() {
        assert!(looks_like_question("好的,请问想听什么歌?"));
        assert!(looks_like_question("要开到几度呢"));
        assert!(!looks_like_question("已经为您打开空调"));
    }

    #[tokio::test]
    async fn ask_user_action_yields_waiting_input() {
        let llm = ScriptedLlm::new()
            .with_fallback("{\"action\": \"ask_user\", \"prompt\": \"好的,请问想听什么歌?\"}");
        let response = agent(llm).execute("播放音乐", &AgentContext::default()).await;
        assert_eq!(response.status, AgentStatus::WaitingInput);
        assert_eq!(response.prompt.as_deref(), Some("好的,请问想听什么歌?"));
    }

    #[tokio::test]
    async fn tool_call_then_final() {
        let llm = ScriptedLlm::new()
            .with_rule(
                "工具结果",
                "{\"action\": \"final\", \"message\": \"正在播放周杰伦的晴天\"}",
            )
            .with_fallback(
                "{\"action\": \"call_tool\", \"tool\": \"play_music\", \"arguments\": {\"song\": \"晴天\", \"artist\": \"周杰伦\"}}",
            );
        let tools = Arc::new(ToolManager::new());
        let agent = ToolUsingAgent::new(
            "music_agent",
            "你是车载音乐助手。",
            vec!["play_music".to_owned()],
            Arc::new(llm),
            Arc::clone(&tools),
        );
        let response = agent
            .execute("播放周杰伦的晴天", &AgentContext::default())
            .await;
        assert_eq!(response.status, AgentStatus::Success);
        assert_eq!(response.message, "正在播放周杰伦的晴天");
        let data = response.data.expect("tool data");
        assert_eq!(data["tools_used"][0]["tool"], "play_music");
        // The tool actually ran against vehicle state.
        let snapshot = tools.vehicle_snapshot();
        assert!(snapshot.music_playing);
        assert_eq!(snapshot.current_track, "晴天");
    }

    #[tokio::test]
    async fn plain_text_question_becomes_waiting() {
        let llm = ScriptedLlm::new().with_fallback("请问要去哪个城市?");
        let response = agent(llm).execute("订个酒店", &AgentContext::default()).await;
        assert_eq!(response.status, AgentStatus::WaitingInput);
    }

    #[tokio::test]
    async fn plain_text_statement_is_final() {
        let llm = ScriptedLlm::new().with_fallback("已经为您处理好了");
        let response = agent(llm).execute("调低音量", &AgentContext::default()).await;
        assert_eq!(response.status, AgentStatus::Success);
    }

    #[tokio::test]
    async fn failed_tool_reported_to_llm_then_recovers() {
        let llm = ScriptedLlm::new()
            .with_rule(
                "工具结果",
                "{\"action\": \"final\", \"message\": \"音量超出范围,已保持原样\"}",
            )
            .with_fallback(
                "{\"action\": \"call_tool\", \"tool\": \"set_volume\", \"arguments\": {\"volume\": 400}}",
            );
        let response = agent(llm).execute("音量四百", &AgentContext::default()).await;
        assert_eq!(response.status, AgentStatus::Success);
        assert!(response.message.contains("超出范围"));
    }
}
