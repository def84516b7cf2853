//! Agent runtime: three agent flavors plus the planner meta-agent.
//!
//! The flavors are a tagged variant dispatched by the runtime, not a
//! class hierarchy:
//!
//! - **Simple**: synchronous single-turn handler.
//! - **Tool-using**: LLM with structured actions over the tool registry;
//!   yields `waiting_input` when it needs more from the user, so one
//!   implementation covers single- and multi-turn behavior.
//! - **Session**: explicit multi-turn handler fed the prior session state.
//! - **Planner**: decomposes a complex query into a dependency-ordered
//!   plan and runs it across the other agents.
//!
//! Agents never touch `session_id`; the agent adapter stamps it.

pub mod planner;
pub mod session_agent;
pub mod tool_agent;

pub use planner::PlannerAgent;
pub use session_agent::{SlotFillingAgent, SlotSpec};
pub use tool_agent::ToolUsingAgent;

use crate::config::AgentConfig;
use crate::session::AgentSession;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Response status of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    WaitingInput,
    Completed,
    Error,
}

/// What an agent hands back to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent: String,
    pub query: String,
    pub status: AgentStatus,
    pub message: String,
    /// Prompt to replay when `status` is `waiting_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Filled by the agent adapter, never by the agent itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentResponse {
    pub fn success(agent: &str, query: &str, message: impl Into<String>) -> Self {
        Self {
            agent: agent.to_owned(),
            query: query.to_owned(),
            status: AgentStatus::Success,
            message: message.into(),
            prompt: None,
            data: None,
            session_id: None,
        }
    }

    pub fn waiting(agent: &str, query: &str, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            agent: agent.to_owned(),
            query: query.to_owned(),
            status: AgentStatus::WaitingInput,
            message: prompt.clone(),
            prompt: Some(prompt),
            data: None,
            session_id: None,
        }
    }

    pub fn error(agent: &str, query: &str, message: impl Into<String>) -> Self {
        Self {
            agent: agent.to_owned(),
            query: query.to_owned(),
            status: AgentStatus::Error,
            message: message.into(),
            prompt: None,
            data: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Static agent declaration, taken from configuration.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub priority: u8,
    pub interruptible: bool,
}

impl AgentProfile {
    pub fn new(name: &str, description: &str, priority: u8, interruptible: bool) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            capabilities: Vec::new(),
            priority,
            interruptible,
        }
    }
}

impl From<&AgentConfig> for AgentProfile {
    fn from(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            capabilities: config.capabilities.clone(),
            priority: config.priority,
            interruptible: config.interruptible,
        }
    }
}

/// Invocation context assembled by the agent adapter.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub user_id: String,
    pub correlation_id: Option<String>,
    /// Prior session state when resuming a multi-turn dialogue.
    pub session: Option<AgentSession>,
    /// Parameters extracted by the orchestrator.
    pub parameters: serde_json::Value,
}

/// Synchronous single-turn handler.
pub trait SimpleHandler: Send + Sync {
    fn handle(&self, query: &str, ctx: &AgentContext) -> AgentResponse;
}

/// Multi-turn handler fed the prior session state through the context.
pub trait SessionHandler: Send + Sync {
    fn process(&self, query: &str, ctx: &AgentContext) -> AgentResponse;
}

/// The tagged agent variant.
pub enum AgentBehavior {
    Simple(Arc<dyn SimpleHandler>),
    ToolUsing(ToolUsingAgent),
    Session(Arc<dyn SessionHandler>),
    Planner(PlannerAgent),
}

/// A registered agent: profile + behavior.
pub struct Agent {
    pub profile: AgentProfile,
    pub behavior: AgentBehavior,
}

/// Executes agents by name.
pub struct AgentRuntime {
    agents: HashMap<String, Agent>,
    order: Vec<String>,
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register an agent. Re-registering a name replaces the behavior.
    pub fn register(&mut self, agent: Agent) {
        let name = agent.profile.name.clone();
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.agents.insert(name, agent);
    }

    pub fn profile(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.get(name).map(|a| &a.profile)
    }

    /// Profiles in registration order.
    pub fn profiles(&self) -> Vec<&AgentProfile> {
        self.order
            .iter()
            .filter_map(|n| self.agents.get(n).map(|a| &a.profile))
            .collect()
    }

    /// Share the runtime and wire the planner variants back to it.
    pub fn into_shared(self) -> Arc<Self> {
        let shared = Arc::new(self);
        for name in &shared.order {
            if let Some(agent) = shared.agents.get(name) {
                if let AgentBehavior::Planner(planner) = &agent.behavior {
                    planner.bind_runtime(&shared);
                }
            }
        }
        shared
    }

    /// Execute one agent. Unknown names produce an `error` response rather
    /// than a crate error; the pipeline treats it like any agent failure.
    ///
    /// Returns a boxed future: the planner recurses back into the runtime
    /// for its subtasks, and the indirection keeps the future type finite.
    pub fn execute<'a>(
        &'a self,
        name: &'a str,
        query: &'a str,
        ctx: &'a AgentContext,
    ) -> Pin<Box<dyn Future<Output = AgentResponse> + Send + 'a>> {
        Box::pin(async move {
            let Some(agent) = self.agents.get(name) else {
                warn!(agent = name, "dispatch to unknown agent");
                return AgentResponse::error(name, query, "抱歉，我还不会处理这类请求");
            };
            match &agent.behavior {
                AgentBehavior::Simple(handler) => handler.handle(query, ctx),
                AgentBehavior::ToolUsing(tool_agent) => tool_agent.execute(query, ctx).await,
                AgentBehavior::Session(handler) => handler.process(query, ctx),
                AgentBehavior::Planner(planner) => planner.execute(query, ctx).await,
            }
        })
    }
}
