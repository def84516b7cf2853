//! Planner meta-agent: decomposes a complex query into a dependency plan
//! and runs it across the other agents.
//!
//! Each subtask gets its own session id and an observable
//! `agent_dispatch_request` event carrying the planner's correlation id;
//! execution itself goes straight through the runtime. A failed task
//! aborts only its transitive dependents; independent tasks still run.

use super::{AgentContext, AgentResponse, AgentRuntime, AgentStatus};
use crate::bus::{DispatchRequest, Event, EventBus, SessionAction};
use crate::llm::{ChatMessage, LlmClient, chat_json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};
use uuid::Uuid;

/// One planned task.
#[derive(Debug, Clone)]
struct PlannedTask {
    task_id: String,
    description: String,
    agent: String,
    depends_on: Vec<String>,
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    Aborted,
}

pub struct PlannerAgent {
    name: String,
    llm: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
    runtime: Mutex<Weak<AgentRuntime>>,
}

impl PlannerAgent {
    pub fn new(name: &str, llm: Arc<dyn LlmClient>, bus: Arc<EventBus>) -> Self {
        Self {
            name: name.to_owned(),
            llm,
            bus,
            runtime: Mutex::new(Weak::new()),
        }
    }

    /// Late-bound runtime reference; weak so the runtime can own the
    /// planner without a cycle.
    pub fn bind_runtime(&self, runtime: &Arc<AgentRuntime>) {
        *self.runtime.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(runtime);
    }

    pub async fn execute(&self, query: &str, ctx: &AgentContext) -> AgentResponse {
        let Some(runtime) = self
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
        else {
            return AgentResponse::error(&self.name, query, "抱歉，系统还没有准备好");
        };

        let tasks = match self.build_plan(query, &runtime).await {
            Ok(tasks) => tasks,
            Err(reason) => {
                warn!(agent = %self.name, "planning failed: {reason}");
                return AgentResponse::error(&self.name, query, "抱歉，我没能拆解这个请求");
            }
        };
        info!(agent = %self.name, tasks = tasks.len(), "plan ready");

        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::new();
        let mut results: Vec<serde_json::Value> = Vec::new();

        // Rounds of ready tasks until nothing remains runnable.
        loop {
            let ready: Vec<PlannedTask> = tasks
                .iter()
                .filter(|t| !outcomes.contains_key(&t.task_id))
                .filter(|t| {
                    t.depends_on
                        .iter()
                        .all(|d| outcomes.get(d) == Some(&TaskOutcome::Completed))
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }

            for task in ready {
                let sub_session_id = Uuid::new_v4().to_string();
                let mut dispatch = Event::agent_dispatch(
                    &self.name,
                    DispatchRequest {
                        agent_name: task.agent.clone(),
                        query: task.description.clone(),
                        user_id: ctx.user_id.clone(),
                        action: SessionAction::New,
                        session_id: Some(sub_session_id.clone()),
                        parameters: serde_json::Value::Null,
                    },
                );
                if let Some(correlation) = &ctx.correlation_id {
                    dispatch = dispatch.with_correlation(correlation.clone());
                }
                self.bus.publish(dispatch);

                let sub_ctx = AgentContext {
                    user_id: ctx.user_id.clone(),
                    correlation_id: ctx.correlation_id.clone(),
                    session: None,
                    parameters: serde_json::Value::Null,
                };
                let response = runtime.execute(&task.agent, &task.description, &sub_ctx).await;
                let outcome = if response.status == AgentStatus::Error {
                    TaskOutcome::Failed
                } else {
                    TaskOutcome::Completed
                };
                results.push(serde_json::json!({
                    "task_id": task.task_id,
                    "description": task.description,
                    "agent": task.agent,
                    "session_id": sub_session_id,
                    "status": if outcome == TaskOutcome::Completed { "completed" } else { "failed" },
                    "response": response.message,
                }));
                outcomes.insert(task.task_id.clone(), outcome);
            }

            // Abort the transitive dependents of anything that failed.
            let aborted = transitive_dependents_of_failures(&tasks, &outcomes);
            for task_id in aborted {
                if !outcomes.contains_key(&task_id) {
                    if let Some(task) = tasks.iter().find(|t| t.task_id == task_id) {
                        results.push(serde_json::json!({
                            "task_id": task.task_id,
                            "description": task.description,
                            "agent": task.agent,
                            "status": "aborted",
                            "response": "上游任务失败",
                        }));
                    }
                    outcomes.insert(task_id, TaskOutcome::Aborted);
                }
            }
        }

        let message = self.summarize(query, &results).await;
        AgentResponse::success(&self.name, query, message)
            .with_data(serde_json::json!({ "tasks": results }))
    }

    async fn build_plan(
        &self,
        query: &str,
        runtime: &AgentRuntime,
    ) -> std::result::Result<Vec<PlannedTask>, String> {
        let roster: Vec<String> = runtime
            .profiles()
            .iter()
            .filter(|p| p.name != self.name)
            .map(|p| {
                format!(
                    "- {}: {} (能力: {})",
                    p.name,
                    p.description,
                    p.capabilities.join("、")
                )
            })
            .collect();
        let prompt = format!(
            "把用户的复杂请求拆解为可执行的任务计划。\n\n\
             可用Agents:\n{}\n\n\
             用户请求: \"{query}\"\n\n\
             只输出JSON: {{\"tasks\": [{{\"task_id\": \"t1\", \"description\": \"...\", \
             \"agent\": \"...\", \"depends_on\": []}}]}}\n\
             相互独立的任务不要加依赖。",
            roster.join("\n"),
        );
        let plan = chat_json(
            self.llm.as_ref(),
            &[
                ChatMessage::system("你是车载语音助手的任务规划器，只输出JSON。"),
                ChatMessage::user(prompt),
            ],
        )
        .await
        .map_err(|e| e.to_string())?;

        let raw_tasks = plan["tasks"].as_array().ok_or("plan missing tasks")?;
        if raw_tasks.is_empty() {
            return Err("empty plan".to_owned());
        }
        let mut tasks = Vec::new();
        for raw in raw_tasks {
            let task = PlannedTask {
                task_id: raw["task_id"].as_str().ok_or("task missing task_id")?.to_owned(),
                description: raw["description"]
                    .as_str()
                    .ok_or("task missing description")?
                    .to_owned(),
                agent: raw["agent"].as_str().ok_or("task missing agent")?.to_owned(),
                depends_on: raw["depends_on"]
                    .as_array()
                    .map(|deps| {
                        deps.iter()
                            .filter_map(|d| d.as_str().map(ToOwned::to_owned))
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            if runtime.profile(&task.agent).is_none() || task.agent == self.name {
                return Err(format!("plan names unknown agent: {}", task.agent));
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn summarize(&self, query: &str, results: &[serde_json::Value]) -> String {
        let prompt = format!(
            "用户请求: \"{query}\"\n任务执行结果:\n{}\n\
             用一两句话向用户汇报整体结果。",
            serde_json::to_string(results).unwrap_or_default()
        );
        match self
            .llm
            .chat(&[
                ChatMessage::system("你是车载语音助手，直接输出给用户的话。"),
                ChatMessage::user(prompt),
            ])
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_owned(),
            _ => {
                // Rule fallback: count outcomes.
                let done = results
                    .iter()
                    .filter(|r| r["status"] == "completed")
                    .count();
                format!("已完成{done}项任务，共{}项", results.len())
            }
        }
    }
}

/// Task ids whose dependency chain reaches a failed or aborted task.
fn transitive_dependents_of_failures(
    tasks: &[PlannedTask],
    outcomes: &HashMap<String, TaskOutcome>,
) -> Vec<String> {
    let mut bad: HashSet<String> = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, TaskOutcome::Failed | TaskOutcome::Aborted))
        .map(|(id, _)| id.clone())
        .collect();
    loop {
        let mut grew = false;
        for task in tasks {
            if bad.contains(&task.task_id) {
                continue;
            }
            if task.depends_on.iter().any(|d| bad.contains(d)) {
                bad.insert(task.task_id.clone());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    tasks
        .iter()
        .filter(|t| bad.contains(&t.task_id) && !outcomes.contains_key(&t.task_id))
        .map(|t| t.task_id.clone())
        .collect()
}
