//! Agent adapter: session arbitration around agent execution.
//!
//! On a dispatch request it reads the agent's priority/interruptibility
//! from its profile, asks the session manager to create or resume a
//! session, invokes the runtime, then routes the response: `waiting_input`
//! parks the session with its prompt, terminal statuses complete it (and
//! replay the prompt of a revived stacked session). The session id is
//! stamped onto the response here; agents never see it.

use super::{AdapterStats, Module};
use crate::agents::{AgentContext, AgentResponse, AgentRuntime, AgentStatus};
use crate::bus::{Event, EventBus, EventKind, SessionAction};
use crate::error::Result;
use crate::session::SessionManager;
use crate::state::{StateEvent, StateMachine};
use crate::tracker::MessageTracker;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const NAME: &str = "agent_adapter";

/// Priority assumed for agents missing a profile.
const DEFAULT_PRIORITY: u8 = 10;

pub struct AgentAdapter {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    tracker: Arc<MessageTracker>,
    sessions: Arc<SessionManager>,
    runtime: Arc<AgentRuntime>,
    agent_busy: Arc<AtomicBool>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AgentAdapter {
    pub fn new(
        bus: Arc<EventBus>,
        state: Arc<StateMachine>,
        tracker: Arc<MessageTracker>,
        sessions: Arc<SessionManager>,
        runtime: Arc<AgentRuntime>,
        agent_busy: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus,
            state,
            tracker,
            sessions,
            runtime,
            agent_busy,
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

struct Worker {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    tracker: Arc<MessageTracker>,
    sessions: Arc<SessionManager>,
    runtime: Arc<AgentRuntime>,
    stats: Arc<AdapterStats>,
}

impl Worker {
    async fn handle(&self, event: Event) {
        let Some(dispatch) = event.dispatch().cloned() else {
            return;
        };
        let correlation = event.correlation_id.clone();
        self.stats.event();

        if let Some(id) = &correlation {
            self.tracker.add_trace(
                id,
                NAME,
                "agent_execution_start",
                serde_json::json!({
                    "agent_name": dispatch.agent_name,
                    "query": dispatch.query,
                }),
                serde_json::Value::Null,
            );
        }

        // Resolve the session: resume when directed (falling back to a new
        // one if resume is rejected), otherwise create under the priority
        // rules.
        let resumed = match (&dispatch.action, &dispatch.session_id) {
            (SessionAction::Resume, Some(session_id)) => {
                self.sessions.resume(session_id, &dispatch.query)
            }
            _ => None,
        };
        let session = match resumed {
            Some(session) => Some(session),
            None => {
                let (priority, interruptible) = self
                    .runtime
                    .profile(&dispatch.agent_name)
                    .map_or((DEFAULT_PRIORITY, true), |p| (p.priority, p.interruptible));
                self.sessions
                    .create(&dispatch.agent_name, &dispatch.user_id, priority, interruptible)
            }
        };

        let Some(session) = session else {
            // Session conflict: the active session wins; tell the user.
            warn!(agent = %dispatch.agent_name, "session refused, informing user");
            let refusal = "现在有更重要的任务在进行，请稍后再试";
            if let Some(id) = &correlation {
                self.tracker.add_trace(
                    id,
                    NAME,
                    "session_conflict",
                    serde_json::json!({"agent_name": dispatch.agent_name}),
                    serde_json::Value::Null,
                );
                self.tracker.update_response(id, refusal);
                self.tracker.fail(id);
            }
            let response =
                AgentResponse::error(&dispatch.agent_name, &dispatch.query, refusal);
            self.finish(&event, response, Some(refusal.to_owned()));
            return;
        };

        let ctx = AgentContext {
            user_id: dispatch.user_id.clone(),
            correlation_id: correlation.clone(),
            session: Some(session.clone()),
            parameters: dispatch.parameters.clone(),
        };
        let mut response = self
            .runtime
            .execute(&dispatch.agent_name, &dispatch.query, &ctx)
            .await;
        // The adapter owns the session id, not the agent.
        response.session_id = Some(session.session_id.clone());

        if let Some(id) = &correlation {
            self.tracker.add_trace(
                id,
                &dispatch.agent_name,
                "agent_response",
                serde_json::Value::Null,
                serde_json::json!({
                    "status": response.status,
                    "message": response.message,
                }),
            );
        }

        match response.status {
            AgentStatus::WaitingInput => {
                let prompt = response
                    .prompt
                    .clone()
                    .unwrap_or_else(|| response.message.clone());
                self.sessions
                    .wait_for_input(&session.session_id, &prompt, "text");
                if let Some(agent_state) = &response.data {
                    self.sessions.update_context(
                        &session.session_id,
                        "agent_state",
                        agent_state.clone(),
                    );
                }
                if let Some(id) = &correlation {
                    self.tracker.update_response(id, &prompt);
                    self.tracker.mark_waiting(id);
                }
                self.finish(&event, response, Some(prompt));
            }
            AgentStatus::Success | AgentStatus::Completed => {
                let revived = self.sessions.complete(&session.session_id);
                if let Some(id) = &correlation {
                    self.tracker.update_response(id, &response.message);
                    self.tracker.complete(id);
                }
                let message = response.message.clone();
                self.finish(&event, response, Some(message));

                // Replay the revived session's prompt so the user can pick
                // up where that dialogue left off.
                if let Some(revived) = revived {
                    if let Some(prompt) = revived.pending_prompt {
                        info!(agent = %revived.agent_name, "replaying prompt of resumed session");
                        self.bus
                            .publish(Event::tts_speak_request(NAME, prompt));
                    }
                }
            }
            AgentStatus::Error => {
                self.stats.error();
                self.sessions.fail(&session.session_id);
                if let Some(id) = &correlation {
                    self.tracker.update_response(id, &response.message);
                    self.tracker.fail(id);
                }
                let apology = response.message.clone();
                self.finish(&event, response, Some(apology));
            }
        }
    }

    /// Publish the response (and optional speech), then release the state
    /// machine back to idle.
    fn finish(&self, event: &Event, response: AgentResponse, speak: Option<String>) {
        let mut out = Event::agent_response(NAME, response);
        if let Some(id) = &event.correlation_id {
            out = out.with_correlation(id.clone());
        }
        self.bus.publish(out);

        if let Some(text) = speak {
            if !text.is_empty() {
                let mut tts = Event::tts_speak_request(NAME, text);
                if let Some(id) = &event.correlation_id {
                    tts = tts.with_correlation(id.clone());
                }
                self.bus.publish(tts);
            }
        }
        self.state
            .handle(StateEvent::AgentCompleted, NAME, "agent finished");
    }
}

#[async_trait]
impl Module for AgentAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (_id, mut rx) = self.bus.queue(&[EventKind::AgentDispatchRequest], NAME);
        let worker = Worker {
            bus: Arc::clone(&self.bus),
            state: Arc::clone(&self.state),
            tracker: Arc::clone(&self.tracker),
            sessions: Arc::clone(&self.sessions),
            runtime: Arc::clone(&self.runtime),
            stats: Arc::clone(&self.stats),
        };
        let agent_busy = Arc::clone(&self.agent_busy);
        let cancel = self.cancel.clone();

        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        // Planner-sourced dispatches are observability only;
                        // the planner executes its own subtasks.
                        if event.source != super::orchestrator::NAME {
                            continue;
                        }
                        agent_busy.store(true, Ordering::Release);
                        worker.handle(event).await;
                        agent_busy.store(false, Ordering::Release);
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    async fn cleanup(&mut self) {}

    fn statistics(&self) -> serde_json::Value {
        self.stats.snapshot()
    }
}
