//! Orchestrator adapter: turns recognized utterances into session-aware
//! agent dispatch requests.

use super::{AdapterStats, Module};
use crate::bus::{DispatchRequest, Event, EventBus, EventKind};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::state::{StateEvent, StateMachine};
use crate::tracker::MessageTracker;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const NAME: &str = "orchestrator_adapter";

pub struct OrchestratorAdapter {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    tracker: Arc<MessageTracker>,
    orchestrator: Arc<Orchestrator>,
    /// Set by the agent adapter while an invocation is in flight; new
    /// utterances for the same user are dropped with a `busy` trace.
    agent_busy: Arc<AtomicBool>,
    user_id: String,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl OrchestratorAdapter {
    pub fn new(
        bus: Arc<EventBus>,
        state: Arc<StateMachine>,
        tracker: Arc<MessageTracker>,
        orchestrator: Arc<Orchestrator>,
        agent_busy: Arc<AtomicBool>,
        user_id: &str,
    ) -> Self {
        Self {
            bus,
            state,
            tracker,
            orchestrator,
            agent_busy,
            user_id: user_id.to_owned(),
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for OrchestratorAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (_id, mut rx) = self.bus.queue(&[EventKind::AsrRecognitionSuccess], NAME);
        let bus = Arc::clone(&self.bus);
        let state = Arc::clone(&self.state);
        let tracker = Arc::clone(&self.tracker);
        let orchestrator = Arc::clone(&self.orchestrator);
        let agent_busy = Arc::clone(&self.agent_busy);
        let user_id = self.user_id.clone();
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();

        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let Some(outcome) = event.asr() else { continue };
                        let text = outcome.text.clone();
                        let correlation = event.correlation_id.clone();
                        stats.event();

                        if agent_busy.load(Ordering::Acquire) {
                            warn!(text = %text, "agent busy, dropping utterance");
                            if let Some(id) = &correlation {
                                tracker.add_trace(
                                    id,
                                    NAME,
                                    "busy",
                                    serde_json::json!({"text": text}),
                                    serde_json::Value::Null,
                                );
                                tracker.fail(id);
                            }
                            continue;
                        }

                        let decision = orchestrator.decide(&text, &user_id).await;
                        info!(
                            agent = %decision.selected_agent,
                            confidence = decision.confidence,
                            "orchestrator decision"
                        );
                        if let Some(id) = &correlation {
                            tracker.add_trace(
                                id,
                                NAME,
                                "orchestrator_decision",
                                serde_json::json!({"text": text}),
                                serde_json::json!({
                                    "selected_agent": decision.selected_agent,
                                    "confidence": decision.confidence,
                                    "reasoning": decision.reasoning,
                                }),
                            );
                        }
                        state.handle(StateEvent::OrchestratorDecided, NAME, "agent selected");

                        let mut dispatch = Event::agent_dispatch(
                            NAME,
                            DispatchRequest {
                                agent_name: decision.selected_agent,
                                query: text,
                                user_id: user_id.clone(),
                                action: decision.action,
                                session_id: decision.session_id,
                                parameters: decision.parameters,
                            },
                        );
                        if let Some(id) = correlation {
                            dispatch = dispatch.with_correlation(id);
                        }
                        bus.publish(dispatch);
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
        let mut snapshot = self.stats.snapshot();
        if let Some(map) = snapshot.as_object_mut() {
            map.insert("orchestrator".to_owned(), self.orchestrator.statistics());
        }
        snapshot
    }
}
