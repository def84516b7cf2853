//! Global pipeline state machine.
//!
//! A single process-wide state advanced only by [`StateEvent`]s. Invalid
//! transitions are rejected: the machine logs a warning and keeps the
//! current state. Every accepted transition is published on the bus as a
//! `state_changed` event carrying `(from, to, reason)`.

use crate::bus::{Event, EventBus, StateTransition};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    WakeDetected,
    Listening,
    Recognizing,
    Deciding,
    Executing,
    Error,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WakeDetected => "wake_detected",
            Self::Listening => "listening",
            Self::Recognizing => "recognizing",
            Self::Deciding => "deciding",
            Self::Executing => "executing",
            Self::Error => "error",
        }
    }
}

/// Events that drive state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    WakewordTriggered,
    SpeechStart,
    SpeechEnd,
    RecognitionStart,
    RecognitionSuccess,
    RecognitionFailed,
    OrchestratorDecided,
    AgentCompleted,
    Error,
    Reset,
}

impl StateEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WakewordTriggered => "wakeword_triggered",
            Self::SpeechStart => "speech_start",
            Self::SpeechEnd => "speech_end",
            Self::RecognitionStart => "recognition_start",
            Self::RecognitionSuccess => "recognition_success",
            Self::RecognitionFailed => "recognition_failed",
            Self::OrchestratorDecided => "orchestrator_decided",
            Self::AgentCompleted => "agent_completed",
            Self::Error => "error",
            Self::Reset => "reset",
        }
    }
}

/// `(current, event) -> next` lookup. `Error` and `Reset` apply from any
/// state; everything else is enumerated.
fn next_state(current: PipelineState, event: StateEvent) -> Option<PipelineState> {
    use PipelineState as S;
    use StateEvent as E;
    match event {
        E::Error => return Some(S::Error),
        E::Reset => return Some(S::Idle),
        _ => {}
    }
    match (current, event) {
        (S::Idle, E::WakewordTriggered) => Some(S::WakeDetected),
        (S::WakeDetected, E::SpeechStart) => Some(S::Listening),
        (S::Listening, E::SpeechEnd) => Some(S::Listening),
        (S::Listening, E::RecognitionStart) => Some(S::Recognizing),
        (S::Recognizing, E::RecognitionSuccess) => Some(S::Deciding),
        (S::Recognizing, E::RecognitionFailed) => Some(S::Idle),
        (S::Deciding, E::OrchestratorDecided) => Some(S::Executing),
        (S::Executing, E::AgentCompleted) => Some(S::Idle),
        _ => None,
    }
}

/// The state machine. Shared via `Arc`; transitions are serialized by an
/// internal mutex.
pub struct StateMachine {
    state: Mutex<PipelineState>,
    bus: Arc<EventBus>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl StateMachine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            bus,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Current state.
    pub fn current(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a state event. Returns the state after the call; on an
    /// invalid transition the state is unchanged.
    pub fn handle(&self, event: StateEvent, source: &str, reason: &str) -> PipelineState {
        let transition = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let from = *state;
            match next_state(from, event) {
                Some(to) => {
                    *state = to;
                    Some((from, to))
                }
                None => None,
            }
        };

        match transition {
            Some((from, to)) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                if from != to {
                    debug!(
                        from = from.as_str(),
                        to = to.as_str(),
                        event = event.as_str(),
                        "state transition"
                    );
                    self.bus.publish(Event::state_changed(
                        source,
                        StateTransition {
                            from,
                            to,
                            reason: reason.to_owned(),
                        },
                    ));
                }
                to
            }
            None => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let current = self.current();
                warn!(
                    state = current.as_str(),
                    event = event.as_str(),
                    "invalid state transition, staying"
                );
                current
            }
        }
    }

    pub fn statistics(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.current().as_str(),
            "accepted": self.accepted.load(Ordering::Relaxed),
            "rejected": self.rejected.load(Ordering::Relaxed),
        })
    }
}
