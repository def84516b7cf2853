//! Per-utterance trace records, keyed by correlation id.
//!
//! A trace is created when ASR succeeds (or when the evaluator injects an
//! utterance) and accumulates one entry per pipeline stage. Entries are
//! append-only; the evaluator reads traces concurrently while adapters
//! append, so each trace sits behind its own lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::bus::events::now_epoch_ms;

/// Terminal status of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// Still flowing through the pipeline.
    Active,
    /// A session agent is waiting for more user input.
    WaitingInput,
    /// Finished with a response.
    Completed,
    /// Finished with an error.
    Failed,
    /// Dropped during shutdown.
    Aborted,
}

/// One stage entry in a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Stage / module name.
    pub stage: String,
    /// What happened, e.g. `asr_recognition_success`.
    pub event: String,
    /// Epoch milliseconds.
    pub timestamp_ms: u64,
    /// Stage input, when meaningful.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub input: serde_json::Value,
    /// Stage output, when meaningful.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub output: serde_json::Value,
}

/// Full trace of one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTrace {
    pub message_id: String,
    pub created_at_ms: u64,
    /// Canonical query text, set once recognition completes.
    pub query: String,
    /// Canonical final response text.
    pub response: String,
    pub status: TraceStatus,
    pub entries: Vec<TraceEntry>,
}

impl MessageTrace {
    fn new(message_id: String) -> Self {
        Self {
            message_id,
            created_at_ms: now_epoch_ms(),
            query: String::new(),
            response: String::new(),
            status: TraceStatus::Active,
            entries: Vec::new(),
        }
    }

    /// Whether any entry matches the given stage event name.
    pub fn has_event(&self, event: &str) -> bool {
        self.entries.iter().any(|e| e.event == event)
    }
}

/// Tracker holding all live traces.
pub struct MessageTracker {
    traces: Mutex<HashMap<String, Arc<Mutex<MessageTrace>>>>,
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTracker {
    pub fn new() -> Self {
        Self {
            traces: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh correlation id and its empty trace.
    pub fn create_message_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let trace = Arc::new(Mutex::new(MessageTrace::new(id.clone())));
        self.traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), trace);
        id
    }

    fn trace_handle(&self, id: &str) -> Option<Arc<Mutex<MessageTrace>>> {
        self.traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Append a stage entry. Unknown ids create the trace lazily so events
    /// published before `create_message_id` (evaluation injections) still
    /// land somewhere.
    pub fn add_trace(
        &self,
        id: &str,
        stage: &str,
        event: &str,
        input: serde_json::Value,
        output: serde_json::Value,
    ) {
        let handle = {
            let mut traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                traces
                    .entry(id.to_owned())
                    .or_insert_with(|| Arc::new(Mutex::new(MessageTrace::new(id.to_owned())))),
            )
        };
        let mut trace = handle.lock().unwrap_or_else(|e| e.into_inner());
        trace.entries.push(TraceEntry {
            stage: stage.to_owned(),
            event: event.to_owned(),
            timestamp_ms: now_epoch_ms(),
            input,
            output,
        });
    }

    /// Set the canonical query text.
    pub fn update_query(&self, id: &str, query: &str) {
        if let Some(handle) = self.trace_handle(id) {
            let mut trace = handle.lock().unwrap_or_else(|e| e.into_inner());
            trace.query = query.to_owned();
        }
    }

    /// Set the canonical response text.
    pub fn update_response(&self, id: &str, response: &str) {
        if let Some(handle) = self.trace_handle(id) {
            let mut trace = handle.lock().unwrap_or_else(|e| e.into_inner());
            trace.response = response.to_owned();
        }
    }

    fn set_status(&self, id: &str, status: TraceStatus) {
        if let Some(handle) = self.trace_handle(id) {
            let mut trace = handle.lock().unwrap_or_else(|e| e.into_inner());
            trace.status = status;
        }
    }

    /// Mark the trace terminal-successful.
    pub fn complete(&self, id: &str) {
        self.set_status(id, TraceStatus::Completed);
    }

    /// Mark the trace waiting for user input.
    pub fn mark_waiting(&self, id: &str) {
        self.set_status(id, TraceStatus::WaitingInput);
    }

    /// Mark the trace terminal-failed.
    pub fn fail(&self, id: &str) {
        self.set_status(id, TraceStatus::Failed);
    }

    /// Mark every non-terminal trace aborted (shutdown path).
    pub fn abort_unfinished(&self) {
        let handles: Vec<Arc<Mutex<MessageTrace>>> = self
            .traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for handle in handles {
            let mut trace = handle.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(trace.status, TraceStatus::Active | TraceStatus::WaitingInput) {
                trace.status = TraceStatus::Aborted;
            }
        }
    }

    /// Snapshot of a trace.
    pub fn get_trace(&self, id: &str) -> Option<MessageTrace> {
        self.trace_handle(id)
            .map(|h| h.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn statistics(&self) -> serde_json::Value {
        let traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_status: HashMap<&'static str, usize> = HashMap::new();
        for handle in traces.values() {
            let trace = handle.lock().unwrap_or_else(|e| e.into_inner());
            let key = match trace.status {
                TraceStatus::Active => "active",
                TraceStatus::WaitingInput => "waiting_input",
                TraceStatus::Completed => "completed",
                TraceStatus::Failed => "failed",
                TraceStatus::Aborted => "aborted",
            };
            *by_status.entry(key).or_default() += 1;
        }
        serde_json::json!({
            "total": traces.len(),
            "by_status": by_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_accumulates_entries_in_order() {
        let tracker = MessageTracker::new();
        let id = tracker.create_message_id();
        tracker.add_trace(&id, "asr_adapter", "asr_recognition_success", serde_json::Value::Null, serde_json::json!({"text": "hi"}));
        tracker.add_trace(&id, "orchestrator_adapter", "orchestrator_decision", serde_json::Value::Null, serde_json::Value::Null);
        tracker.add_trace(&id, "agent_adapter", "agent_response", serde_json::Value::Null, serde_json::Value::Null);

        let trace = tracker.get_trace(&id).expect("trace exists");
        let events: Vec<&str> = trace.entries.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["asr_recognition_success", "orchestrator_decision", "agent_response"]
        );
    }

    #[test]
    fn canonical_fields_and_status() {
        let tracker = MessageTracker::new();
        let id = tracker.create_message_id();
        tracker.update_query(&id, "打开空调");
        tracker.update_response(&id, "空调已打开");
        tracker.complete(&id);

        let trace = tracker.get_trace(&id).expect("trace exists");
        assert_eq!(trace.query, "打开空调");
        assert_eq!(trace.response, "空调已打开");
        assert_eq!(trace.status, TraceStatus::Completed);
    }

    #[test]
    fn unknown_id_creates_trace_lazily() {
        let tracker = MessageTracker::new();
        tracker.add_trace("external-id", "evaluator", "injected", serde_json::Value::Null, serde_json::Value::Null);
        assert!(tracker.get_trace("external-id").is_some());
    }

    #[test]
    fn abort_unfinished_skips_terminal_traces() {
        let tracker = MessageTracker::new();
        let done = tracker.create_message_id();
        tracker.complete(&done);
        let open = tracker.create_message_id();
        tracker.abort_unfinished();
        assert_eq!(tracker.get_trace(&done).map(|t| t.status), Some(TraceStatus::Completed));
        assert_eq!(tracker.get_trace(&open).map(|t| t.status), Some(TraceStatus::Aborted));
    }
}
