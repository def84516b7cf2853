//! GUI adapter: pure sink mirroring display-relevant events.
//!
//! The renderer itself is external; this adapter keeps a bounded log of
//! display lines that a frontend (or the CLI) can poll.

use super::{AdapterStats, Module};
use crate::bus::{EventBus, EventKind, EventPayload, SubscriptionId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const NAME: &str = "gui_adapter";

/// Display lines retained.
const LOG_CAPACITY: usize = 200;

pub struct GuiAdapter {
    bus: Arc<EventBus>,
    lines: Arc<Mutex<VecDeque<String>>>,
    stats: Arc<AdapterStats>,
    subscriptions: Vec<SubscriptionId>,
}

impl GuiAdapter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            lines: Arc::new(Mutex::new(VecDeque::new())),
            stats: AdapterStats::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Most recent display lines, oldest first.
    pub fn display_log(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

fn render(payload: &EventPayload) -> Option<String> {
    match payload {
        EventPayload::StateChange(t) => {
            Some(format!("[state] {} -> {}", t.from.as_str(), t.to.as_str()))
        }
        EventPayload::Asr(outcome) => Some(format!("[you] {}", outcome.text)),
        EventPayload::Agent(response) => Some(format!("[{}] {}", response.agent, response.message)),
        EventPayload::Error { message } => Some(format!("[error] {message}")),
        _ => None,
    }
}

#[async_trait]
impl Module for GuiAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        // Fast sink: synchronous subscription, no worker.
        for kind in [
            EventKind::StateChanged,
            EventKind::AsrRecognitionSuccess,
            EventKind::AgentResponse,
            EventKind::SystemError,
        ] {
            let lines = Arc::clone(&self.lines);
            let stats = Arc::clone(&self.stats);
            let id = self.bus.subscribe(
                kind,
                NAME,
                Arc::new(move |event| {
                    stats.event();
                    if let Some(line) = render(&event.payload) {
                        let mut lines = lines.lock().unwrap_or_else(|e| e.into_inner());
                        lines.push_back(line);
                        while lines.len() > LOG_CAPACITY {
                            lines.pop_front();
                        }
                    }
                    Ok(())
                }),
            );
            self.subscriptions.push(id);
        }
        Ok(())
    }

    async fn stop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }

    async fn cleanup(&mut self) {}

    fn statistics(&self) -> serde_json::Value {
        let mut snapshot = self.stats.snapshot();
        if let Some(map) = snapshot.as_object_mut() {
            let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
            map.insert("display_lines".to_owned(), serde_json::json!(lines.len()));
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AsrOutcome, Event};

    #[tokio::test]
    async fn mirrors_transcripts_and_responses() {
        let bus = Arc::new(EventBus::new());
        let mut adapter = GuiAdapter::new(Arc::clone(&bus));
        adapter.start().await.expect("start");

        bus.publish(Event::asr_success(
            "asr_adapter",
            AsrOutcome {
                text: "打开空调".to_owned(),
                confidence: 0.9,
                latency_ms: 80,
            },
        ));
        let log = adapter.display_log();
        assert_eq!(log, vec!["[you] 打开空调"]);

        adapter.stop().await;
        bus.publish(Event::gui_text("test", "ignored"));
        assert_eq!(adapter.display_log().len(), 1);
    }
}
