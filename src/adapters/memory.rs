//! Memory adapter: records every completed utterance into the memory
//! subsystem and runs the long-term extraction when it comes due.

use super::{AdapterStats, Module};
use crate::agents::AgentStatus;
use crate::bus::{EventBus, EventKind};
use crate::bus::events::now_epoch_ms;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::memory::{MemorySubsystem, ShortTermEntry};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub const NAME: &str = "memory_adapter";

pub struct MemoryAdapter {
    bus: Arc<EventBus>,
    memory: Arc<MemorySubsystem>,
    llm: Arc<dyn LlmClient>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl MemoryAdapter {
    pub fn new(bus: Arc<EventBus>, memory: Arc<MemorySubsystem>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            bus,
            memory,
            llm,
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for MemoryAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (_id, mut rx) = self.bus.queue(&[EventKind::AgentResponse], NAME);
        let memory = Arc::clone(&self.memory);
        let llm = Arc::clone(&self.llm);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();

        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let Some(response) = event.agent() else { continue };
                        // Waiting turns are recorded once the dialogue
                        // finishes; skip the intermediate prompt.
                        if response.status == AgentStatus::WaitingInput {
                            continue;
                        }
                        stats.event();

                        let entry = ShortTermEntry {
                            query: response.query.clone(),
                            response: response.message.clone(),
                            timestamp_ms: now_epoch_ms(),
                            agent: response.agent.clone(),
                            success: response.status != AgentStatus::Error,
                        };
                        let due = match memory.record_turn(entry) {
                            Ok(due) => due,
                            Err(e) => {
                                stats.error();
                                warn!("short-term record failed: {e}");
                                continue;
                            }
                        };
                        if due {
                            if let Err(e) = memory.update_long_term(llm.as_ref()).await {
                                stats.error();
                                error!("long-term update failed: {e}");
                            }
                        }
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
            map.insert("memory".to_owned(), self.memory.statistics());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentResponse;
    use crate::bus::Event;
    use crate::config::MemoryConfig;
    use crate::llm::ScriptedLlm;
    use crate::memory::{HashEmbedder, SqliteVectorStore};
    use std::time::Duration;

    #[tokio::test]
    async fn responses_become_short_term_memories() {
        let bus = Arc::new(EventBus::new());
        let memory = Arc::new(MemorySubsystem::new(
            MemoryConfig::default(),
            Arc::new(SqliteVectorStore::in_memory().expect("store")),
            Arc::new(HashEmbedder::new()),
        ));
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new());
        let mut adapter = MemoryAdapter::new(Arc::clone(&bus), Arc::clone(&memory), llm);
        adapter.start().await.expect("start");

        bus.publish(Event::agent_response(
            "agent_adapter",
            AgentResponse::success("music_agent", "播放音乐", "正在播放"),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recent = memory.recall_recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].query, "播放音乐");
        assert_eq!(recent[0].agent, "music_agent");

        adapter.stop().await;
    }

    #[tokio::test]
    async fn waiting_responses_are_not_recorded() {
        let bus = Arc::new(EventBus::new());
        let memory = Arc::new(MemorySubsystem::new(
            MemoryConfig::default(),
            Arc::new(SqliteVectorStore::in_memory().expect("store")),
            Arc::new(HashEmbedder::new()),
        ));
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new());
        let mut adapter = MemoryAdapter::new(Arc::clone(&bus), Arc::clone(&memory), llm);
        adapter.start().await.expect("start");

        bus.publish(Event::agent_response(
            "agent_adapter",
            AgentResponse::waiting("music_agent", "播放音乐", "想听什么歌?"),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(memory.recall_recent(5).is_empty());

        adapter.stop().await;
    }
}
