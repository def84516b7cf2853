//! TTS adapter: drives the speaker and finalizes the utterance trace.

use super::{AdapterStats, Module};
use crate::bus::{Event, EventBus, EventKind};
use crate::error::Result;
use crate::tracker::MessageTracker;
use crate::tts::TtsEngine;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub const NAME: &str = "tts_adapter";

pub struct TtsAdapter {
    bus: Arc<EventBus>,
    tracker: Arc<MessageTracker>,
    engine: Arc<dyn TtsEngine>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TtsAdapter {
    pub fn new(bus: Arc<EventBus>, tracker: Arc<MessageTracker>, engine: Arc<dyn TtsEngine>) -> Self {
        Self {
            bus,
            tracker,
            engine,
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for TtsAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (_id, mut rx) = self.bus.queue(&[EventKind::TtsSpeakRequest], NAME);
        let bus = Arc::clone(&self.bus);
        let tracker = Arc::clone(&self.tracker);
        let engine = Arc::clone(&self.engine);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();

        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let Some(request) = event.speak() else { continue };
                        stats.event();
                        let text = request.text.clone();

                        // Playback blocks; keep it off the async threads.
                        let engine = Arc::clone(&engine);
                        let spoken = tokio::task::spawn_blocking(move || engine.speak(&text))
                            .await
                            .unwrap_or_else(|e| {
                                Err(crate::error::AssistantError::Tts(format!("worker: {e}")))
                            });
                        if let Err(e) = spoken {
                            stats.error();
                            error!("TTS playback failed: {e}");
                        }

                        if let Some(id) = &event.correlation_id {
                            tracker.add_trace(
                                id,
                                NAME,
                                "tts_spoken",
                                serde_json::json!({"text": request.text}),
                                serde_json::Value::Null,
                            );
                            tracker.complete(id);
                        }
                        let mut done = Event::control(EventKind::TtsSpeakEnd, NAME);
                        if let Some(id) = &event.correlation_id {
                            done = done.with_correlation(id.clone());
                        }
                        bus.publish(done);
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
