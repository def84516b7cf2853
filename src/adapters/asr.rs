//! ASR adapter: recognizes captured speech blobs.
//!
//! Recognition runs on a blocking worker with a single task in flight;
//! the queued bus subscription serializes arrivals. The correlation id
//! for an utterance is minted here, at recognition success, and stamped
//! on every downstream event.

use super::{AdapterStats, Module};
use crate::asr::AsrEngine;
use crate::bus::{AsrOutcome, Event, EventBus, EventKind};
use crate::error::Result;
use crate::state::{StateEvent, StateMachine};
use crate::tracker::MessageTracker;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const NAME: &str = "asr_adapter";

pub struct AsrAdapter {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    tracker: Arc<MessageTracker>,
    engine: Arc<dyn AsrEngine>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AsrAdapter {
    pub fn new(
        bus: Arc<EventBus>,
        state: Arc<StateMachine>,
        tracker: Arc<MessageTracker>,
        engine: Arc<dyn AsrEngine>,
    ) -> Self {
        Self {
            bus,
            state,
            tracker,
            engine,
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for AsrAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (_id, mut rx) = self.bus.queue(&[EventKind::VadSpeechEnd], NAME);
        let bus = Arc::clone(&self.bus);
        let state = Arc::clone(&self.state);
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
                        let Some(blob) = event.speech().cloned() else { continue };
                        stats.event();

                        bus.publish(Event::asr_start(NAME));
                        state.handle(StateEvent::RecognitionStart, NAME, "speech segment ready");

                        let started = Instant::now();
                        let engine = Arc::clone(&engine);
                        let outcome = tokio::task::spawn_blocking(move || engine.recognize(&blob))
                            .await
                            .unwrap_or_else(|e| {
                                Err(crate::error::AssistantError::Asr(format!(
                                    "recognition worker: {e}"
                                )))
                            });
                        let latency_ms = started.elapsed().as_millis() as u64;
                        stats.latency(latency_ms);

                        match outcome {
                            Ok(recognition) => {
                                // The utterance gets its correlation id here.
                                let message_id = tracker.create_message_id();
                                tracker.update_query(&message_id, &recognition.text);
                                tracker.add_trace(
                                    &message_id,
                                    NAME,
                                    "asr_recognition_success",
                                    serde_json::Value::Null,
                                    serde_json::json!({
                                        "text": recognition.text,
                                        "confidence": recognition.confidence,
                                        "latency_ms": latency_ms,
                                    }),
                                );
                                info!(text = %recognition.text, latency_ms, "recognition success");
                                state.handle(StateEvent::RecognitionSuccess, NAME, "text ready");
                                bus.publish(
                                    Event::asr_success(
                                        NAME,
                                        AsrOutcome {
                                            text: recognition.text,
                                            confidence: recognition.confidence,
                                            latency_ms,
                                        },
                                    )
                                    .with_correlation(message_id),
                                );
                            }
                            Err(e) => {
                                stats.error();
                                error!("recognition failed: {e}");
                                state.handle(StateEvent::RecognitionFailed, NAME, "no text");
                                bus.publish(Event::asr_failed(NAME, e.to_string()));
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
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::ScriptedAsr;
    use crate::bus::SpeechBlob;
    use crate::tracker::TraceStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn success_mints_correlation_id_and_trace() {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateMachine::new(Arc::clone(&bus)));
        let tracker = Arc::new(MessageTracker::new());
        let asr = Arc::new(ScriptedAsr::new());
        asr.push("打开空调");

        let (_sid, mut success_rx) = bus.queue(&[EventKind::AsrRecognitionSuccess], "test");
        let mut adapter = AsrAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&state),
            Arc::clone(&tracker),
            asr,
        );
        adapter.start().await.expect("start");

        bus.publish(Event::vad_speech_end(
            "vad_adapter",
            SpeechBlob {
                samples: vec![0.1; 1600],
                sample_rate: 16_000,
            },
        ));

        let event = tokio::time::timeout(Duration::from_secs(1), success_rx.recv())
            .await
            .expect("timely")
            .expect("event");
        let outcome = event.asr().expect("asr payload");
        assert_eq!(outcome.text, "打开空调");
        let message_id = event.correlation_id.clone().expect("correlation id");
        let trace = tracker.get_trace(&message_id).expect("trace");
        assert_eq!(trace.query, "打开空调");
        assert_eq!(trace.status, TraceStatus::Active);
        assert!(trace.has_event("asr_recognition_success"));

        adapter.stop().await;
    }

    #[tokio::test]
    async fn failure_publishes_failed_event() {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateMachine::new(Arc::clone(&bus)));
        let tracker = Arc::new(MessageTracker::new());
        let asr = Arc::new(ScriptedAsr::new()); // empty queue fails

        let (_fid, mut failed_rx) = bus.queue(&[EventKind::AsrRecognitionFailed], "test");
        let mut adapter = AsrAdapter::new(Arc::clone(&bus), state, tracker, asr);
        adapter.start().await.expect("start");

        bus.publish(Event::vad_speech_end(
            "vad_adapter",
            SpeechBlob {
                samples: vec![0.0; 160],
                sample_rate: 16_000,
            },
        ));
        let event = tokio::time::timeout(Duration::from_secs(1), failed_rx.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(event.kind, EventKind::AsrRecognitionFailed);

        adapter.stop().await;
    }
}
