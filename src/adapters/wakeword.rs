//! Wakeword adapter: consumes raw frames, publishes detections, and arms
//! the wake timeout.

use super::{AdapterStats, Module};
use crate::bus::{Event, EventBus, EventKind};
use crate::config::WakewordConfig;
use crate::error::Result;
use crate::state::{PipelineState, StateEvent, StateMachine};
use crate::wakeword::WakewordDetector;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const NAME: &str = "wakeword_adapter";

/// Frame queue depth; detection lag beyond this drops frames instead of
/// stalling capture.
const FRAME_QUEUE: usize = 64;

pub struct WakewordAdapter {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    config: WakewordConfig,
    detector: Option<Box<dyn WakewordDetector>>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl WakewordAdapter {
    pub fn new(
        bus: Arc<EventBus>,
        state: Arc<StateMachine>,
        config: WakewordConfig,
        detector: Box<dyn WakewordDetector>,
    ) -> Self {
        Self {
            bus,
            state,
            config,
            detector: Some(detector),
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for WakewordAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
        self.bus.add_frame_consumer(tx);

        let mut detector = self
            .detector
            .take()
            .ok_or_else(|| crate::error::AssistantError::Wakeword("detector already taken".to_owned()))?;
        let bus = Arc::clone(&self.bus);
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();
        let wake_timeout = Duration::from_millis(self.config.wake_timeout_ms);

        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        stats.event();
                        if let Some(hit) = detector.process(&frame) {
                            info!(keyword = %hit.keyword, confidence = hit.confidence, "wakeword detected");
                            bus.publish(Event::wakeword_detected(NAME, hit.keyword.clone(), hit.confidence));
                            state.handle(StateEvent::WakewordTriggered, NAME, "wakeword hit");
                            detector.reset();

                            // Arm the wake timeout: if no speech starts, fall
                            // back to idle.
                            let bus = Arc::clone(&bus);
                            let state = Arc::clone(&state);
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    () = cancel.cancelled() => {}
                                    () = tokio::time::sleep(wake_timeout) => {
                                        if state.current() == PipelineState::WakeDetected {
                                            info!("wake timed out without speech");
                                            bus.publish(Event::control(EventKind::WakewordTimeout, NAME));
                                            state.handle(StateEvent::Reset, NAME, "wake timeout");
                                        }
                                    }
                                }
                            });
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

    async fn cleanup(&mut self) {
        self.detector = None;
    }

    fn statistics(&self) -> serde_json::Value {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::AudioFrame;
    use crate::wakeword::ScriptedWakeword;
    use std::time::Instant;

    #[tokio::test]
    async fn detection_moves_state_to_wake() {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateMachine::new(Arc::clone(&bus)));
        let detector = ScriptedWakeword::every("otto", 2);
        let mut adapter = WakewordAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&state),
            WakewordConfig::default(),
            Box::new(detector),
        );
        adapter.initialize().await.expect("init");
        adapter.start().await.expect("start");

        for _ in 0..2 {
            bus.publish_frame(AudioFrame {
                samples: vec![0.1; 16],
                sample_rate: 16_000,
                captured_at: Instant::now(),
            });
        }
        // Let the worker drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.current(), PipelineState::WakeDetected);

        adapter.stop().await;
        adapter.cleanup().await;
    }

    #[tokio::test]
    async fn wake_times_out_back_to_idle() {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateMachine::new(Arc::clone(&bus)));
        let config = WakewordConfig {
            wake_timeout_ms: 30,
            ..WakewordConfig::default()
        };
        let mut adapter = WakewordAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&state),
            config,
            Box::new(ScriptedWakeword::every("otto", 1)),
        );
        adapter.start().await.expect("start");

        bus.publish_frame(AudioFrame {
            samples: vec![0.1; 16],
            sample_rate: 16_000,
            captured_at: Instant::now(),
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(state.current(), PipelineState::Idle);

        adapter.stop().await;
    }
}
