//! Audio adapter: drives the capture source and fans frames out on the
//! bus's direct frame path.

use super::{AdapterStats, Module};
use crate::audio::AudioSource;
use crate::bus::EventBus;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const NAME: &str = "audio_adapter";

pub struct AudioAdapter {
    bus: Arc<EventBus>,
    source: Option<Box<dyn AudioSource>>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl AudioAdapter {
    pub fn new(bus: Arc<EventBus>, source: Box<dyn AudioSource>) -> Self {
        Self {
            bus,
            source: Some(source),
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

#[async_trait]
impl Module for AudioAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(AssistantError::Audio("no capture source".to_owned()));
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let Some(mut source) = self.source.take() else {
            return Err(AssistantError::Audio("capture source already taken".to_owned()));
        };
        let bus = Arc::clone(&self.bus);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();

        // The device read may block; keep the loop off the async threads.
        self.worker = Some(tokio::task::spawn_blocking(move || {
            info!("audio capture started ({} Hz)", source.sample_rate());
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        stats.event();
                        bus.publish_frame(frame);
                    }
                    Ok(None) => {
                        info!("audio source exhausted");
                        break;
                    }
                    Err(e) => {
                        stats.error();
                        error!("audio capture error: {e}");
                        break;
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
        self.source = None;
    }

    fn statistics(&self) -> serde_json::Value {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedSource;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn frames_reach_the_frame_path() {
        let bus = Arc::new(EventBus::new());
        let (tx, mut rx) = mpsc::channel(8);
        bus.add_frame_consumer(tx);

        let source = ScriptedSource::new(16_000, vec![vec![0.1; 4], vec![0.2; 4]]);
        let mut adapter = AudioAdapter::new(Arc::clone(&bus), Box::new(source));
        adapter.initialize().await.expect("init");
        adapter.start().await.expect("start");

        let first = rx.recv().await.expect("frame");
        assert_eq!(first.samples.len(), 4);
        let _ = rx.recv().await.expect("frame");

        adapter.stop().await;
        adapter.cleanup().await;
        assert_eq!(adapter.statistics()["events_processed"], 2);
    }
}
