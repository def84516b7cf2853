//! VAD adapter: re-chunks raw frames to the detector's frame size, tracks
//! speech boundaries, and publishes the captured speech blob.
//!
//! Segments only open while the pipeline is awake (`wake_detected` or
//! `listening`); a pre-speech ring keeps the audio from just before the
//! boundary so clipped onsets still transcribe.

use super::{AdapterStats, Module};
use crate::bus::{Event, EventBus, SpeechBlob};
use crate::config::VadConfig;
use crate::error::Result;
use crate::state::{PipelineState, StateEvent, StateMachine};
use crate::vad::VadEngine;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const NAME: &str = "vad_adapter";

const FRAME_QUEUE: usize = 64;

pub struct VadAdapter {
    bus: Arc<EventBus>,
    state: Arc<StateMachine>,
    config: VadConfig,
    engine: Option<Box<dyn VadEngine>>,
    stats: Arc<AdapterStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl VadAdapter {
    pub fn new(
        bus: Arc<EventBus>,
        state: Arc<StateMachine>,
        config: VadConfig,
        engine: Box<dyn VadEngine>,
    ) -> Self {
        Self {
            bus,
            state,
            config,
            engine: Some(engine),
            stats: AdapterStats::new(),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }
}

/// Segment tracking state for the worker loop.
struct SegmentTracker {
    config: VadConfig,
    sample_rate: u32,
    pre_ring: VecDeque<f32>,
    in_speech: bool,
    speech: Vec<f32>,
    silence_ms: u64,
    voiced_ms: u64,
}

enum SegmentStep {
    Quiet,
    Started,
    Ended(SpeechBlob),
    TooShort,
}

impl SegmentTracker {
    fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            pre_ring: VecDeque::new(),
            in_speech: false,
            speech: Vec::new(),
            silence_ms: 0,
            voiced_ms: 0,
        }
    }

    fn pre_ring_capacity(&self) -> usize {
        (self.sample_rate as u64 * self.config.pre_speech_buffer_ms / 1000) as usize
    }

    fn frame_ms(&self) -> u64 {
        u64::from(self.config.frame_duration_ms)
    }

    /// Feed one detector-sized frame plus its classification.
    fn step(&mut self, frame: &[f32], is_speech: bool, awake: bool) -> SegmentStep {
        if !self.in_speech {
            if is_speech && awake {
                self.in_speech = true;
                self.speech = self.pre_ring.iter().copied().collect();
                self.speech.extend_from_slice(frame);
                self.silence_ms = 0;
                self.voiced_ms = self.frame_ms();
                return SegmentStep::Started;
            }
            // Keep the pre-speech ring rolling.
            self.pre_ring.extend(frame.iter().copied());
            let cap = self.pre_ring_capacity();
            while self.pre_ring.len() > cap {
                self.pre_ring.pop_front();
            }
            return SegmentStep::Quiet;
        }

        self.speech.extend_from_slice(frame);
        if is_speech {
            self.silence_ms = 0;
            self.voiced_ms += self.frame_ms();
        } else {
            self.silence_ms += self.frame_ms();
        }

        if self.silence_ms >= self.config.silence_timeout_ms {
            self.in_speech = false;
            self.pre_ring.clear();
            let voiced = self.voiced_ms;
            let samples = std::mem::take(&mut self.speech);
            self.voiced_ms = 0;
            self.silence_ms = 0;
            if voiced >= self.config.min_speech_duration_ms {
                return SegmentStep::Ended(SpeechBlob {
                    samples,
                    sample_rate: self.sample_rate,
                });
            }
            return SegmentStep::TooShort;
        }
        SegmentStep::Quiet
    }
}

#[async_trait]
impl Module for VadAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
        self.bus.add_frame_consumer(tx);

        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| crate::error::AssistantError::Vad("engine already taken".to_owned()))?;
        let bus = Arc::clone(&self.bus);
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        self.worker = Some(tokio::spawn(async move {
            let mut tracker: Option<SegmentTracker> = None;
            let mut pending: Vec<f32> = Vec::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        stats.event();
                        let sample_rate = frame.sample_rate;
                        let tracker = tracker
                            .get_or_insert_with(|| SegmentTracker::new(config.clone(), sample_rate));
                        let frame_len = (u64::from(sample_rate)
                            * u64::from(config.frame_duration_ms)
                            / 1000) as usize;

                        pending.extend_from_slice(&frame.samples);
                        while pending.len() >= frame_len {
                            let chunk: Vec<f32> = pending.drain(..frame_len).collect();
                            let is_speech = match engine.is_speech(&chunk, sample_rate) {
                                Ok(flag) => flag,
                                Err(e) => {
                                    stats.error();
                                    error!("VAD error: {e}");
                                    continue;
                                }
                            };
                            let awake = matches!(
                                state.current(),
                                PipelineState::WakeDetected | PipelineState::Listening
                            );
                            match tracker.step(&chunk, is_speech, awake) {
                                SegmentStep::Quiet => {}
                                SegmentStep::Started => {
                                    debug!("speech started");
                                    bus.publish(Event::vad_speech_start(NAME));
                                    state.handle(StateEvent::SpeechStart, NAME, "speech onset");
                                }
                                SegmentStep::Ended(blob) => {
                                    info!("speech segment: {} ms", blob.duration_ms());
                                    state.handle(StateEvent::SpeechEnd, NAME, "silence timeout");
                                    bus.publish(Event::vad_speech_end(NAME, blob));
                                }
                                SegmentStep::TooShort => {
                                    debug!("segment below min speech duration, dropped");
                                    state.handle(StateEvent::SpeechEnd, NAME, "segment too short");
                                }
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

    async fn cleanup(&mut self) {
        self.engine = None;
    }

    fn statistics(&self) -> serde_json::Value {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VadConfig {
        VadConfig {
            frame_duration_ms: 30,
            aggressiveness: 2,
            silence_timeout_ms: 60,
            pre_speech_buffer_ms: 30,
            min_speech_duration_ms: 60,
        }
    }

    #[test]
    fn segment_opens_and_closes_on_silence() {
        let mut tracker = SegmentTracker::new(config(), 1000);
        let frame = vec![0.5f32; 30];
        let silent = vec![0.0f32; 30];

        // Quiet frame fills the pre-ring.
        assert!(matches!(tracker.step(&silent, false, true), SegmentStep::Quiet));
        assert!(matches!(tracker.step(&frame, true, true), SegmentStep::Started));
        assert!(matches!(tracker.step(&frame, true, true), SegmentStep::Quiet));
        assert!(matches!(tracker.step(&silent, false, true), SegmentStep::Quiet));
        let step = tracker.step(&silent, false, true);
        match step {
            SegmentStep::Ended(blob) => {
                // Pre-ring (30) + 4 frames (120) of audio.
                assert_eq!(blob.samples.len(), 150);
            }
            _ => unreachable!("expected segment end"),
        }
    }

    #[test]
    fn segment_does_not_open_when_asleep() {
        let mut tracker = SegmentTracker::new(config(), 1000);
        let frame = vec![0.5f32; 30];
        assert!(matches!(tracker.step(&frame, true, false), SegmentStep::Quiet));
        assert!(!tracker.in_speech);
    }

    #[test]
    fn short_blip_is_dropped() {
        let mut tracker = SegmentTracker::new(config(), 1000);
        let frame = vec![0.5f32; 30];
        let silent = vec![0.0f32; 30];
        assert!(matches!(tracker.step(&frame, true, true), SegmentStep::Started));
        // 30ms voiced < 60ms minimum.
        assert!(matches!(tracker.step(&silent, false, true), SegmentStep::Quiet));
        assert!(matches!(tracker.step(&silent, false, true), SegmentStep::TooShort));
    }
}
