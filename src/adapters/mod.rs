//! Module adapters: bus-facing wrappers around the external collaborators.
//!
//! Every adapter implements the same lifecycle contract
//! (`initialize → start → stop → cleanup`), wraps exactly one
//! collaborator, and is the only path between that collaborator and the
//! bus. I/O-bound adapters drain a queued bus subscription from their own
//! worker task (`tokio::select!` over cancellation and the queue), so
//! publishers never block on them.

pub mod agent;
pub mod asr;
pub mod audio;
pub mod gui;
pub mod memory;
pub mod orchestrator;
pub mod tts;
pub mod vad;
pub mod wakeword;

pub use agent::AgentAdapter;
pub use asr::AsrAdapter;
pub use audio::AudioAdapter;
pub use gui::GuiAdapter;
pub use memory::MemoryAdapter;
pub use orchestrator::OrchestratorAdapter;
pub use tts::TtsAdapter;
pub use vad::VadAdapter;
pub use wakeword::WakewordAdapter;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uniform module lifecycle driven by the controller.
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &str;

    /// Acquire resources. Failure aborts system start.
    async fn initialize(&mut self) -> Result<()>;

    /// Spawn workers.
    async fn start(&mut self) -> Result<()>;

    /// Cancel workers; queued events are dropped, in-flight work stops at
    /// the next blocking point.
    async fn stop(&mut self);

    /// Release resources after stop.
    async fn cleanup(&mut self);

    /// Counters: events processed, errors, latency summary.
    fn statistics(&self) -> serde_json::Value;
}

/// Shared adapter counters.
#[derive(Default)]
pub struct AdapterStats {
    events: AtomicU64,
    errors: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
}

impl AdapterStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latency(&self, ms: u64) {
        self.latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            0
        } else {
            self.latency_total_ms.load(Ordering::Relaxed) / samples
        };
        serde_json::json!({
            "events_processed": self.events.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
            "avg_latency_ms": avg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_average_latency() {
        let stats = AdapterStats::new();
        stats.event();
        stats.latency(10);
        stats.latency(30);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot["events_processed"], 1);
        assert_eq!(snapshot["avg_latency_ms"], 20);
    }
}
