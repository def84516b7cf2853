//! Wakeword detector seam.

use crate::bus::{AudioFrame, WakewordHit};

/// Streaming keyword spotter fed raw frames.
pub trait WakewordDetector: Send {
    /// Process one frame; `Some` on a detection.
    fn process(&mut self, frame: &AudioFrame) -> Option<WakewordHit>;

    /// Clear internal state after a detection was handled.
    fn reset(&mut self);
}

/// Scripted spotter: fires once every `period` frames. Used in tests and
/// offline runs where no model is loaded.
pub struct ScriptedWakeword {
    keyword: String,
    period: u64,
    seen: u64,
}

impl ScriptedWakeword {
    pub fn every(keyword: &str, period: u64) -> Self {
        Self {
            keyword: keyword.to_owned(),
            period: period.max(1),
            seen: 0,
        }
    }
}

impl WakewordDetector for ScriptedWakeword {
    fn process(&mut self, _frame: &AudioFrame) -> Option<WakewordHit> {
        self.seen += 1;
        if self.seen % self.period == 0 {
            Some(WakewordHit {
                keyword: self.keyword.clone(),
                confidence: 0.95,
            })
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.0; 16],
            sample_rate: 16_000,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn fires_on_schedule() {
        let mut spotter = ScriptedWakeword::every("otto", 3);
        assert!(spotter.process(&frame()).is_none());
        assert!(spotter.process(&frame()).is_none());
        let hit = spotter.process(&frame()).expect("hit");
        assert_eq!(hit.keyword, "otto");
    }

    #[test]
    fn reset_restarts_the_count() {
        let mut spotter = ScriptedWakeword::every("otto", 2);
        assert!(spotter.process(&frame()).is_none());
        spotter.reset();
        assert!(spotter.process(&frame()).is_none());
        assert!(spotter.process(&frame()).is_some());
    }
}
