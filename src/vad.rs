//! Voice activity detection seam.
//!
//! The adapter owns framing, pre-speech buffering, and silence timeout;
//! the engine only answers "is this frame speech". The built-in engine is
//! energy-based with an aggressiveness-scaled threshold.

use crate::audio::frame_rms;
use crate::error::{AssistantError, Result};

/// Frame-level speech classifier.
pub trait VadEngine: Send {
    /// Classify one frame of exactly the configured duration.
    fn is_speech(&mut self, samples: &[f32], sample_rate: u32) -> Result<bool>;
}

/// Energy-based detector. Aggressiveness 0-3 scales the RMS threshold.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(aggressiveness: u8) -> Self {
        // 0 → very permissive, 3 → strict.
        let threshold = match aggressiveness {
            0 => 0.005,
            1 => 0.01,
            2 => 0.02,
            _ => 0.04,
        };
        Self { threshold }
    }

    /// Explicit threshold, for tests.
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VadEngine for EnergyVad {
    fn is_speech(&mut self, samples: &[f32], _sample_rate: u32) -> Result<bool> {
        if samples.is_empty() {
            return Err(AssistantError::Vad("empty frame".to_owned()));
        }
        Ok(frame_rms(samples) >= self.threshold)
    }
}
