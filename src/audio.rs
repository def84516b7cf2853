//! Audio capture seam.
//!
//! The real microphone driver is an external collaborator; the runtime
//! pulls [`AudioFrame`]s from an [`AudioSource`] and fans them out on the
//! bus's direct frame path. Built-in sources cover tests and offline
//! runs.

use crate::bus::AudioFrame;
use crate::error::Result;
use std::collections::VecDeque;
use std::time::Instant;

/// Pull-based frame source. `next_frame` may block on the device read;
/// the audio adapter drives it from its own worker.
pub trait AudioSource: Send {
    /// The next captured frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Sample rate of produced frames.
    fn sample_rate(&self) -> u32;
}

/// Endless silence at the configured rate. Stands in for a muted mic.
pub struct SilenceSource {
    sample_rate: u32,
    chunk_size: usize,
}

impl SilenceSource {
    pub fn new(sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
        }
    }
}

impl AudioSource for SilenceSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        // Pace like a real device read so the capture loop does not spin.
        let frame_ms = self.chunk_size as u64 * 1000 / u64::from(self.sample_rate.max(1));
        std::thread::sleep(std::time::Duration::from_millis(frame_ms.max(1)));
        Ok(Some(AudioFrame {
            samples: vec![0.0; self.chunk_size],
            sample_rate: self.sample_rate,
            captured_at: Instant::now(),
        }))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Plays back queued sample buffers as frames, then ends.
pub struct ScriptedSource {
    sample_rate: u32,
    frames: VecDeque<Vec<f32>>,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32, frames: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            frames: frames.into(),
        }
    }
}

impl AudioSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.frames.pop_front().map(|samples| AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            captured_at: Instant::now(),
        }))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// RMS energy of a frame.
pub fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
