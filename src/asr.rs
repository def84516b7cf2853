//! Speech recognition seam.

use crate::bus::SpeechBlob;
use crate::error::{AssistantError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A recognition result before the adapter stamps latency onto it.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// Blocking recognizer; the ASR adapter keeps a single recognition in
/// flight on a worker.
pub trait AsrEngine: Send + Sync {
    /// Recognize one speech segment.
    ///
    /// # Errors
    ///
    /// Returns `AssistantError::Asr` when nothing can be recognized.
    fn recognize(&self, speech: &SpeechBlob) -> Result<Recognition>;
}

/// Scripted recognizer: pops pre-loaded texts in order; an empty queue
/// fails recognition like real silence would.
#[derive(Default)]
pub struct ScriptedAsr {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedAsr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(text.to_owned());
    }
}

impl AsrEngine for ScriptedAsr {
    fn recognize(&self, _speech: &SpeechBlob) -> Result<Recognition> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .map(|text| Recognition {
                text,
                confidence: 0.92,
            })
            .ok_or_else(|| AssistantError::Asr("no recognizable speech".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> SpeechBlob {
        SpeechBlob {
            samples: vec![0.1; 1600],
            sample_rate: 16_000,
        }
    }

    #[test]
    fn scripted_texts_pop_in_order() {
        let asr = ScriptedAsr::new();
        asr.push("打开空调");
        asr.push("播放音乐");
        assert_eq!(asr.recognize(&blob()).expect("first").text, "打开空调");
        assert_eq!(asr.recognize(&blob()).expect("second").text, "播放音乐");
        assert!(asr.recognize(&blob()).is_err());
    }
}
