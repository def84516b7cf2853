//! Text-to-speech seam.

use crate::error::Result;
use std::sync::Mutex;

/// Speech synthesizer driven by the TTS adapter.
pub trait TtsEngine: Send + Sync {
    /// Synthesize and play one utterance; returns when playback ends.
    fn speak(&self, text: &str) -> Result<()>;
}

/// Discards all speech. Used in evaluation mode, where TTS is skipped.
pub struct NullTts;

impl TtsEngine for NullTts {
    fn speak(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Records spoken lines for inspection in tests.
#[derive(Default)]
pub struct CollectingTts {
    spoken: Mutex<Vec<String>>,
}

impl CollectingTts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TtsEngine for CollectingTts {
    fn speak(&self, text: &str) -> Result<()> {
        self.spoken
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_tts_records_utterances() {
        let tts = CollectingTts::new();
        tts.speak("你好").expect("speak");
        tts.speak("已打开空调").expect("speak");
        assert_eq!(tts.spoken(), vec!["你好", "已打开空调"]);
    }
}
