//! Error types for the otto runtime.

/// Top-level error type for the voice-assistant runtime.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Configuration error (startup-fatal).
    #[error("config error: {0}")]
    Config(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Wakeword engine error.
    #[error("wakeword error: {0}")]
    Wakeword(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech recognition error.
    #[error("ASR error: {0}")]
    Asr(String),

    /// Language model call error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding generation error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Text-to-speech error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Tool validation or execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Session lifecycle error (conflict, unknown id, not resumable).
    #[error("session error: {0}")]
    Session(String),

    /// Memory subsystem error.
    #[error("memory error: {0}")]
    Memory(String),

    /// Persistence error (JSON file, vector store).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Module lifecycle / controller error.
    #[error("module error: {0}")]
    Module(String),

    /// Evaluation driver error.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
