//! Typed events routed between runtime modules.
//!
//! Every event couples an [`EventKind`] with the payload variant that kind
//! implies; the constructors below are the only way to build one, so a
//! consumer that matches on kind can rely on the payload shape.

use crate::agents::AgentResponse;
use crate::state::PipelineState;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Event kinds routed by the bus.
///
/// `AudioFrameReady` is listed for completeness but audio frames travel on
/// the dedicated frame path (see [`crate::bus::EventBus::publish_frame`]),
/// never through `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SystemStart,
    SystemStop,
    SystemError,
    AudioFrameReady,
    AudioDeviceChanged,
    AudioError,
    WakewordDetected,
    WakewordTimeout,
    VadSpeechStart,
    VadSpeechEnd,
    AsrRecognitionStart,
    AsrRecognitionSuccess,
    AsrRecognitionFailed,
    StateChanged,
    AgentDispatchRequest,
    AgentResponse,
    TtsSpeakRequest,
    TtsSpeakEnd,
    SessionExpired,
    GuiUpdate,
}

impl EventKind {
    /// Snake-case label used in logs and trace entries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemStart => "system_start",
            Self::SystemStop => "system_stop",
            Self::SystemError => "system_error",
            Self::AudioFrameReady => "audio_frame_ready",
            Self::AudioDeviceChanged => "audio_device_changed",
            Self::AudioError => "audio_error",
            Self::WakewordDetected => "wakeword_detected",
            Self::WakewordTimeout => "wakeword_timeout",
            Self::VadSpeechStart => "vad_speech_start",
            Self::VadSpeechEnd => "vad_speech_end",
            Self::AsrRecognitionStart => "asr_recognition_start",
            Self::AsrRecognitionSuccess => "asr_recognition_success",
            Self::AsrRecognitionFailed => "asr_recognition_failed",
            Self::StateChanged => "state_changed",
            Self::AgentDispatchRequest => "agent_dispatch_request",
            Self::AgentResponse => "agent_response",
            Self::TtsSpeakRequest => "tts_speak_request",
            Self::TtsSpeakEnd => "tts_speak_end",
            Self::SessionExpired => "session_expired",
            Self::GuiUpdate => "gui_update",
        }
    }
}

/// A chunk of raw microphone samples, delivered on the direct frame path.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples at the configured input sample rate.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Capture timestamp.
    pub captured_at: Instant,
}

/// A complete speech segment captured by the VAD adapter.
#[derive(Debug, Clone)]
pub struct SpeechBlob {
    /// Concatenated samples for the utterance, pre-speech padding included.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl SpeechBlob {
    /// Segment duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / u64::from(self.sample_rate)
    }
}

/// A wakeword hit.
#[derive(Debug, Clone)]
pub struct WakewordHit {
    /// Detected keyword.
    pub keyword: String,
    /// Detection confidence, 0.0 - 1.0.
    pub confidence: f32,
}

/// A successful recognition result.
#[derive(Debug, Clone)]
pub struct AsrOutcome {
    /// Transcribed text.
    pub text: String,
    /// Recognition confidence, 0.0 - 1.0.
    pub confidence: f32,
    /// Wall-clock recognition latency in ms.
    pub latency_ms: u64,
}

/// A pipeline state transition notice.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub reason: String,
}

/// How the agent adapter should treat the session for a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Create a fresh session for the selected agent.
    New,
    /// Resume the user's active session with this utterance as its input.
    Resume,
    /// The dispatch finalizes the session.
    Complete,
}

/// Payload of an `agent_dispatch_request` event (session-aware).
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Selected agent name.
    pub agent_name: String,
    /// The user utterance.
    pub query: String,
    /// Owning user.
    pub user_id: String,
    /// Session directive decided by the orchestrator.
    pub action: SessionAction,
    /// Target session when resuming.
    pub session_id: Option<String>,
    /// Extracted parameters, if the orchestrator produced any.
    pub parameters: serde_json::Value,
}

/// Payload of a `tts_speak_request` event.
#[derive(Debug, Clone)]
pub struct SpeakRequest {
    pub text: String,
}

/// Payload of a `session_expired` notice.
#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub session_id: String,
    pub agent_name: String,
    pub user_id: String,
}

/// Typed event payload; the variant is fixed by the event kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    Wakeword(WakewordHit),
    SpeechStart,
    SpeechEnd(SpeechBlob),
    Asr(AsrOutcome),
    AsrFailure { reason: String },
    StateChange(StateTransition),
    Dispatch(DispatchRequest),
    Agent(AgentResponse),
    Speak(SpeakRequest),
    Session(SessionNotice),
    Error { message: String },
    Text { text: String },
}

/// A bus event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Kind; determines the payload variant.
    pub kind: EventKind,
    /// Publishing module name.
    pub source: String,
    /// Epoch milliseconds at creation.
    pub timestamp_ms: u64,
    /// Correlation id linking the event to one utterance, when known.
    pub correlation_id: Option<String>,
    /// Typed payload.
    pub payload: EventPayload,
}

impl Event {
    fn build(kind: EventKind, source: &str, payload: EventPayload) -> Self {
        Self {
            kind,
            source: source.to_owned(),
            timestamp_ms: now_epoch_ms(),
            correlation_id: None,
            payload,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// A payload-free control event (`system_*`, `wakeword_timeout`,
    /// `audio_device_changed`, `tts_speak_end`, `gui_update` ticks).
    pub fn control(kind: EventKind, source: &str) -> Self {
        Self::build(kind, source, EventPayload::None)
    }

    pub fn wakeword_detected(source: &str, keyword: impl Into<String>, confidence: f32) -> Self {
        Self::build(
            EventKind::WakewordDetected,
            source,
            EventPayload::Wakeword(WakewordHit {
                keyword: keyword.into(),
                confidence,
            }),
        )
    }

    pub fn vad_speech_start(source: &str) -> Self {
        Self::build(EventKind::VadSpeechStart, source, EventPayload::SpeechStart)
    }

    pub fn vad_speech_end(source: &str, blob: SpeechBlob) -> Self {
        Self::build(EventKind::VadSpeechEnd, source, EventPayload::SpeechEnd(blob))
    }

    pub fn asr_start(source: &str) -> Self {
        Self::build(EventKind::AsrRecognitionStart, source, EventPayload::None)
    }

    pub fn asr_success(source: &str, outcome: AsrOutcome) -> Self {
        Self::build(
            EventKind::AsrRecognitionSuccess,
            source,
            EventPayload::Asr(outcome),
        )
    }

    pub fn asr_failed(source: &str, reason: impl Into<String>) -> Self {
        Self::build(
            EventKind::AsrRecognitionFailed,
            source,
            EventPayload::AsrFailure {
                reason: reason.into(),
            },
        )
    }

    pub fn state_changed(source: &str, transition: StateTransition) -> Self {
        Self::build(
            EventKind::StateChanged,
            source,
            EventPayload::StateChange(transition),
        )
    }

    pub fn agent_dispatch(source: &str, request: DispatchRequest) -> Self {
        Self::build(
            EventKind::AgentDispatchRequest,
            source,
            EventPayload::Dispatch(request),
        )
    }

    pub fn agent_response(source: &str, response: AgentResponse) -> Self {
        Self::build(EventKind::AgentResponse, source, EventPayload::Agent(response))
    }

    pub fn tts_speak_request(source: &str, text: impl Into<String>) -> Self {
        Self::build(
            EventKind::TtsSpeakRequest,
            source,
            EventPayload::Speak(SpeakRequest { text: text.into() }),
        )
    }

    pub fn session_expired(source: &str, notice: SessionNotice) -> Self {
        Self::build(EventKind::SessionExpired, source, EventPayload::Session(notice))
    }

    pub fn system_error(source: &str, message: impl Into<String>) -> Self {
        Self::build(
            EventKind::SystemError,
            source,
            EventPayload::Error {
                message: message.into(),
            },
        )
    }

    pub fn gui_text(source: &str, text: impl Into<String>) -> Self {
        Self::build(
            EventKind::GuiUpdate,
            source,
            EventPayload::Text { text: text.into() },
        )
    }

    /// The ASR outcome, when this is an `asr_recognition_success` event.
    pub fn asr(&self) -> Option<&AsrOutcome> {
        match &self.payload {
            EventPayload::Asr(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// The dispatch request, when this is an `agent_dispatch_request` event.
    pub fn dispatch(&self) -> Option<&DispatchRequest> {
        match &self.payload {
            EventPayload::Dispatch(request) => Some(request),
            _ => None,
        }
    }

    /// The agent response, when this is an `agent_response` event.
    pub fn agent(&self) -> Option<&AgentResponse> {
        match &self.payload {
            EventPayload::Agent(response) => Some(response),
            _ => None,
        }
    }

    /// The speech blob, when this is a `vad_speech_end` event.
    pub fn speech(&self) -> Option<&SpeechBlob> {
        match &self.payload {
            EventPayload::SpeechEnd(blob) => Some(blob),
            _ => None,
        }
    }

    /// The speak request, when this is a `tts_speak_request` event.
    pub fn speak(&self) -> Option<&SpeakRequest> {
        match &self.payload {
            EventPayload::Speak(request) => Some(request),
            _ => None,
        }
    }
}
