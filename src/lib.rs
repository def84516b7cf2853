//! Otto: an in-vehicle voice-assistant runtime.
//!
//! The crate is the coordination plane of a cascaded voice pipeline:
//! Microphone → Wakeword → VAD → ASR → Orchestrator → Agent → TTS
//!
//! # Architecture
//!
//! Independent stages are stitched together by a typed event bus and run
//! as adapter workers draining their own queues:
//! - **Event bus**: typed publish/subscribe with a direct fan-out path
//!   for raw audio frames
//! - **State machine**: one process-wide pipeline state advanced by
//!   enumerated events
//! - **Session manager**: per-user priority stacks with interruption and
//!   stack-style resume across multi-turn dialogues
//! - **Agent runtime**: simple, tool-using, and session agents plus a
//!   planner that composes them
//! - **Tool layer**: a validated registry over one shared vehicle state,
//!   exposed through an MCP-compatible JSON surface
//! - **Memory**: a short-term conversation ring and a distilled long-term
//!   profile, with ordered and cosine-similarity recall

pub mod adapters;
pub mod agents;
pub mod asr;
pub mod audio;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod exec;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod state;
pub mod tracker;
pub mod tts;
pub mod vad;
pub mod wakeword;

pub use agents::{Agent, AgentResponse, AgentRuntime, AgentStatus};
pub use bus::{Event, EventBus, EventKind};
pub use config::AssistantConfig;
pub use controller::Controller;
pub use error::{AssistantError, Result};
pub use evaluator::{EvalReport, Evaluator};
pub use exec::{McpServer, ToolManager};
pub use memory::MemorySubsystem;
pub use orchestrator::Orchestrator;
pub use runtime::{AssistantRuntime, RuntimeBuilder};
pub use session::{AgentSession, SessionManager, SessionState};
pub use state::{PipelineState, StateMachine};
pub use tracker::{MessageTracker, TraceStatus};
