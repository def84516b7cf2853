//! Runtime assembly: wires the coordination plane together.
//!
//! The builder takes the configuration plus the external collaborators
//! (audio source, wakeword, VAD, ASR, TTS, LLM, embedder, vector store),
//! fills in built-in defaults where none is supplied, and produces an
//! [`AssistantRuntime`] with every adapter registered on the controller
//! in pipeline order. Evaluation mode skips the capture-side adapters and
//! TTS; the evaluator injects recognition events directly.

use crate::adapters::{
    AgentAdapter, AsrAdapter, AudioAdapter, GuiAdapter, MemoryAdapter, OrchestratorAdapter,
    TtsAdapter, VadAdapter, WakewordAdapter,
};
use crate::agents::{
    Agent, AgentBehavior, AgentContext, AgentProfile, AgentResponse, AgentRuntime, PlannerAgent,
    SimpleHandler, ToolUsingAgent,
};
use crate::asr::{AsrEngine, ScriptedAsr};
use crate::audio::{AudioSource, SilenceSource};
use crate::bus::EventBus;
use crate::config::AssistantConfig;
use crate::controller::Controller;
use crate::error::Result;
use crate::exec::{ToolCategory, ToolManager};
use crate::llm::{ApiLlmClient, LlmClient};
use crate::memory::{
    EmbeddingProvider, HashEmbedder, MemorySubsystem, SqliteVectorStore, VectorStore,
};
use crate::orchestrator::Orchestrator;
use crate::session::SessionManager;
use crate::state::StateMachine;
use crate::tracker::MessageTracker;
use crate::tts::{NullTts, TtsEngine};
use crate::vad::{EnergyVad, VadEngine};
use crate::wakeword::{ScriptedWakeword, WakewordDetector};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The default single-operator user id.
pub const DEFAULT_USER: &str = "default";

/// The assembled system.
pub struct AssistantRuntime {
    pub config: AssistantConfig,
    pub bus: Arc<EventBus>,
    pub state: Arc<StateMachine>,
    pub tracker: Arc<MessageTracker>,
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<ToolManager>,
    pub memory: Arc<MemorySubsystem>,
    pub agents: Arc<AgentRuntime>,
    pub orchestrator: Arc<Orchestrator>,
    pub controller: Controller,
    cancel: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl AssistantRuntime {
    /// Initialize and start every module plus the session sweeper.
    pub async fn start(&mut self) -> Result<()> {
        self.controller.initialize().await?;
        self.controller.start().await?;
        self.sweeper = Some(
            self.sessions
                .spawn_sweeper(Arc::clone(&self.bus), self.cancel.clone()),
        );
        Ok(())
    }

    /// Stop everything: sweeper, modules, bus.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.await;
        }
        self.controller.stop().await;
    }
}

/// Canned single-turn weather replies; the real provider is external.
struct CannedWeather;

impl SimpleHandler for CannedWeather {
    fn handle(&self, query: &str, _ctx: &AgentContext) -> AgentResponse {
        AgentResponse::success(
            "weather_agent",
            query,
            "今天晴，气温22到28度，适合出行",
        )
    }
}

/// Registry tool names an agent may call, mapped from its name.
fn tools_for_agent(name: &str, tools: &ToolManager) -> Vec<String> {
    let categories: &[ToolCategory] = match name {
        "navigation_agent" => &[ToolCategory::Navigation],
        "music_agent" => &[ToolCategory::Entertainment],
        "phone_agent" => &[ToolCategory::Communication],
        "vehicle_control_agent" => &[
            ToolCategory::VehicleControl,
            ToolCategory::Climate,
            ToolCategory::Window,
            ToolCategory::Lighting,
            ToolCategory::Wiper,
            ToolCategory::Adas,
            ToolCategory::Energy,
            ToolCategory::Information,
        ],
        _ => return Vec::new(),
    };
    let mut names = Vec::new();
    for category in categories {
        for tool in tools.registry().list(Some(*category)) {
            names.push(tool.name.clone());
        }
    }
    names
}

fn system_prompt_for(name: &str, description: &str) -> String {
    format!(
        "你是车载语音助手的{description}模块({name})。\
         回答保持一到两句话，直接可执行。"
    )
}

/// Builder for [`AssistantRuntime`].
pub struct RuntimeBuilder {
    config: AssistantConfig,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vector: Option<Arc<dyn VectorStore>>,
    audio: Option<Box<dyn AudioSource>>,
    wakeword: Option<Box<dyn WakewordDetector>>,
    vad: Option<Box<dyn VadEngine>>,
    asr: Option<Arc<dyn AsrEngine>>,
    tts: Option<Arc<dyn TtsEngine>>,
    extra_agents: Vec<Agent>,
    evaluation_mode: bool,
}

impl RuntimeBuilder {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            vector: None,
            audio: None,
            wakeword: None,
            vad: None,
            asr: None,
            tts: None,
            extra_agents: Vec::new(),
            evaluation_mode: false,
        }
    }

    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn vector_store(mut self, vector: Arc<dyn VectorStore>) -> Self {
        self.vector = Some(vector);
        self
    }

    #[must_use]
    pub fn audio_source(mut self, source: Box<dyn AudioSource>) -> Self {
        self.audio = Some(source);
        self
    }

    #[must_use]
    pub fn wakeword(mut self, detector: Box<dyn WakewordDetector>) -> Self {
        self.wakeword = Some(detector);
        self
    }

    #[must_use]
    pub fn vad(mut self, engine: Box<dyn VadEngine>) -> Self {
        self.vad = Some(engine);
        self
    }

    #[must_use]
    pub fn asr(mut self, engine: Arc<dyn AsrEngine>) -> Self {
        self.asr = Some(engine);
        self
    }

    #[must_use]
    pub fn tts(mut self, engine: Arc<dyn TtsEngine>) -> Self {
        self.tts = Some(engine);
        self
    }

    /// Register an agent beyond the configured roster (tests, add-ons).
    #[must_use]
    pub fn agent(mut self, agent: Agent) -> Self {
        self.extra_agents.push(agent);
        self
    }

    /// Evaluation mode: no capture-side adapters, no TTS, in-memory
    /// vector store unless one was supplied.
    #[must_use]
    pub fn evaluation_mode(mut self) -> Self {
        self.evaluation_mode = true;
        self
    }

    /// Assemble the runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or unreachable persistence paths.
    pub fn build(self) -> Result<AssistantRuntime> {
        let mut config = self.config;
        if config.agents.is_empty() {
            config.agents = AssistantConfig::default_agents();
        }
        config.validate()?;

        let bus = Arc::new(EventBus::new());
        let state = Arc::new(StateMachine::new(Arc::clone(&bus)));
        let tracker = Arc::new(MessageTracker::new());
        let sessions = Arc::new(SessionManager::new(config.session.clone()));
        let tools = Arc::new(ToolManager::new());

        let llm: Arc<dyn LlmClient> = self
            .llm
            .unwrap_or_else(|| Arc::new(ApiLlmClient::new(&config.llm)));
        let embedder: Arc<dyn EmbeddingProvider> =
            self.embedder.unwrap_or_else(|| Arc::new(HashEmbedder::new()));
        let vector: Arc<dyn VectorStore> = match self.vector {
            Some(vector) => vector,
            None if self.evaluation_mode => Arc::new(SqliteVectorStore::in_memory()?),
            None => Arc::new(SqliteVectorStore::open(&config.memory.vector_db_path)?),
        };
        let memory = Arc::new(MemorySubsystem::new(
            config.memory.clone(),
            vector,
            embedder,
        ));

        // Agent roster from configuration.
        let mut runtime = AgentRuntime::new();
        for agent_config in config.enabled_agents() {
            let profile = AgentProfile::from(agent_config);
            let behavior = match agent_config.name.as_str() {
                "planner_agent" => AgentBehavior::Planner(PlannerAgent::new(
                    &agent_config.name,
                    Arc::clone(&llm),
                    Arc::clone(&bus),
                )),
                "weather_agent" => AgentBehavior::Simple(Arc::new(CannedWeather)),
                name => AgentBehavior::ToolUsing(ToolUsingAgent::new(
                    name,
                    &system_prompt_for(name, &agent_config.description),
                    tools_for_agent(name, &tools),
                    Arc::clone(&llm),
                    Arc::clone(&tools),
                )),
            };
            runtime.register(Agent { profile, behavior });
        }
        for agent in self.extra_agents {
            runtime.register(agent);
        }
        let agents = runtime.into_shared();

        let orchestrator = Arc::new(Orchestrator::new(
            config.agents.clone(),
            Arc::clone(&llm),
            Arc::clone(&sessions),
            Arc::clone(&memory),
        ));

        // Adapter wiring, registration order = pipeline order.
        let agent_busy = Arc::new(AtomicBool::new(false));
        let mut controller = Controller::new(Arc::clone(&bus), Arc::clone(&tracker));

        if !self.evaluation_mode {
            let audio = self
                .audio
                .unwrap_or_else(|| Box::new(SilenceSource::new(
                    config.audio.sample_rate,
                    config.audio.chunk_size,
                )));
            controller.register(Box::new(AudioAdapter::new(Arc::clone(&bus), audio)));

            let wakeword = self
                .wakeword
                .unwrap_or_else(|| Box::new(ScriptedWakeword::every(&config.wakeword.keyword, 50)));
            controller.register(Box::new(WakewordAdapter::new(
                Arc::clone(&bus),
                Arc::clone(&state),
                config.wakeword.clone(),
                wakeword,
            )));

            let vad = self
                .vad
                .unwrap_or_else(|| Box::new(EnergyVad::new(config.vad.aggressiveness)));
            controller.register(Box::new(VadAdapter::new(
                Arc::clone(&bus),
                Arc::clone(&state),
                config.vad.clone(),
                vad,
            )));

            let asr = self.asr.unwrap_or_else(|| Arc::new(ScriptedAsr::new()));
            controller.register(Box::new(AsrAdapter::new(
                Arc::clone(&bus),
                Arc::clone(&state),
                Arc::clone(&tracker),
                asr,
            )));
        }

        controller.register(Box::new(OrchestratorAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&state),
            Arc::clone(&tracker),
            Arc::clone(&orchestrator),
            Arc::clone(&agent_busy),
            DEFAULT_USER,
        )));
        controller.register(Box::new(AgentAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&state),
            Arc::clone(&tracker),
            Arc::clone(&sessions),
            Arc::clone(&agents),
            Arc::clone(&agent_busy),
        )));

        if !self.evaluation_mode {
            let tts = self.tts.unwrap_or_else(|| Arc::new(NullTts));
            controller.register(Box::new(TtsAdapter::new(
                Arc::clone(&bus),
                Arc::clone(&tracker),
                tts,
            )));
        }

        controller.register(Box::new(GuiAdapter::new(Arc::clone(&bus))));
        controller.register(Box::new(MemoryAdapter::new(
            Arc::clone(&bus),
            Arc::clone(&memory),
            Arc::clone(&llm),
        )));

        Ok(AssistantRuntime {
            config,
            bus,
            state,
            tracker,
            sessions,
            tools,
            memory,
            agents,
            orchestrator,
            controller,
            cancel: CancellationToken::new(),
            sweeper: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[tokio::test]
    async fn evaluation_runtime_builds_and_starts() {
        let mut runtime = RuntimeBuilder::new(AssistantConfig::default())
            .llm(Arc::new(ScriptedLlm::new()))
            .evaluation_mode()
            .build()
            .expect("build");
        assert!(
            runtime
                .controller
                .module_names()
                .contains(&"orchestrator_adapter")
        );
        assert!(!runtime.controller.module_names().contains(&"tts_adapter"));
        runtime.start().await.expect("start");
        assert!(runtime.controller.is_running());
        runtime.stop().await;
    }

    #[tokio::test]
    async fn full_runtime_registers_pipeline_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AssistantConfig::default();
        config.memory.vector_db_path = dir.path().join("vec.db");
        config.memory.long_term_file = dir.path().join("ltm.json");
        let runtime = RuntimeBuilder::new(config)
            .llm(Arc::new(ScriptedLlm::new()))
            .build()
            .expect("build");
        let names = runtime.controller.module_names();
        assert_eq!(
            names,
            vec![
                "audio_adapter",
                "wakeword_adapter",
                "vad_adapter",
                "asr_adapter",
                "orchestrator_adapter",
                "agent_adapter",
                "tts_adapter",
                "gui_adapter",
                "memory_adapter",
            ]
        );
    }
}
