//! Configuration types for the assistant runtime.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the assistant runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// Wakeword settings.
    pub wakeword: WakewordConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Speech recognition settings.
    pub asr: AsrConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Memory subsystem settings.
    pub memory: MemoryConfig,
    /// Session lifecycle settings.
    pub session: SessionConfig,
    /// Agent declarations, in registration order.
    pub agents: Vec<AgentConfig>,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Number of input channels (1 = mono).
    pub channels: u16,
    /// Samples per captured frame.
    pub chunk_size: usize,
    /// Sample format label ("f32" is the only in-process format).
    pub format: String,
    /// Ring buffer length in seconds for pre-speech capture.
    pub buffer_seconds: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            chunk_size: 512,
            format: "f32".to_owned(),
            buffer_seconds: 2.0,
        }
    }
}

/// Wakeword configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakewordConfig {
    /// Keyword the spotter listens for.
    pub keyword: String,
    /// Detection threshold (0.0 - 1.0).
    pub threshold: f32,
    /// After a wake, return to idle if no speech starts within this window.
    pub wake_timeout_ms: u64,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            keyword: "otto".to_owned(),
            threshold: 0.5,
            wake_timeout_ms: 8_000,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Frame duration fed to the detector; must be 10, 20, or 30 ms.
    pub frame_duration_ms: u32,
    /// Detector aggressiveness, 0 (permissive) to 3 (strict).
    pub aggressiveness: u8,
    /// Silence gap in ms that ends a speech segment.
    pub silence_timeout_ms: u64,
    /// Audio retained before the detected speech start, in ms.
    pub pre_speech_buffer_ms: u64,
    /// Minimum speech duration in ms to emit a segment.
    pub min_speech_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: 30,
            aggressiveness: 2,
            silence_timeout_ms: 800,
            pre_speech_buffer_ms: 300,
            min_speech_duration_ms: 250,
        }
    }
}

/// Speech recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Recognition engine label (informational; the engine is injected).
    pub engine: String,
    /// Language hint passed to the engine.
    pub language: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            engine: "scripted".to_owned(),
            language: "zh".to_owned(),
        }
    }
}

/// Language model configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the chat completions API.
    pub api_url: String,
    /// Model name to request.
    pub api_model: String,
    /// API key; empty for unauthenticated local servers.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Bounded retry attempts for transient failures.
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:11434".to_owned(),
            api_model: "qwen2.5:7b".to_owned(),
            api_key: String::new(),
            temperature: 0.3,
            max_retries: 2,
            timeout_secs: 30,
        }
    }
}

/// Memory subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Short-term entries retained in the in-memory ring.
    pub short_term_capacity: usize,
    /// Long-term extraction runs every this many short-term appends.
    pub trigger_count: usize,
    /// Conversation rounds fed to the long-term extraction prompt.
    pub max_history_rounds: usize,
    /// Embedding model label passed to the embedding provider.
    pub embedding_model: String,
    /// SQLite file backing the vector collections.
    pub vector_db_path: PathBuf,
    /// JSON file holding the long-term memory record.
    pub long_term_file: PathBuf,
    /// Minimum cosine score for Related recall.
    pub similarity_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 100,
            trigger_count: 10,
            max_history_rounds: 30,
            embedding_model: "bag-of-tokens".to_owned(),
            vector_db_path: PathBuf::from("otto_vectors.db"),
            long_term_file: PathBuf::from("long_term_memory.json"),
            similarity_threshold: 0.7,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are reaped.
    pub idle_ttl_secs: u64,
    /// Sweep interval for the TTL reaper.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

/// One agent declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name, e.g. `music_agent`.
    pub name: String,
    /// Human-readable description shown to the orchestrator LLM.
    pub description: String,
    /// Dispatch priority, 0-100.
    pub priority: u8,
    /// Whether a running session of this agent may be preempted.
    pub interruptible: bool,
    /// Disabled agents are skipped at registration.
    pub enabled: bool,
    /// Capability keywords used by the rule-based fallback.
    pub capabilities: Vec<String>,
}

impl AssistantConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AssistantError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| AssistantError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges. Invalid configuration is startup-fatal.
    ///
    /// # Errors
    ///
    /// Returns `AssistantError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.vad.frame_duration_ms, 10 | 20 | 30) {
            return Err(AssistantError::Config(format!(
                "vad.frame_duration_ms must be 10, 20, or 30 (got {})",
                self.vad.frame_duration_ms
            )));
        }
        if self.vad.aggressiveness > 3 {
            return Err(AssistantError::Config(format!(
                "vad.aggressiveness must be 0-3 (got {})",
                self.vad.aggressiveness
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.chunk_size == 0 {
            return Err(AssistantError::Config(
                "audio.sample_rate and audio.chunk_size must be non-zero".to_owned(),
            ));
        }
        for agent in &self.agents {
            if agent.priority > 100 {
                return Err(AssistantError::Config(format!(
                    "agent {} priority must be 0-100 (got {})",
                    agent.name, agent.priority
                )));
            }
        }
        if self.memory.trigger_count == 0 {
            return Err(AssistantError::Config(
                "memory.trigger_count must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// The enabled agents, in declaration order.
    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter().filter(|a| a.enabled)
    }

    /// Built-in agent roster matching the stock tool catalog.
    pub fn default_agents() -> Vec<AgentConfig> {
        let agent = |name: &str, description: &str, priority: u8, interruptible: bool, caps: &[&str]| {
            AgentConfig {
                name: name.to_owned(),
                description: description.to_owned(),
                priority,
                interruptible,
                enabled: true,
                capabilities: caps.iter().map(|c| (*c).to_owned()).collect(),
            }
        };
        vec![
            agent(
                "navigation_agent",
                "路线规划与导航",
                80,
                false,
                &["导航", "路线", "地图", "去", "navigation"],
            ),
            agent(
                "vehicle_control_agent",
                "车辆控制:车窗、空调、灯光、座椅",
                50,
                true,
                &["车窗", "空调", "温度", "座椅", "灯", "window", "climate"],
            ),
            agent(
                "music_agent",
                "音乐播放与音量控制",
                20,
                true,
                &["音乐", "播放", "歌", "音量", "music", "song"],
            ),
            agent(
                "weather_agent",
                "天气查询",
                20,
                true,
                &["天气", "气温", "下雨", "weather"],
            ),
            agent(
                "phone_agent",
                "电话与短信",
                60,
                true,
                &["电话", "打给", "短信", "phone", "call"],
            ),
            agent(
                "planner_agent",
                "多步骤任务拆解与编排",
                70,
                true,
                &["帮我", "然后", "准备", "plan"],
            ),
            agent(
                "chat_agent",
                "闲聊与兜底问答",
                10,
                true,
                &["聊天", "chat"],
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut config = AssistantConfig::default();
        config.agents = AssistantConfig::default_agents();
        config.validate().expect("default config valid");
    }

    #[test]
    fn rejects_bad_frame_duration() {
        let mut config = AssistantConfig::default();
        config.vad.frame_duration_ms = 25;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_priority_above_range() {
        let mut config = AssistantConfig::default();
        config.agents = AssistantConfig::default_agents();
        config.agents[0].priority = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_agents_skips_disabled() {
        let mut config = AssistantConfig::default();
        config.agents = AssistantConfig::default_agents();
        config.agents[2].enabled = false;
        let names: Vec<&str> = config.enabled_agents().map(|a| a.name.as_str()).collect();
        assert!(!names.contains(&"music_agent"));
        assert!(names.contains(&"navigation_agent"));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let mut config = AssistantConfig::default();
        config.agents = AssistantConfig::default_agents();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: AssistantConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.agents.len(), config.agents.len());
        assert_eq!(back.vad.frame_duration_ms, 30);
    }
}
