//! End-to-end pipeline flows: event ordering, multi-turn tool dialogue,
//! planner composition, and the busy-drop policy.

use async_trait::async_trait;
use otto::asr::ScriptedAsr;
use otto::audio::ScriptedSource;
use otto::bus::{AsrOutcome, Event, EventKind, EventPayload};
use otto::config::AssistantConfig;
use otto::evaluator::{EvalCase, Evaluator};
use otto::llm::{ChatMessage, LlmClient, ScriptedLlm};
use otto::runtime::RuntimeBuilder;
use otto::state::PipelineState;
use otto::tracker::TraceStatus;
use otto::tts::CollectingTts;
use otto::vad::EnergyVad;
use otto::wakeword::ScriptedWakeword;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[tokio::test]
async fn full_pipeline_preserves_stage_order() {
    let llm = ScriptedLlm::new()
        .with_rule(
            "用户请求: \"打开空调\"",
            "{\"selected_agent\": \"vehicle_control_agent\", \"confidence\": 0.9, \"reasoning\": \"\", \"parameters\": {}}",
        )
        .with_rule("工具结果", "{\"action\": \"final\", \"message\": \"空调已打开\"}")
        .with_rule(
            "打开空调",
            "{\"action\": \"call_tool\", \"tool\": \"turn_on_ac\", \"arguments\": {}}",
        )
        .with_fallback("{\"selected_agent\": \"chat_agent\"}");

    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AssistantConfig::default();
    config.vad.frame_duration_ms = 30;
    config.vad.silence_timeout_ms = 90;
    config.vad.min_speech_duration_ms = 60;
    config.vad.pre_speech_buffer_ms = 30;
    config.memory.vector_db_path = dir.path().join("vectors.db");
    config.memory.long_term_file = dir.path().join("ltm.json");

    let asr = Arc::new(ScriptedAsr::new());
    asr.push("打开空调");
    let tts = Arc::new(CollectingTts::new());

    let mut runtime = RuntimeBuilder::new(config)
        .llm(Arc::new(llm))
        .audio_source(Box::new(ScriptedSource::new(16_000, Vec::new())))
        .wakeword(Box::new(ScriptedWakeword::every("otto", 1)))
        .vad(Box::new(EnergyVad::with_threshold(0.1)))
        .asr(asr)
        .tts(tts.clone())
        .build()
        .expect("build");

    // Record the correlation id minted at recognition success.
    let correlation: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let correlation_clone = Arc::clone(&correlation);
    runtime.bus.subscribe(
        EventKind::AsrRecognitionSuccess,
        "test",
        Arc::new(move |ev| {
            *correlation_clone.lock().unwrap() = ev.correlation_id.clone();
            Ok(())
        }),
    );
    runtime.start().await.expect("start");

    let frame = |amplitude: f32| otto::bus::AudioFrame {
        samples: vec![amplitude; 512],
        sample_rate: 16_000,
        captured_at: Instant::now(),
    };

    // Silence carrying the wakeword hit, then speech, then silence.
    runtime.bus.publish_frame(frame(0.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.state.current(), PipelineState::WakeDetected);
    for _ in 0..3 {
        runtime.bus.publish_frame(frame(0.5));
    }
    for _ in 0..4 {
        runtime.bus.publish_frame(frame(0.0));
    }

    // Wait for the spoken confirmation.
    let deadline = Instant::now() + Duration::from_secs(5);
    while tts.spoken().is_empty() {
        assert!(Instant::now() < deadline, "pipeline did not reach TTS");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(tts.spoken(), vec!["空调已打开"]);
    assert!(runtime.tools.vehicle_snapshot().ac_on);

    // The trace shows the stages in pipeline order.
    let id = correlation.lock().unwrap().clone().expect("correlation id");
    let deadline = Instant::now() + Duration::from_secs(2);
    let trace = loop {
        let trace = runtime.tracker.get_trace(&id).expect("trace");
        if trace.has_event("tts_spoken") {
            break trace;
        }
        assert!(Instant::now() < deadline, "trace never finalized");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    let expected = [
        "asr_recognition_success",
        "orchestrator_decision",
        "agent_execution_start",
        "agent_response",
        "tts_spoken",
    ];
    let positions: Vec<usize> = expected
        .iter()
        .map(|name| {
            trace
                .entries
                .iter()
                .position(|e| e.event == *name)
                .unwrap_or_else(|| panic!("missing trace entry {name}"))
        })
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "stages out of order: {positions:?}"
    );
    assert_eq!(trace.status, TraceStatus::Completed);

    // The pipeline settled back to idle for the next utterance.
    assert_eq!(runtime.state.current(), PipelineState::Idle);
    runtime.stop().await;
}

#[tokio::test]
async fn multi_turn_music_dialogue_completes() {
    // S2: one waiting-input round, then a tool call on resume.
    let llm = ScriptedLlm::new()
        .with_rule(
            "用户请求: \"播放音乐\"",
            "{\"selected_agent\": \"music_agent\", \"confidence\": 0.9, \"reasoning\": \"\", \"parameters\": {}}",
        )
        .with_rule(
            "播放音乐",
            "{\"action\": \"ask_user\", \"prompt\": \"好的,请问想听什么歌?\"}",
        )
        .with_rule("用户说: \"周杰伦的晴天\"", "{\"is_answer\": true}")
        .with_rule("工具结果", "{\"action\": \"final\", \"message\": \"正在播放周杰伦的晴天\"}")
        .with_rule(
            "周杰伦的晴天",
            "{\"action\": \"call_tool\", \"tool\": \"play_music\", \"arguments\": {\"song\": \"晴天\", \"artist\": \"周杰伦\"}}",
        )
        .with_fallback("{\"selected_agent\": \"chat_agent\"}");

    let mut runtime = RuntimeBuilder::new(AssistantConfig::default())
        .llm(Arc::new(llm))
        .evaluation_mode()
        .build()
        .expect("build");
    runtime.start().await.expect("start");

    let evaluator = Evaluator::new(Arc::clone(&runtime.bus), Arc::clone(&runtime.tracker));
    let case = EvalCase {
        query: "播放音乐".to_owned(),
        expected_agent: "music_agent".to_owned(),
        expected_response: "晴天".to_owned(),
        category: "entertainment".to_owned(),
        follow_ups: vec!["周杰伦的晴天".to_owned()],
    };
    let report = evaluator.run(std::slice::from_ref(&case)).await;

    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.overall_pass_rate, 1.0);
    assert_eq!(report.cases[0].rounds, 2);
    assert_eq!(report.cases[0].status, TraceStatus::Completed);

    let snapshot = runtime.tools.vehicle_snapshot();
    assert!(snapshot.music_playing);
    assert_eq!(snapshot.current_track, "晴天");
    assert_eq!(snapshot.current_artist, "周杰伦");

    // The dialogue's session is gone.
    assert!(
        runtime
            .sessions
            .get_active_session(otto::runtime::DEFAULT_USER)
            .is_none()
    );
    runtime.stop().await;
}

#[tokio::test]
async fn planner_fans_out_three_dispatches_with_distinct_sessions() {
    // S4: three independent subtasks, one correlation id, three sessions.
    let llm = ScriptedLlm::new()
        .with_rule(
            "为用户的请求选择",
            "{\"selected_agent\": \"planner_agent\", \"confidence\": 0.9, \"reasoning\": \"复合请求\", \"parameters\": {}}",
        )
        .with_rule(
            "任务计划",
            "{\"tasks\": [\
             {\"task_id\": \"t1\", \"description\": \"导航到上海\", \"agent\": \"navigation_agent\", \"depends_on\": []},\
             {\"task_id\": \"t2\", \"description\": \"播放轻音乐\", \"agent\": \"music_agent\", \"depends_on\": []},\
             {\"task_id\": \"t3\", \"description\": \"空调调到22度\", \"agent\": \"vehicle_control_agent\", \"depends_on\": []}]}",
        )
        .with_rule("任务执行结果", "都已安排好")
        .with_rule("工具结果", "{\"action\": \"final\", \"message\": \"已完成\"}")
        .with_rule(
            "导航到上海",
            "{\"action\": \"call_tool\", \"tool\": \"start_navigation\", \"arguments\": {\"destination\": \"上海\"}}",
        )
        .with_rule(
            "播放轻音乐",
            "{\"action\": \"call_tool\", \"tool\": \"play_music\", \"arguments\": {\"song\": \"轻音乐\"}}",
        )
        .with_rule(
            "空调调到22度",
            "{\"action\": \"call_tool\", \"tool\": \"set_temperature\", \"arguments\": {\"zone\": \"all\", \"temperature\": 22}}",
        )
        .with_fallback("{\"selected_agent\": \"chat_agent\"}");

    let mut runtime = RuntimeBuilder::new(AssistantConfig::default())
        .llm(Arc::new(llm))
        .evaluation_mode()
        .build()
        .expect("build");

    let dispatches: Arc<Mutex<Vec<(String, Option<String>, Option<String>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let dispatches_clone = Arc::clone(&dispatches);
    runtime.bus.subscribe(
        EventKind::AgentDispatchRequest,
        "test",
        Arc::new(move |ev| {
            if let EventPayload::Dispatch(d) = &ev.payload {
                dispatches_clone.lock().unwrap().push((
                    ev.source.clone(),
                    ev.correlation_id.clone(),
                    d.session_id.clone(),
                ));
            }
            Ok(())
        }),
    );
    runtime.start().await.expect("start");

    let id = runtime.tracker.create_message_id();
    runtime.bus.publish(
        Event::asr_success(
            "evaluator",
            AsrOutcome {
                text: "准备长途:导航到上海,播放轻音乐,空调调到22度".to_owned(),
                confidence: 1.0,
                latency_ms: 0,
            },
        )
        .with_correlation(id.clone()),
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let trace = runtime.tracker.get_trace(&id).expect("trace");
        if trace.status != TraceStatus::Active {
            assert_eq!(trace.status, TraceStatus::Completed);
            break;
        }
        assert!(Instant::now() < deadline, "planner did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let seen = dispatches.lock().unwrap();
    let planner_dispatches: Vec<_> = seen.iter().filter(|(s, _, _)| s == "planner_agent").collect();
    assert_eq!(planner_dispatches.len(), 3);
    let mut session_ids = std::collections::HashSet::new();
    for (_, correlation, session) in &planner_dispatches {
        assert_eq!(correlation.as_deref(), Some(id.as_str()));
        session_ids.insert(session.clone().expect("session id"));
    }
    assert_eq!(session_ids.len(), 3);

    // Every subtask really ran.
    let snapshot = runtime.tools.vehicle_snapshot();
    assert!(snapshot.navigation_active);
    assert_eq!(snapshot.navigation_destination, "上海");
    assert!(snapshot.music_playing);
    assert_eq!(snapshot.temperature_c["driver"], 22.0);
    runtime.stop().await;
}

/// LLM wrapper that holds each reply long enough to observe busy-drops.
struct SlowLlm {
    inner: ScriptedLlm,
    delay: Duration,
}

#[async_trait]
impl LlmClient for SlowLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> otto::Result<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.chat(messages).await
    }
}

#[tokio::test]
async fn utterance_during_agent_execution_is_dropped_busy() {
    let inner = ScriptedLlm::new()
        .with_rule(
            "用户请求: \"打开空调\"",
            "{\"selected_agent\": \"vehicle_control_agent\", \"confidence\": 0.9, \"reasoning\": \"\", \"parameters\": {}}",
        )
        .with_rule("打开空调", "{\"action\": \"final\", \"message\": \"空调已打开\"}")
        .with_fallback("{\"selected_agent\": \"chat_agent\"}");
    let llm = Arc::new(SlowLlm {
        inner,
        delay: Duration::from_millis(150),
    });

    let mut runtime = RuntimeBuilder::new(AssistantConfig::default())
        .llm(llm)
        .evaluation_mode()
        .build()
        .expect("build");
    runtime.start().await.expect("start");

    let say = |text: &str| {
        let id = runtime.tracker.create_message_id();
        runtime.bus.publish(
            Event::asr_success(
                "evaluator",
                AsrOutcome {
                    text: text.to_owned(),
                    confidence: 1.0,
                    latency_ms: 0,
                },
            )
            .with_correlation(id.clone()),
        );
        id
    };

    let first = say("打开空调");
    // Give the first utterance time to reach the agent (two slow LLM
    // calls: selection, then the agent), then inject the second.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = say("播放音乐");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let a = runtime.tracker.get_trace(&first).expect("first trace");
        let b = runtime.tracker.get_trace(&second).expect("second trace");
        if a.status != TraceStatus::Active && b.status != TraceStatus::Active {
            assert_eq!(a.status, TraceStatus::Completed);
            assert_eq!(b.status, TraceStatus::Failed);
            assert!(b.has_event("busy"), "second utterance must carry a busy entry");
            break;
        }
        assert!(Instant::now() < deadline, "traces did not settle");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    runtime.stop().await;
}
