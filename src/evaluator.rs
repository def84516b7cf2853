//! Batch evaluator: feeds synthetic utterances through the pipeline and
//! scores the outcomes.
//!
//! Each case gets a fresh correlation id and an injected
//! `asr_recognition_success` event (capture is bypassed). The evaluator
//! then polls the tracker until the trace is terminal or waiting for
//! input; waiting traces consume the case's scripted follow-ups, each on
//! a new correlation id against the same session.

use crate::bus::{AsrOutcome, Event, EventBus};
use crate::error::{AssistantError, Result};
use crate::llm::{ChatMessage, LlmClient, chat_json};
use crate::tracker::{MessageTracker, TraceStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const NAME: &str = "evaluator";

/// Bound on waiting-input rounds per case.
const MAX_ROUNDS: usize = 4;

/// One evaluation case (a JSONL line).
#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub query: String,
    #[serde(default)]
    pub expected_agent: String,
    #[serde(default)]
    pub expected_response: String,
    #[serde(default)]
    pub category: String,
    /// Scripted answers consumed when the pipeline asks for more input.
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

/// Scored result of one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub query: String,
    pub category: String,
    pub expected_agent: String,
    pub selected_agent: String,
    pub agent_match: bool,
    pub response: String,
    pub response_pass: bool,
    pub status: TraceStatus,
    pub rounds: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSummary {
    pub total: usize,
    pub agent_match_rate: f64,
    pub response_pass_rate: f64,
    pub overall_pass_rate: f64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub summary: EvalSummary,
    pub cases: Vec<CaseResult>,
}

pub struct Evaluator {
    bus: Arc<EventBus>,
    tracker: Arc<MessageTracker>,
    /// Optional LLM judge; without it a rule check scores responses.
    judge: Option<Arc<dyn LlmClient>>,
    case_timeout: Duration,
}

impl Evaluator {
    pub fn new(bus: Arc<EventBus>, tracker: Arc<MessageTracker>) -> Self {
        Self {
            bus,
            tracker,
            judge: None,
            case_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_judge(mut self, judge: Arc<dyn LlmClient>) -> Self {
        self.judge = Some(judge);
        self
    }

    #[must_use]
    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    /// Load cases from a JSONL file; blank lines are skipped.
    pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AssistantError::Evaluation(format!("read {}: {e}", path.display())))?;
        let mut cases = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let case: EvalCase = serde_json::from_str(line).map_err(|e| {
                AssistantError::Evaluation(format!("line {}: {e}", lineno + 1))
            })?;
            cases.push(case);
        }
        Ok(cases)
    }

    /// Run all cases sequentially and build the report.
    pub async fn run(&self, cases: &[EvalCase]) -> EvalReport {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let result = self.run_case(case).await;
            info!(
                query = %result.query,
                agent = %result.selected_agent,
                agent_match = result.agent_match,
                response_pass = result.response_pass,
                "case finished"
            );
            results.push(result);
        }

        let total = results.len();
        let agent_matches = results.iter().filter(|r| r.agent_match).count();
        let response_passes = results.iter().filter(|r| r.response_pass).count();
        let overall = results
            .iter()
            .filter(|r| r.agent_match && r.response_pass)
            .count();
        let latency_total: u64 = results.iter().map(|r| r.latency_ms).sum();
        let rate = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };
        EvalReport {
            summary: EvalSummary {
                total,
                agent_match_rate: rate(agent_matches),
                response_pass_rate: rate(response_passes),
                overall_pass_rate: rate(overall),
                avg_latency_ms: if total == 0 {
                    0
                } else {
                    latency_total / total as u64
                },
            },
            cases: results,
        }
    }

    async fn run_case(&self, case: &EvalCase) -> CaseResult {
        let started = Instant::now();
        let mut inputs = std::iter::once(case.query.clone())
            .chain(case.follow_ups.iter().cloned())
            .collect::<Vec<_>>()
            .into_iter();

        let mut rounds = 0usize;
        let mut selected_agent = String::new();
        let mut response = String::new();
        let mut status = TraceStatus::Failed;

        while rounds < MAX_ROUNDS {
            let Some(input) = inputs.next() else { break };
            rounds += 1;

            let message_id = self.tracker.create_message_id();
            self.tracker.update_query(&message_id, &input);
            self.bus.publish(
                Event::asr_success(
                    NAME,
                    AsrOutcome {
                        text: input,
                        confidence: 1.0,
                        latency_ms: 0,
                    },
                )
                .with_correlation(message_id.clone()),
            );

            let Some(trace) = self.await_settled(&message_id).await else {
                warn!(query = %case.query, "case timed out");
                status = TraceStatus::Failed;
                break;
            };

            if let Some(agent) = trace
                .entries
                .iter()
                .rev()
                .find(|e| e.event == "orchestrator_decision")
                .and_then(|e| e.output.get("selected_agent"))
                .and_then(|a| a.as_str())
            {
                selected_agent = agent.to_owned();
            }
            response = trace.response.clone();
            status = trace.status;

            match status {
                TraceStatus::WaitingInput => continue,
                _ => break,
            }
        }

        let agent_match = case.expected_agent.is_empty() || case.expected_agent == selected_agent;
        let response_pass = self
            .judge_response(case, &response, status)
            .await;

        CaseResult {
            query: case.query.clone(),
            category: case.category.clone(),
            expected_agent: case.expected_agent.clone(),
            selected_agent,
            agent_match,
            response,
            response_pass,
            status,
            rounds,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Poll the tracker until the trace leaves `active`.
    async fn await_settled(&self, message_id: &str) -> Option<crate::tracker::MessageTrace> {
        let deadline = Instant::now() + self.case_timeout;
        loop {
            if let Some(trace) = self.tracker.get_trace(message_id) {
                if trace.status != TraceStatus::Active {
                    return Some(trace);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn judge_response(&self, case: &EvalCase, response: &str, status: TraceStatus) -> bool {
        if let Some(judge) = &self.judge {
            let prompt = format!(
                "评估语音助手的回复质量。\n\
                 用户请求: \"{}\"\n期望: \"{}\"\n实际回复: \"{}\"\n\
                 只输出JSON: {{\"pass\": true/false}}",
                case.query, case.expected_response, response
            );
            match chat_json(
                judge.as_ref(),
                &[
                    ChatMessage::system("你是严格的质检员，只输出JSON。"),
                    ChatMessage::user(prompt),
                ],
            )
            .await
            {
                Ok(verdict) => return verdict["pass"].as_bool().unwrap_or(false),
                Err(e) => warn!("judge failed, using rules: {e}"),
            }
        }
        rule_pass(&case.expected_response, response, status)
    }
}

/// Rule fallback for response quality.
fn rule_pass(expected: &str, response: &str, status: TraceStatus) -> bool {
    match expected {
        "" => !response.is_empty() && status != TraceStatus::Failed,
        "success" => status == TraceStatus::Completed,
        "waiting_input" => status == TraceStatus::WaitingInput,
        text => response.contains(text),
    }
}

impl EvalReport {
    /// Write the report as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| AssistantError::Evaluation(format!("encode report: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_cases_parses_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"query\": \"导航到北京\", \"expected_agent\": \"navigation_agent\", \"expected_response\": \"success\", \"category\": \"navigation\"}\n",
                "\n",
                "{\"query\": \"播放音乐\", \"expected_agent\": \"music_agent\", \"follow_ups\": [\"周杰伦的晴天\"]}\n",
            ),
        )
        .expect("write");
        let cases = Evaluator::load_cases(&path).expect("load");
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].expected_agent, "navigation_agent");
        assert_eq!(cases[1].follow_ups, vec!["周杰伦的晴天"]);
    }

    #[test]
    fn load_cases_rejects_bad_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.jsonl");
        std::fs::write(&path, "{oops\n").expect("write");
        assert!(Evaluator::load_cases(&path).is_err());
    }

    #[test]
    fn rule_pass_matrix() {
        assert!(rule_pass("", "有回复", TraceStatus::Completed));
        assert!(!rule_pass("", "", TraceStatus::Completed));
        assert!(rule_pass("success", "x", TraceStatus::Completed));
        assert!(!rule_pass("success", "x", TraceStatus::WaitingInput));
        assert!(rule_pass("waiting_input", "想听什么?", TraceStatus::WaitingInput));
        assert!(rule_pass("晴天", "正在播放晴天", TraceStatus::Completed));
        assert!(!rule_pass("晴天", "正在播放稻香", TraceStatus::Completed));
    }
}
