//! Agent session lifecycle: priority-ordered per-user stacks with
//! interruption and resume.
//!
//! Each user has at most one active session (state `running` or
//! `waiting_input`) plus a stack of paused sessions. Creation arbitrates
//! against the active session by priority and interruptibility; completion
//! pops the stack and revives its top. All mutations for one user happen
//! under that user's mutex.

use crate::bus::{Event, EventBus, SessionNotice};
use crate::bus::events::now_epoch_ms;
use crate::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    WaitingInput,
    Paused,
    Completed,
    Error,
}

/// One agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub agent_name: String,
    pub user_id: String,
    /// Dispatch priority, 0-100; higher wins.
    pub priority: u8,
    /// Whether a running session may be preempted by a higher priority one.
    pub interruptible: bool,
    pub state: SessionState,
    /// Agent-owned context carried across turns.
    pub context: HashMap<String, serde_json::Value>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    /// Prompt replayed to the user when the session waits for input.
    pub pending_prompt: Option<String>,
    /// Expected input type while waiting, e.g. `text`.
    pub expected_input_type: Option<String>,
}

impl AgentSession {
    fn new(agent_name: &str, user_id: &str, priority: u8, interruptible: bool) -> Self {
        let now = now_epoch_ms();
        Self {
            session_id: Uuid::new_v4().to_string(),
            agent_name: agent_name.to_owned(),
            user_id: user_id.to_owned(),
            priority,
            interruptible,
            state: SessionState::Running,
            context: HashMap::new(),
            created_at_ms: now,
            last_activity_ms: now,
            pending_prompt: None,
            expected_input_type: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity_ms = now_epoch_ms();
    }
}

/// Per-user session holdings: one active slot plus the paused stack.
#[derive(Default)]
struct UserSessions {
    /// The session in state `running` or `waiting_input`, if any.
    active: Option<AgentSession>,
    /// Paused sessions, push order; resume always takes the back.
    stack: Vec<AgentSession>,
}

/// Session manager. Shared via `Arc`.
pub struct SessionManager {
    users: Mutex<HashMap<String, Arc<Mutex<UserSessions>>>>,
    /// session_id -> user_id, for id-based lookups.
    index: Mutex<HashMap<String, String>>,
    config: SessionConfig,
    created: AtomicU64,
    refused: AtomicU64,
    preempted: AtomicU64,
    expired: AtomicU64,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            config,
            created: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            preempted: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<UserSessions>> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(users.entry(user_id.to_owned()).or_default())
    }

    fn user_for(&self, session_id: &str) -> Option<String> {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    fn index_insert(&self, session_id: &str, user_id: &str) {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_owned(), user_id.to_owned());
    }

    fn index_remove(&self, session_id: &str) {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    /// Create a session for `agent_name`, arbitrating against the user's
    /// active session:
    ///
    /// - active is `waiting_input`: stack it (paused) and create the new one;
    /// - new priority is higher and active is interruptible: preempt;
    /// - new priority is higher but active is not interruptible: refuse;
    /// - otherwise: refuse.
    ///
    /// Returns `None` on refusal; the caller owes the user an explanation.
    pub fn create(
        &self,
        agent_name: &str,
        user_id: &str,
        priority: u8,
        interruptible: bool,
    ) -> Option<AgentSession> {
        let lock = self.user_lock(user_id);
        let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(active) = user.active.take() {
            let stackable = if active.state == SessionState::WaitingInput {
                true
            } else if priority > active.priority {
                if active.interruptible {
                    self.preempted.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    info!(
                        active = %active.agent_name,
                        requested = agent_name,
                        "active session is not interruptible, refusing"
                    );
                    user.active = Some(active);
                    self.refused.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            } else {
                info!(
                    active = %active.agent_name,
                    active_priority = active.priority,
                    requested = agent_name,
                    requested_priority = priority,
                    "priority too low, refusing"
                );
                user.active = Some(active);
                self.refused.fetch_add(1, Ordering::Relaxed);
                return None;
            };

            if stackable {
                let mut paused = active;
                info!(
                    agent = %paused.agent_name,
                    session = %paused.session_id,
                    "pausing session for {agent_name}"
                );
                paused.state = SessionState::Paused;
                paused.touch();
                user.stack.push(paused);
            }
        }

        let session = AgentSession::new(agent_name, user_id, priority, interruptible);
        self.index_insert(&session.session_id, user_id);
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(
            agent = agent_name,
            session = %session.session_id,
            priority,
            interruptible,
            "session created"
        );
        user.active = Some(session.clone());
        Some(session)
    }

    /// The user's active session (state `running` or `waiting_input`).
    pub fn get_active_session(&self, user_id: &str) -> Option<AgentSession> {
        let lock = self.user_lock(user_id);
        let user = lock.lock().unwrap_or_else(|e| e.into_inner());
        user.active.clone()
    }

    /// Any session by id, active or stacked.
    pub fn get_session(&self, session_id: &str) -> Option<AgentSession> {
        let user_id = self.user_for(session_id)?;
        let lock = self.user_lock(&user_id);
        let user = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = &user.active {
            if active.session_id == session_id {
                return Some(active.clone());
            }
        }
        user.stack.iter().find(|s| s.session_id == session_id).cloned()
    }

    /// The user's paused stack, bottom to top.
    pub fn get_session_stack(&self, user_id: &str) -> Vec<AgentSession> {
        let lock = self.user_lock(user_id);
        let user = lock.lock().unwrap_or_else(|e| e.into_inner());
        user.stack.clone()
    }

    /// Park the session until the user answers `prompt`.
    pub fn wait_for_input(&self, session_id: &str, prompt: &str, expected_type: &str) {
        let Some(user_id) = self.user_for(session_id) else {
            warn!(session = session_id, "wait_for_input on unknown session");
            return;
        };
        let lock = self.user_lock(&user_id);
        let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = user.active.as_mut() {
            if active.session_id == session_id {
                active.state = SessionState::WaitingInput;
                active.pending_prompt = Some(prompt.to_owned());
                active.expected_input_type = Some(expected_type.to_owned());
                active.touch();
            }
        }
    }

    /// Resume a session with the user's answer. Only the active session or
    /// the top of the stack may resume; anything else is rejected.
    pub fn resume(&self, session_id: &str, user_input: &str) -> Option<AgentSession> {
        let user_id = self.user_for(session_id)?;
        let lock = self.user_lock(&user_id);
        let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(active) = user.active.as_mut() {
            if active.session_id == session_id {
                active.state = SessionState::Running;
                active.pending_prompt = None;
                active.expected_input_type = None;
                active
                    .context
                    .insert("last_user_input".to_owned(), serde_json::json!(user_input));
                active.touch();
                return Some(active.clone());
            }
            warn!(
                session = session_id,
                active = %active.session_id,
                "resume rejected: not the active session"
            );
            return None;
        }

        // No active session: only the stack top may come back.
        let is_top = user
            .stack
            .last()
            .is_some_and(|s| s.session_id == session_id);
        if !is_top {
            warn!(session = session_id, "resume rejected: not top of stack");
            return None;
        }
        let mut session = user.stack.pop()?;
        session.state = SessionState::Running;
        session.pending_prompt = None;
        session
            .context
            .insert("last_user_input".to_owned(), serde_json::json!(user_input));
        session.touch();
        user.active = Some(session.clone());
        Some(session)
    }

    /// Finish a session. If a paused session sits on top of the stack it is
    /// popped and returned as the revived active session; the caller is
    /// responsible for re-invoking its agent with the stored context.
    pub fn complete(&self, session_id: &str) -> Option<AgentSession> {
        let user_id = self.user_for(session_id)?;
        let lock = self.user_lock(&user_id);
        let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());

        let was_active = user
            .active
            .as_ref()
            .is_some_and(|a| a.session_id == session_id);
        if was_active {
            if let Some(mut done) = user.active.take() {
                done.state = SessionState::Completed;
                info!(agent = %done.agent_name, session = %done.session_id, "session completed");
            }
        } else if let Some(pos) = user.stack.iter().position(|s| s.session_id == session_id) {
            let mut done = user.stack.remove(pos);
            done.state = SessionState::Completed;
        } else {
            warn!(session = session_id, "complete on unknown session");
        }
        self.index_remove(session_id);

        if was_active {
            if let Some(mut revived) = user.stack.pop() {
                // A session that was waiting for the user when it got
                // preempted is still waiting now.
                revived.state = if revived.pending_prompt.is_some() {
                    SessionState::WaitingInput
                } else {
                    SessionState::Running
                };
                revived.touch();
                info!(
                    agent = %revived.agent_name,
                    session = %revived.session_id,
                    "resuming stacked session"
                );
                user.active = Some(revived.clone());
                return Some(revived);
            }
        }
        None
    }

    /// Finish a session with an error. The stack is left untouched; the
    /// next completion or reap revives it.
    pub fn fail(&self, session_id: &str) {
        let Some(user_id) = self.user_for(session_id) else {
            return;
        };
        let lock = self.user_lock(&user_id);
        {
            let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());
            if user
                .active
                .as_ref()
                .is_some_and(|a| a.session_id == session_id)
            {
                user.active = None;
            } else if let Some(pos) = user.stack.iter().position(|s| s.session_id == session_id) {
                user.stack.remove(pos);
            }
        }
        self.index_remove(session_id);
    }

    /// Store a context value on a session.
    pub fn update_context(&self, session_id: &str, key: &str, value: serde_json::Value) {
        let Some(user_id) = self.user_for(session_id) else {
            return;
        };
        let lock = self.user_lock(&user_id);
        let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = user.active.as_mut() {
            if active.session_id == session_id {
                active.context.insert(key.to_owned(), value);
                active.touch();
                return;
            }
        }
        if let Some(session) = user
            .stack
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            session.context.insert(key.to_owned(), value);
            session.touch();
        }
    }

    /// Reap sessions idle beyond `ttl`, marking them `error` and returning
    /// them so the caller can emit notices.
    pub fn reap_idle(&self, ttl: Duration) -> Vec<AgentSession> {
        let cutoff = now_epoch_ms().saturating_sub(ttl.as_millis() as u64);
        let locks: Vec<Arc<Mutex<UserSessions>>> = {
            let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
            users.values().cloned().collect()
        };

        let mut reaped = Vec::new();
        for lock in locks {
            let mut user = lock.lock().unwrap_or_else(|e| e.into_inner());
            let stale_active = user
                .active
                .as_ref()
                .is_some_and(|a| a.last_activity_ms < cutoff);
            if stale_active {
                if let Some(mut dead) = user.active.take() {
                    dead.state = SessionState::Error;
                    reaped.push(dead);
                }
                // Revive the stack top in place of the expired session.
                if let Some(mut revived) = user.stack.pop() {
                    revived.state = SessionState::Running;
                    revived.touch();
                    user.active = Some(revived);
                }
            }
            let mut kept = Vec::with_capacity(user.stack.len());
            for mut session in user.stack.drain(..) {
                if session.last_activity_ms < cutoff {
                    session.state = SessionState::Error;
                    reaped.push(session);
                } else {
                    kept.push(session);
                }
            }
            user.stack = kept;
        }
        for session in &reaped {
            self.index_remove(&session.session_id);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        reaped
    }

    /// Spawn the TTL sweeper task. Expired sessions emit `session_expired`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let ttl = Duration::from_secs(manager.config.idle_ttl_secs);
        let period = Duration::from_secs(manager.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for dead in manager.reap_idle(ttl) {
                            warn!(
                                session = %dead.session_id,
                                agent = %dead.agent_name,
                                "session expired"
                            );
                            bus.publish(Event::session_expired(
                                "session_manager",
                                SessionNotice {
                                    session_id: dead.session_id,
                                    agent_name: dead.agent_name,
                                    user_id: dead.user_id,
                                },
                            ));
                        }
                    }
                }
            }
        })
    }

    pub fn statistics(&self) -> serde_json::Value {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let mut active = 0usize;
        let mut waiting = 0usize;
        let mut paused = 0usize;
        for lock in users.values() {
            let user = lock.lock().unwrap_or_else(|e| e.into_inner());
            match user.active.as_ref().map(|a| a.state) {
                Some(SessionState::Running) => active += 1,
                Some(SessionState::WaitingInput) => waiting += 1,
                _ => {}
            }
            paused += user.stack.len();
        }
        serde_json::json!({
            "users": users.len(),
            "running": active,
            "waiting_input": waiting,
            "paused": paused,
            "created": self.created.load(Ordering::Relaxed),
            "refused": self.refused.load(Ordering::Relaxed),
            "preempted": self.preempted.load(Ordering::Relaxed),
            "expired": self.expired.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    #[test]
    fn first_session_is_running() {
        let mgr = manager();
        let session = mgr.create("music_agent", "u1", 20, true).expect("created");
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(mgr.get_active_session("u1").map(|s| s.session_id), Some(session.session_id));
    }

    #[test]
    fn higher_priority_preempts_interruptible() {
        let mgr = manager();
        let music = mgr.create("music_agent", "u1", 20, true).expect("music");
        let nav = mgr.create("navigation_agent", "u1", 80, false).expect("nav");

        let active = mgr.get_active_session("u1").expect("active");
        assert_eq!(active.session_id, nav.session_id);

        let stack = mgr.get_session_stack("u1");
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].session_id, music.session_id);
        assert_eq!(stack[0].state, SessionState::Paused);
    }

    #[test]
    fn non_interruptible_refuses_higher_priority() {
        let mgr = manager();
        mgr.create("navigation_agent", "u1", 80, false).expect("nav");
        assert!(mgr.create("phone_agent", "u1", 90, true).is_none());
        // Navigation is still active.
        assert_eq!(
            mgr.get_active_session("u1").map(|s| s.agent_name),
            Some("navigation_agent".to_owned())
        );
    }

    #[test]
    fn lower_or_equal_priority_refused() {
        let mgr = manager();
        mgr.create("vehicle_control_agent", "u1", 50, true).expect("vc");
        assert!(mgr.create("music_agent", "u1", 20, true).is_none());
        assert!(mgr.create("weather_agent", "u1", 50, true).is_none());
    }

    #[test]
    fn waiting_input_always_stacks() {
        let mgr = manager();
        let hotel = mgr.create("hotel_agent", "u1", 60, false).expect("hotel");
        mgr.wait_for_input(&hotel.session_id, "请问哪个城市?", "text");
        // Lower priority, and hotel is not interruptible, but waiting_input
        // sessions always yield.
        let vc = mgr.create("vehicle_control_agent", "u1", 50, true).expect("vc");
        assert_eq!(
            mgr.get_active_session("u1").map(|s| s.session_id),
            Some(vc.session_id)
        );
        let stack = mgr.get_session_stack("u1");
        assert_eq!(stack[0].session_id, hotel.session_id);
        assert_eq!(stack[0].state, SessionState::Paused);
        assert_eq!(stack[0].pending_prompt.as_deref(), Some("请问哪个城市?"));
    }

    #[test]
    fn complete_revives_stack_top() {
        let mgr = manager();
        let music = mgr.create("music_agent", "u1", 20, true).expect("music");
        let nav = mgr.create("navigation_agent", "u1", 80, false).expect("nav");

        let revived = mgr.complete(&nav.session_id).expect("stack top revived");
        assert_eq!(revived.session_id, music.session_id);
        assert_eq!(revived.state, SessionState::Running);
        assert_eq!(
            mgr.get_active_session("u1").map(|s| s.session_id),
            Some(music.session_id)
        );
        assert!(mgr.get_session_stack("u1").is_empty());
    }

    #[test]
    fn resume_rejects_non_top() {
        let mgr = manager();
        let a = mgr.create("music_agent", "u1", 10, true).expect("a");
        let _b = mgr.create("phone_agent", "u1", 60, true).expect("b");
        let _c = mgr.create("navigation_agent", "u1", 80, false).expect("c");
        // a is at the bottom of the stack; it cannot resume past b.
        assert!(mgr.resume(&a.session_id, "继续").is_none());
    }

    #[test]
    fn resume_active_waiting_session_stores_input() {
        let mgr = manager();
        let music = mgr.create("music_agent", "u1", 20, true).expect("music");
        mgr.wait_for_input(&music.session_id, "想听什么歌?", "text");
        let resumed = mgr.resume(&music.session_id, "周杰伦的晴天").expect("resumed");
        assert_eq!(resumed.state, SessionState::Running);
        assert_eq!(
            resumed.context.get("last_user_input"),
            Some(&serde_json::json!("周杰伦的晴天"))
        );
        assert!(resumed.pending_prompt.is_none());
    }

    #[test]
    fn at_most_one_active_session_per_user() {
        let mgr = manager();
        mgr.create("music_agent", "u1", 10, true);
        mgr.create("phone_agent", "u1", 60, true);
        mgr.create("navigation_agent", "u1", 80, false);

        let active = mgr.get_active_session("u1");
        assert!(active.is_some());
        for stacked in mgr.get_session_stack("u1") {
            assert_eq!(stacked.state, SessionState::Paused);
        }
    }

    #[test]
    fn preemption_rule_over_priority_grid() {
        // Sweep (existing_priority, existing_interruptible, new_priority)
        // and check the decision rule pointwise.
        for existing_priority in [0u8, 10, 50, 90, 100] {
            for existing_interruptible in [true, false] {
                for new_priority in [0u8, 10, 50, 90, 100] {
                    let mgr = manager();
                    let user = "grid";
                    mgr.create("existing", user, existing_priority, existing_interruptible)
                        .expect("existing created");
                    let outcome = mgr.create("incoming", user, new_priority, true);

                    let expect_created =
                        new_priority > existing_priority && existing_interruptible;
                    assert_eq!(
                        outcome.is_some(),
                        expect_created,
                        "existing=({existing_priority},{existing_interruptible}) new={new_priority}"
                    );
                }
            }
        }
    }

    #[test]
    fn reap_idle_expires_stale_sessions() {
        let mgr = manager();
        let music = mgr.create("music_agent", "u1", 20, true).expect("music");
        // Backdate activity far beyond any TTL.
        {
            let lock = mgr.user_lock("u1");
            let mut user = lock.lock().unwrap();
            user.active.as_mut().expect("active").last_activity_ms = 0;
        }
        let reaped = mgr.reap_idle(Duration::from_secs(1));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].session_id, music.session_id);
        assert_eq!(reaped[0].state, SessionState::Error);
        assert!(mgr.get_active_session("u1").is_none());
        assert!(mgr.get_session(&music.session_id).is_none());
    }

    #[test]
    fn users_are_independent() {
        let mgr = manager();
        mgr.create("music_agent", "u1", 20, true).expect("u1 music");
        // Same priority for another user is fine.
        assert!(mgr.create("music_agent", "u2", 20, true).is_some());
    }
}
