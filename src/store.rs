//! Live aggregates fed by the log watcher and read by the dashboard.
//!
//! Every getter hands back an owned copy, so rendering never holds the lock
//! while the consumer thread applies new events.

use crate::history::History;
use crate::parser::LogEvent;
use crate::sessions::SessionMeta;
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub session_id: String,
    /// Last mode seen for this agent
    pub mode: String,
    pub model_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

impl ToolCall {
    /// Events carrying a non-empty `tool` field describe a tool invocation
    pub fn from_event(event: &LogEvent) -> Option<Self> {
        let name = event.field("tool").filter(|tool| !tool.is_empty())?;
        Some(Self {
            name: name.to_string(),
            timestamp: event.timestamp,
            session_id: event.session_id.clone(),
        })
    }
}

/// What an applied event changed, for notification hooks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventEffect {
    pub new_agent: bool,
}

#[derive(Default)]
struct Inner {
    sessions: FxHashMap<String, SessionMeta>,
    agents: FxHashMap<String, Vec<AgentInfo>>,
    model_calls: FxHashMap<String, u64>,
    logs: History<LogEvent>,
    tool_calls: History<ToolCall>,
    session_list: Vec<SessionMeta>,
    selected_session: Option<String>,
}

/// Thread-safe aggregation store
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by id, last write wins
    pub fn record_session(&self, session: SessionMeta) {
        self.inner.write().sessions.insert(session.id.clone(), session);
    }

    pub fn apply_event(&self, event: LogEvent) -> EventEffect {
        let mut effect = EventEffect::default();
        let mut inner = self.inner.write();

        if !event.model_id.is_empty() {
            *inner.model_calls.entry(event.model_id.clone()).or_insert(0) += 1;
        }

        if !event.session_id.is_empty() && !event.agent.is_empty() {
            let roster = inner.agents.entry(event.session_id.clone()).or_default();
            match roster.iter_mut().find(|agent| agent.name == event.agent) {
                Some(agent) => {
                    agent.mode.clone_from(&event.mode);
                    if !event.model_id.is_empty() {
                        agent.model_id.clone_from(&event.model_id);
                    }
                    agent.active = true;
                }
                None => {
                    roster.push(AgentInfo {
                        name: event.agent.clone(),
                        session_id: event.session_id.clone(),
                        mode: event.mode.clone(),
                        model_id: event.model_id.clone(),
                        active: true,
                    });
                    effect.new_agent = true;
                }
            }
        }

        inner.logs.push(event);
        effect
    }

    pub fn record_tool_call(&self, call: ToolCall) {
        self.inner.write().tool_calls.push(call);
    }

    pub fn model_calls(&self) -> FxHashMap<String, u64> {
        self.inner.read().model_calls.clone()
    }

    /// Oldest to newest
    pub fn recent_logs(&self) -> Vec<LogEvent> {
        self.inner.read().logs.all()
    }

    /// Newest first
    pub fn latest_logs(&self, n: usize) -> Vec<LogEvent> {
        self.inner.read().logs.latest(n)
    }

    /// Oldest to newest, optionally restricted to one session
    pub fn tool_calls(&self, session_id: Option<&str>) -> Vec<ToolCall> {
        let inner = self.inner.read();
        match session_id {
            Some(id) => inner
                .tool_calls
                .iter()
                .filter(|call| call.session_id == id)
                .cloned()
                .collect(),
            None => inner.tool_calls.all(),
        }
    }

    /// Roster of one session, or every session flattened
    pub fn agents(&self, session_id: Option<&str>) -> Vec<AgentInfo> {
        let inner = self.inner.read();
        match session_id {
            Some(id) => inner.agents.get(id).cloned().unwrap_or_default(),
            None => {
                let mut all: Vec<AgentInfo> = inner.agents.values().flatten().cloned().collect();
                all.sort_by(|a, b| a.session_id.cmp(&b.session_id).then(a.name.cmp(&b.name)));
                all
            }
        }
    }

    pub fn session(&self, id: &str) -> Option<SessionMeta> {
        self.inner.read().sessions.get(id).cloned()
    }

    pub fn sessions(&self) -> FxHashMap<String, SessionMeta> {
        self.inner.read().sessions.clone()
    }

    pub fn set_session_list(&self, sessions: Vec<SessionMeta>) {
        self.inner.write().session_list = sessions;
    }

    pub fn session_list(&self) -> Vec<SessionMeta> {
        self.inner.read().session_list.clone()
    }

    pub fn selected_session(&self) -> Option<String> {
        self.inner.read().selected_session.clone()
    }

    pub fn set_selected_session(&self, id: Option<String>) {
        self.inner.write().selected_session = id;
    }
}
