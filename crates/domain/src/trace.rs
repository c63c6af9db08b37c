//! Task trace types: an append-only step log plus the full task state
//! snapshot persisted for post-mortem debugging.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::Message;
use crate::usage::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Info,
    Warning,
    Failed,
    Success,
    Debug,
}

/// One entry in the append-only step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Interrupted,
    Failed,
}

/// One agent session's transcript as stored in the trace: the system
/// prompt used and the canonical message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

/// Full task state, persisted atomically on every tracer `save()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTrace {
    pub status: TaskStatus,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_file: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub final_boxed_answer: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub main_history: SessionTranscript,
    /// Session id (`<agent-name>_<n>`) → transcript. BTreeMap keeps the
    /// persisted JSON stable across saves.
    #[serde(default)]
    pub sub_sessions: BTreeMap<String, SessionTranscript>,
    /// Turns the main agent's loop actually ran (summary calls excluded).
    #[serde(default)]
    pub main_turns: u64,
    #[serde(default)]
    pub sub_agent_counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sub_session: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub step_logs: Vec<StepRecord>,
}

impl TaskTrace {
    pub fn new(task_id: impl Into<String>, task_file: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            status: TaskStatus::Pending,
            task_id: task_id.into(),
            task_file,
            start_time: now,
            end_time: now,
            final_boxed_answer: String::new(),
            error: String::new(),
            main_history: SessionTranscript::default(),
            sub_sessions: BTreeMap::new(),
            main_turns: 0,
            sub_agent_counter: 0,
            current_sub_session: None,
            usage: TokenUsage::default(),
            step_logs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trace_is_pending() {
        let t = TaskTrace::new("t-1", None);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.sub_sessions.is_empty());
        assert_eq!(t.sub_agent_counter, 0);
    }

    #[test]
    fn trace_roundtrips_through_json() {
        let mut t = TaskTrace::new("t-2", Some("data.csv".into()));
        t.status = TaskStatus::Completed;
        t.sub_sessions.insert(
            "agent-browsing_1".into(),
            SessionTranscript {
                system_prompt: "sp".into(),
                messages: vec![Message::user("subtask")],
            },
        );
        let json = serde_json::to_string(&t).unwrap();
        let back: TaskTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, TaskStatus::Completed);
        assert_eq!(back.task_file.as_deref(), Some("data.csv"));
        assert!(back.sub_sessions.contains_key("agent-browsing_1"));
    }

    #[test]
    fn step_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Warning).unwrap(),
            "\"warning\""
        );
    }
}
